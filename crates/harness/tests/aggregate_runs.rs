//! Aggregation over a synthetic four-run result tree.

use std::fs;
use std::path::Path;

use mark_harness::aggregate::aggregate;

/// Write a minimal meta.json for one (run, task) pair.
fn write_meta(result_dir: &Path, run: u32, task: &str, success: bool) {
    let dir = result_dir.join(format!("run-{run}")).join(task);
    fs::create_dir_all(&dir).unwrap();
    let meta = serde_json::json!({
        "task_name": task.replace("__", "/"),
        "execution_result": { "success": success },
        "token_usage": { "input_tokens": 2000, "output_tokens": 150, "total_tokens": 2150 },
        "turn_count": 2,
        "agent_execution_time": 3.0,
        "actual_model_name": "gpt-4o-2024-08-06",
    });
    fs::write(dir.join("meta.json"), serde_json::to_string(&meta).unwrap()).unwrap();
}

#[test]
fn four_runs_over_fifty_tasks() {
    let tmp = tempfile::tempdir().unwrap();
    let result_dir = tmp.path().join("gpt-4o__filesystem");
    fs::create_dir_all(&result_dir).unwrap();

    // Tasks are cat__task_00 .. cat__task_49; run r solves a prefix of
    // them, so pass@k follows the largest prefix and pass^k the smallest.
    let per_run_successes = [25usize, 26, 24, 28];
    for (run_idx, successes) in per_run_successes.iter().enumerate() {
        let run = run_idx as u32 + 1;
        for task_idx in 0..50 {
            let task = format!("cat__task_{task_idx:02}");
            write_meta(&result_dir, run, &task, task_idx < *successes);
        }
    }

    let summary = aggregate(&result_dir, 4).unwrap();

    assert_eq!(summary["runs"], 4);
    assert_eq!(summary["total_tasks"], 50);

    // Rates per run: [0.50, 0.52, 0.48, 0.56], mean 0.515.
    let per_run: Vec<f64> = summary["pass@1"]["per_run"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(per_run, vec![0.5, 0.52, 0.48, 0.56]);
    assert_eq!(summary["pass@1"]["avg"].as_f64().unwrap(), 0.515);
    // Population stdev of the four rates, rounded to four decimals.
    assert_eq!(summary["pass@1"]["std"].as_f64().unwrap(), 0.0296);

    // Prefix structure: any run solved the first 28, every run solved the
    // first 24.
    assert_eq!(summary["pass@4"].as_f64().unwrap(), 0.56);
    assert_eq!(summary["pass^4"].as_f64().unwrap(), 0.48);

    // pass^k ≤ pass@1 mean ≤ pass@k always.
    let pass_all = summary["pass^4"].as_f64().unwrap();
    let pass_mean = summary["pass@1"]["avg"].as_f64().unwrap();
    let pass_any = summary["pass@4"].as_f64().unwrap();
    assert!(pass_all <= pass_mean && pass_mean <= pass_any);

    // Token bookkeeping: 200 metas of 2150 tokens.
    assert_eq!(summary["total_tokens"], 430_000);
    assert_eq!(summary["per_run_input_tokens"].as_f64().unwrap(), 100_000.0);
    assert!(summary["per_run_cost"].as_f64().unwrap() > 0.0);
}

#[test]
fn aggregation_is_a_pure_function_of_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let result_dir = tmp.path().join("gpt-4o__postgres");
    fs::create_dir_all(&result_dir).unwrap();
    write_meta(&result_dir, 1, "lego__fix_data_inconsistencies", true);
    write_meta(&result_dir, 2, "lego__fix_data_inconsistencies", false);

    let first = aggregate(&result_dir, 2).unwrap();
    let second = aggregate(&result_dir, 2).unwrap();

    // Identical except for the generation timestamp.
    let strip = |mut v: serde_json::Value| {
        v.as_object_mut().unwrap().remove("generated_at");
        v
    };
    assert_eq!(strip(first), strip(second));
}
