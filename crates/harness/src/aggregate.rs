//! Aggregation across independent runs.
//!
//! Reads `run-1..run-k` subdirectories of a result directory and computes
//! pass@1 (mean ± stdev across runs), pass@k, pass^k, token totals and
//! averages, and per-run cost. The summary is a pure function of the
//! on-disk `meta.json` files; missing runs shrink `actual_runs` rather
//! than erroring.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use mark_domain::{Error, Result};
use mark_providers::compute_cost_usd;

/// Results of one run: task directory name → parsed `meta.json`.
type RunResults = BTreeMap<String, Value>;

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Load every `meta.json` under `run-1..run-k`. Missing run directories
/// are skipped with a warning.
pub fn collect_runs(result_dir: &Path, k: u32) -> Vec<RunResults> {
    let mut runs = Vec::new();
    for run_idx in 1..=k {
        let run_dir = result_dir.join(format!("run-{run_idx}"));
        if !run_dir.is_dir() {
            tracing::warn!(dir = %run_dir.display(), "run directory missing, skipping");
            continue;
        }
        let mut run_results = RunResults::new();
        if let Ok(entries) = std::fs::read_dir(&run_dir) {
            for entry in entries.flatten() {
                let task_dir = entry.path();
                if !task_dir.is_dir() {
                    continue;
                }
                let Ok(contents) = std::fs::read_to_string(task_dir.join("meta.json")) else {
                    continue;
                };
                if let Ok(meta) = serde_json::from_str::<Value>(&contents) {
                    run_results.insert(entry.file_name().to_string_lossy().into_owned(), meta);
                }
            }
        }
        runs.push(run_results);
    }
    runs
}

fn meta_success(meta: &Value) -> bool {
    meta.pointer("/execution_result/success")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn meta_u64(meta: &Value, pointer: &str) -> u64 {
    meta.pointer(pointer).and_then(|v| v.as_u64()).unwrap_or(0)
}

fn meta_f64(meta: &Value, pointer: &str) -> f64 {
    meta.pointer(pointer).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

/// Compute the summary for a result directory holding `k` runs.
pub fn aggregate(result_dir: &Path, k: u32) -> Result<Value> {
    if !result_dir.is_dir() {
        return Err(Error::Config(format!(
            "result directory does not exist: {}",
            result_dir.display()
        )));
    }
    let model_name = result_dir
        .file_name()
        .map(|n| n.to_string_lossy().replace("__", "-"))
        .unwrap_or_else(|| "unknown".to_string());

    let runs = collect_runs(result_dir, k);
    if runs.is_empty() {
        return Err(Error::Config(format!(
            "no runs found under {}",
            result_dir.display()
        )));
    }
    let actual_runs = runs.len();

    // Union of task names across runs; a task missing from a run counts as
    // a failure for that run.
    let mut all_tasks: Vec<&String> = runs.iter().flat_map(|r| r.keys()).collect();
    all_tasks.sort();
    all_tasks.dedup();
    let total_tasks = all_tasks.len();

    let mut total_agent_execution_time = 0.0f64;
    let mut total_input_tokens = 0u64;
    let mut total_output_tokens = 0u64;
    let mut total_tokens = 0u64;
    let mut total_turns = 0u64;
    let mut actual_model_name: Option<String> = None;

    let mut pass1_per_run: Vec<f64> = Vec::new();
    for run in &runs {
        let mut successes = 0usize;
        for task in &all_tasks {
            let Some(meta) = run.get(*task) else { continue };
            if meta_success(meta) {
                successes += 1;
            }
            total_agent_execution_time += meta_f64(meta, "/agent_execution_time");
            let input = meta_u64(meta, "/token_usage/input_tokens");
            let output = meta_u64(meta, "/token_usage/output_tokens");
            let mut total = meta_u64(meta, "/token_usage/total_tokens");
            if total == 0 {
                total = input + output;
            }
            total_input_tokens += input;
            total_output_tokens += output;
            total_tokens += total;
            total_turns += meta_u64(meta, "/turn_count");
            if actual_model_name.is_none() {
                actual_model_name = meta
                    .get("actual_model_name")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
        }
        let rate = if total_tasks > 0 {
            successes as f64 / total_tasks as f64
        } else {
            0.0
        };
        pass1_per_run.push(rate);
        tracing::info!(
            run = pass1_per_run.len(),
            successes,
            total_tasks,
            rate = format!("{:.1}%", rate * 100.0),
            "per-run pass@1"
        );
    }

    // pass@k / pass^k over the union of tasks.
    let mut any_count = 0usize;
    let mut all_count = 0usize;
    for task in &all_tasks {
        let successes: Vec<bool> = runs
            .iter()
            .map(|run| run.get(*task).map(meta_success).unwrap_or(false))
            .collect();
        if successes.iter().any(|s| *s) {
            any_count += 1;
        }
        if successes.iter().all(|s| *s) {
            all_count += 1;
        }
    }

    let denom = (total_tasks.max(1) * actual_runs) as f64;
    let avg_pass1 = pass1_per_run.iter().sum::<f64>() / actual_runs as f64;
    let variance = pass1_per_run
        .iter()
        .map(|r| (r - avg_pass1).powi(2))
        .sum::<f64>()
        / actual_runs as f64;
    let std_pass1 = variance.sqrt();

    let per_run_input_tokens = total_input_tokens as f64 / actual_runs as f64;
    let per_run_output_tokens = total_output_tokens as f64 / actual_runs as f64;
    let model_for_pricing = actual_model_name.clone().unwrap_or_else(|| model_name.clone());
    let per_run_cost =
        compute_cost_usd(&model_for_pricing, per_run_input_tokens, per_run_output_tokens);

    let avg_turns = total_turns as f64 / denom;

    let mut summary = serde_json::json!({
        "generated_at": chrono::Local::now().to_rfc3339(),
        "model": model_name,
        "actual_model_name": actual_model_name.unwrap_or_else(|| model_name.clone()),
        "runs": actual_runs,
        "total_tasks": total_tasks,
        "total_agent_execution_time": round2(total_agent_execution_time),
        "total_input_tokens": total_input_tokens,
        "total_output_tokens": total_output_tokens,
        "total_tokens": total_tokens,
        "total_turns": total_turns,
        "avg_agent_execution_time": round4(total_agent_execution_time / denom),
        "avg_input_tokens": round2(total_input_tokens as f64 / denom),
        "avg_output_tokens": round2(total_output_tokens as f64 / denom),
        "avg_total_tokens": round2(total_tokens as f64 / denom),
        "avg_turns": round2(avg_turns),
        "per_run_input_tokens": round2(per_run_input_tokens),
        "per_run_output_tokens": round2(per_run_output_tokens),
        "per_run_cost": per_run_cost.map(round4),
        "pass@1": {
            "avg": round4(avg_pass1),
            "std": round4(std_pass1),
            "per_run": pass1_per_run.iter().map(|r| round4(*r)).collect::<Vec<_>>(),
        },
    });

    if actual_runs > 1 && total_tasks > 0 {
        summary[format!("pass@{actual_runs}")] =
            serde_json::json!(round4(any_count as f64 / total_tasks as f64));
        summary[format!("pass^{actual_runs}")] =
            serde_json::json!(round4(all_count as f64 / total_tasks as f64));
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write_meta(root: &Path, run: u32, task: &str, success: bool, tokens: (u64, u64)) {
        let dir = root.join(format!("run-{run}")).join(task);
        fs::create_dir_all(&dir).unwrap();
        let meta = serde_json::json!({
            "task_name": task.replace("__", "/"),
            "execution_result": { "success": success },
            "token_usage": {
                "input_tokens": tokens.0,
                "output_tokens": tokens.1,
                "total_tokens": tokens.0 + tokens.1,
            },
            "turn_count": 2,
            "agent_execution_time": 1.5,
            "actual_model_name": "gpt-4o-2024-08-06",
        });
        fs::write(dir.join("meta.json"), serde_json::to_string(&meta).unwrap()).unwrap();
    }

    fn fixture_dir() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let result_dir = tmp.path().join("gpt-4o__filesystem");
        fs::create_dir_all(&result_dir).unwrap();
        (tmp, result_dir)
    }

    #[test]
    fn four_run_aggregation() {
        let (_tmp, dir) = fixture_dir();
        // Task A passes everywhere, task B only in runs 1 and 3, task C never.
        for run in 1..=4 {
            write_meta(&dir, run, "cat__a", true, (1000, 100));
            write_meta(&dir, run, "cat__b", run == 1 || run == 3, (1000, 100));
            write_meta(&dir, run, "cat__c", false, (1000, 100));
        }

        let summary = aggregate(&dir, 4).unwrap();
        assert_eq!(summary["runs"], 4);
        assert_eq!(summary["total_tasks"], 3);
        // Per-run pass@1: [2/3, 1/3, 2/3, 1/3] → avg 0.5.
        assert_eq!(summary["pass@1"]["avg"], 0.5);
        assert_eq!(summary["pass@1"]["per_run"].as_array().unwrap().len(), 4);
        // A or B succeeded somewhere: pass@4 = 2/3; only A always: pass^4 = 1/3.
        assert_eq!(summary["pass@4"], 0.6667);
        assert_eq!(summary["pass^4"], 0.3333);
        // pass^k ≤ pass@1 mean ≤ pass@k.
        assert!(summary["pass^4"].as_f64().unwrap() <= summary["pass@1"]["avg"].as_f64().unwrap());
        assert!(summary["pass@1"]["avg"].as_f64().unwrap() <= summary["pass@4"].as_f64().unwrap());
        // Token totals: 12 metas × 1100.
        assert_eq!(summary["total_tokens"], 13_200);
        assert_eq!(summary["per_run_input_tokens"], 3000.0);
        assert_eq!(summary["actual_model_name"], "gpt-4o-2024-08-06");
        assert!(summary["per_run_cost"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn pass1_std_matches_population_stdev() {
        let (_tmp, dir) = fixture_dir();
        // Run 1: both pass; run 2: one passes.
        write_meta(&dir, 1, "c__x", true, (10, 1));
        write_meta(&dir, 1, "c__y", true, (10, 1));
        write_meta(&dir, 2, "c__x", true, (10, 1));
        write_meta(&dir, 2, "c__y", false, (10, 1));

        let summary = aggregate(&dir, 2).unwrap();
        // Rates [1.0, 0.5]: mean 0.75, population stdev 0.25.
        assert_eq!(summary["pass@1"]["avg"], 0.75);
        assert_eq!(summary["pass@1"]["std"], 0.25);
    }

    #[test]
    fn missing_runs_are_tolerated() {
        let (_tmp, dir) = fixture_dir();
        write_meta(&dir, 1, "c__x", true, (10, 1));
        write_meta(&dir, 3, "c__x", false, (10, 1));

        let summary = aggregate(&dir, 4).unwrap();
        assert_eq!(summary["runs"], 2);
        // Single-key metrics keyed by actual run count, not requested k.
        assert!(summary.get("pass@2").is_some());
        assert!(summary.get("pass@4").is_none());
    }

    #[test]
    fn task_missing_from_a_run_counts_as_failure() {
        let (_tmp, dir) = fixture_dir();
        write_meta(&dir, 1, "c__x", true, (10, 1));
        write_meta(&dir, 1, "c__y", true, (10, 1));
        write_meta(&dir, 2, "c__x", true, (10, 1));
        // c__y absent from run 2.

        let summary = aggregate(&dir, 2).unwrap();
        assert_eq!(summary["pass@2"], 1.0);
        assert_eq!(summary["pass^2"], 0.5);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let (_tmp, dir) = fixture_dir();
        assert!(aggregate(&dir, 4).is_err());
        assert!(aggregate(Path::new("/definitely/not/here"), 4).is_err());
    }

    #[test]
    fn unknown_model_yields_null_cost() {
        let (_tmp, dir) = fixture_dir();
        let task_dir = dir.join("run-1").join("c__x");
        fs::create_dir_all(&task_dir).unwrap();
        let meta = serde_json::json!({
            "execution_result": { "success": true },
            "token_usage": { "input_tokens": 5, "output_tokens": 5, "total_tokens": 10 },
            "turn_count": 1,
            "agent_execution_time": 0.2,
            "actual_model_name": "mystery-model",
        });
        fs::write(task_dir.join("meta.json"), meta.to_string()).unwrap();

        let summary = aggregate(&dir, 1).unwrap();
        assert!(summary["per_run_cost"].is_null());
    }
}
