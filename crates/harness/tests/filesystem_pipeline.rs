//! End-to-end filesystem pipeline without the LLM: state setup, a simulated
//! agent mutation, verification against the exported environment, cleanup,
//! and result persistence.

use std::fs;
use std::path::Path;

use mark_domain::{AgentOutcome, ServiceKind, Task, TokenUsage, TranscriptMessage};
use mark_harness::{ModelRunConfig, ResultStore};
use mark_state::filesystem::FilesystemStateManager;
use mark_state::{StateManager, VerificationEnv};
use mark_tasks::execute_task;

const AGREEMENT: &str = "Preferred_Stock_Purchase_Agreement_v10.txt";

/// Verifier: the working directory must contain `legal_files/final_version/`
/// with the agreement inside it while the original stays in place, and the
/// transcript path must point at an existing file.
const VERIFY_SCRIPT: &str = r#"
import json
import os
import sys

root = os.environ["FILESYSTEM_TEST_DIR"]
messages = os.environ["MCP_MESSAGES"]

agreement = "Preferred_Stock_Purchase_Agreement_v10.txt"
moved = os.path.join(root, "legal_files", "final_version", agreement)
original = os.path.join(root, "legal_files", agreement)

if not os.path.isfile(moved):
    print("final_version copy missing", file=sys.stderr)
    sys.exit(1)
if not os.path.isfile(original):
    print("original agreement removed", file=sys.stderr)
    sys.exit(1)
with open(messages) as f:
    json.load(f)
print("verified")
sys.exit(0)
"#;

fn build_template(env_root: &Path) {
    let files = env_root.join("legal_document").join("legal_files");
    fs::create_dir_all(&files).unwrap();
    fs::write(files.join(AGREEMENT), "THIS AGREEMENT is made...").unwrap();
    fs::write(files.join("notes.md"), "draft notes").unwrap();
}

fn build_task(task_root: &Path) -> Task {
    let dir = task_root
        .join("filesystem")
        .join("legal_document")
        .join("file_reorganize");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("description.md"),
        "Create legal_files/final_version/ and place a copy of the agreement there.",
    )
    .unwrap();
    fs::write(dir.join("verify.py"), VERIFY_SCRIPT).unwrap();
    Task::new(
        ServiceKind::Filesystem,
        "legal_document",
        "file_reorganize",
        dir.join("description.md"),
        dir.join("verify.py"),
    )
}

fn agent_outcome() -> AgentOutcome {
    AgentOutcome {
        success: true,
        transcript: vec![
            TranscriptMessage::user("Create legal_files/final_version/..."),
            TranscriptMessage::tool_call(
                "call_1",
                "create_directory",
                r#"{"path":"legal_files/final_version"}"#,
            ),
            TranscriptMessage::tool_result("call_1", "created"),
            TranscriptMessage::assistant("Done."),
        ],
        token_usage: TokenUsage {
            input_tokens: 900,
            output_tokens: 80,
            total_tokens: 980,
            reasoning_tokens: 0,
        },
        turn_count: 2,
        execution_time: 2.5,
        error: None,
        actual_model: Some("gpt-4o-2024-08-06".into()),
    }
}

#[tokio::test]
async fn filesystem_task_round_trip() {
    let workspace = tempfile::tempdir().unwrap();
    let env_root = workspace.path().join("test_environments");
    build_template(&env_root);
    let mut task = build_task(&workspace.path().join("tasks"));

    let mut manager = FilesystemStateManager::new(&env_root);
    manager.initialize().await.unwrap();

    // Stage 1: setup materialises the working copy.
    assert!(manager.setup(&mut task).await);
    let working = task.test_directory.clone().unwrap();
    assert!(working.join("legal_files").join(AGREEMENT).exists());

    // Stage 2 stand-in: the "agent" performs the requested mutation on the
    // working copy only.
    let final_version = working.join("legal_files").join("final_version");
    fs::create_dir_all(&final_version).unwrap();
    fs::copy(
        working.join("legal_files").join(AGREEMENT),
        final_version.join(AGREEMENT),
    )
    .unwrap();

    let store = ResultStore::new(
        &workspace.path().join("results"),
        "gpt-4o",
        "default",
        "filesystem",
        "run-1",
    )
    .unwrap();
    let outcome = agent_outcome();
    store.write_messages(&task, &outcome.transcript).unwrap();

    // Stage 3: verify under the scoped environment.
    let result = {
        let vars = manager.verification_environment(&store.messages_path(&task));
        let _env = VerificationEnv::set(vars);
        execute_task(&task, &outcome).await
    };
    assert!(result.success, "verifier failed: {:?}", result.verification_error);
    assert_eq!(result.verification_output.as_deref(), Some("verified"));

    // The verification environment does not leak past the verify stage.
    assert!(std::env::var("FILESYSTEM_TEST_DIR").is_err());
    assert!(std::env::var("MCP_MESSAGES").is_err());

    // Stage 4: cleanup removes the working copy; the template survives.
    assert!(manager.cleanup(&task).await);
    assert!(!working.exists());
    assert!(env_root
        .join("legal_document")
        .join("legal_files")
        .join(AGREEMENT)
        .exists());

    // Persist and reload: the recorded verdict matches the verifier's.
    let config = ModelRunConfig {
        mcp_service: "filesystem".into(),
        model_name: "gpt-4o".into(),
        actual_model_name: outcome.actual_model.clone(),
        reasoning_effort: "default".into(),
        timeout_secs: 300,
    };
    let now = chrono::Local::now();
    store.write_meta(&task, &result, &config, now, now).unwrap();
    let loaded = store.load_meta(&task).unwrap();
    assert!(loaded.success);
    assert_eq!(loaded.token_usage.total_tokens, 980);
    assert_eq!(loaded.task_name, "legal_document/file_reorganize");
}
