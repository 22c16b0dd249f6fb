//! Task-supplied environment preparation scripts.
//!
//! Some tasks ship a `prepare_environment.py` next to their description.
//! The script sets up service state (tables, seed data) through the same
//! APIs the agent will use, and runs with the service credentials injected.

use std::path::Path;
use std::time::Duration;

use mark_domain::{Error, Result, Task};

/// Wall-clock limit for a preparation script.
const PREPARE_TIMEOUT: Duration = Duration::from_secs(300);

/// Run the task's `prepare_environment.py` when present.
///
/// Returns `Ok(false)` when the task ships no script, `Ok(true)` when the
/// script ran to completion, and an error when it failed or timed out
/// (which fails setup: the initial state would be incomplete).
pub async fn run_prepare_script(task: &Task, env: &[(String, String)]) -> Result<bool> {
    let task_dir = task
        .instruction_path
        .parent()
        .unwrap_or_else(|| Path::new("."));
    let script = match &task.prepare_script_path {
        Some(path) => path.clone(),
        None => {
            let default = task_dir.join("prepare_environment.py");
            if !default.exists() {
                tracing::debug!(task = %task.name(), "no prepare_environment.py for task");
                return Ok(false);
            }
            default
        }
    };

    tracing::info!(task = %task.name(), script = %script.display(), "running environment preparation");

    let mut cmd = tokio::process::Command::new("python");
    cmd.arg(&script)
        .current_dir(task_dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PREPARE_TIMEOUT, async {
        cmd.output().await
    })
    .await;

    match output {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.trim().is_empty() {
                tracing::debug!(task = %task.name(), output = %stdout.trim(), "prepare script output");
            }
            Ok(true)
        }
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::StateSetup {
                service: task.service.to_string(),
                message: format!(
                    "prepare_environment.py exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            })
        }
        Ok(Err(e)) => Err(Error::StateSetup {
            service: task.service.to_string(),
            message: format!("failed to run prepare_environment.py: {e}"),
        }),
        Err(_) => Err(Error::StateSetup {
            service: task.service.to_string(),
            message: "prepare_environment.py execution timed out".into(),
        }),
    }
}
