//! Verifier execution.
//!
//! Verification scripts are opaque Python executables. They inherit the
//! environment the state manager exported (`MCP_MESSAGES` and service
//! credentials), run under a hard wall clock, and signal the verdict with
//! their exit code. Stdout and stderr are captured either way.

use std::time::Duration;

use mark_domain::{AgentOutcome, ServiceKind, Task, TaskResult};

/// Wall-clock limit for one verifier run.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(300);

/// Captured result of one verifier invocation.
#[derive(Debug, Clone)]
pub struct VerifierOutcome {
    pub success: bool,
    /// Captured stdout.
    pub output: Option<String>,
    /// Captured stderr, or `"timeout"` when the wall clock expired.
    pub error: Option<String>,
}

/// Service-specific extra argv for the verifier. Notion verifiers receive
/// the duplicated page id as their first argument.
fn verifier_args(task: &Task) -> Vec<String> {
    match task.service {
        ServiceKind::Notion => vec![task.initial_state_id().unwrap_or("").to_string()],
        _ => Vec::new(),
    }
}

/// Run `python verify.py [extra_args...]` for the task.
pub async fn run_verifier(task: &Task) -> VerifierOutcome {
    let mut cmd = tokio::process::Command::new("python");
    cmd.arg(&task.verification_path)
        .args(verifier_args(task))
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(
        task = %task.name(),
        script = %task.verification_path.display(),
        "running verifier"
    );

    match tokio::time::timeout(VERIFY_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let success = output.status.success();
            tracing::info!(task = %task.name(), success, "verifier finished");
            VerifierOutcome {
                success,
                output: (!stdout.is_empty()).then_some(stdout),
                error: (!stderr.is_empty()).then_some(stderr),
            }
        }
        Ok(Err(e)) => {
            tracing::error!(task = %task.name(), error = %e, "failed to spawn verifier");
            VerifierOutcome {
                success: false,
                output: None,
                error: Some(format!("failed to run verifier: {e}")),
            }
        }
        Err(_) => {
            tracing::error!(task = %task.name(), "verifier exceeded wall clock");
            VerifierOutcome {
                success: false,
                output: None,
                error: Some("timeout".to_string()),
            }
        }
    }
}

/// Combine the agent outcome and the verification verdict into the task's
/// recorded result.
///
/// An agent that failed outright (transport death, timeout, bad response
/// format) fails the task without running the verifier; state may be
/// arbitrary and the error is what matters for the retry policy.
pub async fn execute_task(task: &Task, agent: &AgentOutcome) -> TaskResult {
    // A Notion task whose duplication never produced a page cannot verify.
    if task.service == ServiceKind::Notion && task.initial_state_id().is_none() {
        return TaskResult {
            task_name: task.name(),
            success: false,
            error_message: Some("Duplication failed".into()),
            verification_error: None,
            verification_output: None,
            category_id: task.category_id.clone(),
            task_id: task.task_id.clone(),
            token_usage: agent.token_usage,
            turn_count: agent.turn_count,
            agent_execution_time: agent.execution_time,
            task_execution_time: 0.0,
        };
    }

    if !agent.success {
        return TaskResult {
            task_name: task.name(),
            success: false,
            error_message: agent
                .error
                .clone()
                .or_else(|| Some("agent execution failed".into())),
            verification_error: None,
            verification_output: None,
            category_id: task.category_id.clone(),
            task_id: task.task_id.clone(),
            token_usage: agent.token_usage,
            turn_count: agent.turn_count,
            agent_execution_time: agent.execution_time,
            task_execution_time: 0.0,
        };
    }

    let verdict = run_verifier(task).await;
    TaskResult {
        task_name: task.name(),
        success: verdict.success,
        error_message: None,
        verification_error: verdict.error,
        verification_output: verdict.output,
        category_id: task.category_id.clone(),
        task_id: task.task_id.clone(),
        token_usage: agent.token_usage,
        turn_count: agent.turn_count,
        agent_execution_time: agent.execution_time,
        task_execution_time: 0.0,
    }
}
