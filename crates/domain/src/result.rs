//! Per-task evaluation outcome.

use serde::{Deserialize, Serialize};

use crate::usage::TokenUsage;

/// The recorded outcome of one (task × model × run) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Verifier stderr (captured regardless of outcome).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
    /// Verifier stdout (captured regardless of outcome).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_output: Option<String>,
    pub category_id: String,
    pub task_id: String,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub turn_count: u32,
    /// Seconds spent inside the agent loop.
    #[serde(default)]
    pub agent_execution_time: f64,
    /// Seconds for the whole task (setup through cleanup).
    #[serde(default)]
    pub task_execution_time: f64,
}

impl TaskResult {
    /// A result for a task whose state could not be materialised. The agent
    /// never ran, so agent time is zero and the error is retryable.
    pub fn setup_failure(
        task_name: impl Into<String>,
        category_id: impl Into<String>,
        task_id: impl Into<String>,
        task_execution_time: f64,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            success: false,
            error_message: Some("State Duplication Error".into()),
            verification_error: None,
            verification_output: None,
            category_id: category_id.into(),
            task_id: task_id.into(),
            token_usage: TokenUsage::default(),
            turn_count: 0,
            agent_execution_time: 0.0,
            task_execution_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_retryable_message;

    #[test]
    fn setup_failure_is_retryable() {
        let r = TaskResult::setup_failure("cat/task", "cat", "task", 1.5);
        assert!(!r.success);
        assert_eq!(r.agent_execution_time, 0.0);
        assert!(is_retryable_message(r.error_message.as_deref().unwrap()));
    }

    #[test]
    fn optional_fields_omitted_when_none() {
        let r = TaskResult {
            task_name: "c/t".into(),
            success: true,
            error_message: None,
            verification_error: None,
            verification_output: Some("ok".into()),
            category_id: "c".into(),
            task_id: "t".into(),
            token_usage: TokenUsage::default(),
            turn_count: 2,
            agent_execution_time: 3.2,
            task_execution_time: 7.8,
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("error_message"));
        assert!(json.contains("verification_output"));
    }
}
