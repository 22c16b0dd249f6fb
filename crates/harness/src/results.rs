//! Result persistence.
//!
//! Layout per run, rooted at `<output>/<model_slug>__<service>/<exp_name>/`:
//! each task writes `<category>__<task>/{meta.json, messages.json,
//! execution.log}` and the run writes a top-level `summary.json`.
//!
//! `messages.json` uses the SDK-legacy record shape (`function_call` /
//! `function_call_output`); the conversion from the canonical transcript
//! happens only here, at the disk boundary.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde_json::Value;

use mark_domain::{Result, Task, TaskResult, TranscriptMessage};

/// Per-run model configuration recorded in every `meta.json`.
#[derive(Debug, Clone)]
pub struct ModelRunConfig {
    pub mcp_service: String,
    pub model_name: String,
    pub actual_model_name: Option<String>,
    pub reasoning_effort: String,
    pub timeout_secs: u64,
}

impl ModelRunConfig {
    fn to_json(&self) -> Value {
        serde_json::json!({
            "mcp_service": self.mcp_service,
            "model_name": self.model_name,
            "actual_model_name": self.actual_model_name,
            "reasoning_effort": self.reasoning_effort,
            "timeout": self.timeout_secs,
        })
    }
}

/// Slug used in the results directory name: dots become dashes, and a
/// non-default reasoning effort is appended.
pub fn model_slug(model_name: &str, reasoning_effort: &str) -> String {
    let base = model_name.replace('.', "-");
    if reasoning_effort == "default" {
        base
    } else {
        format!("{base}-{reasoning_effort}")
    }
}

pub struct ResultStore {
    base_dir: PathBuf,
}

impl ResultStore {
    /// Create the store rooted at
    /// `<output>/<model_slug>__<service>/<exp_name>/`.
    pub fn new(
        output_dir: &Path,
        model_name: &str,
        reasoning_effort: &str,
        service_dir_name: &str,
        exp_name: &str,
    ) -> Result<Self> {
        let base_dir = output_dir
            .join(format!("{}__{service_dir_name}", model_slug(model_name, reasoning_effort)))
            .join(exp_name);
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn task_dir(&self, task: &Task) -> PathBuf {
        self.base_dir.join(task.dir_name())
    }

    pub fn meta_path(&self, task: &Task) -> PathBuf {
        self.task_dir(task).join("meta.json")
    }

    pub fn messages_path(&self, task: &Task) -> PathBuf {
        self.task_dir(task).join("messages.json")
    }

    pub fn execution_log_path(&self, task: &Task) -> PathBuf {
        self.task_dir(task).join("execution.log")
    }

    /// Remove a task's artifact directory (used before a retry so fresh
    /// results fully replace the old ones).
    pub fn remove_task_dir(&self, task: &Task) -> Result<()> {
        let dir = self.task_dir(task);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    // ── messages.json ─────────────────────────────────────────────

    pub fn write_messages(&self, task: &Task, transcript: &[TranscriptMessage]) -> Result<()> {
        if !mark_domain::transcript::tool_calls_well_formed(transcript) {
            tracing::warn!(task = %task.name(), "transcript has unmatched tool results");
        }
        let dir = self.task_dir(task);
        std::fs::create_dir_all(&dir)?;
        let records = transcript_to_legacy(transcript);
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(self.messages_path(task), json)?;
        Ok(())
    }

    // ── meta.json ─────────────────────────────────────────────────

    pub fn write_meta(
        &self,
        task: &Task,
        result: &TaskResult,
        model_config: &ModelRunConfig,
        task_start: DateTime<Local>,
        task_end: DateTime<Local>,
    ) -> Result<()> {
        let dir = self.task_dir(task);
        std::fs::create_dir_all(&dir)?;

        let meta = serde_json::json!({
            "task_name": result.task_name,
            "category_id": result.category_id,
            "task_id": result.task_id,
            "execution_result": {
                "success": result.success,
                "error_message": result.error_message,
                "verification_error": result.verification_error,
                "verification_output": result.verification_output,
            },
            "token_usage": result.token_usage,
            "turn_count": result.turn_count,
            "agent_execution_time": result.agent_execution_time,
            "task_execution_time": result.task_execution_time,
            "actual_model_name": model_config.actual_model_name,
            "model_config": model_config.to_json(),
            "task_start_time": task_start.to_rfc3339(),
            "task_end_time": task_end.to_rfc3339(),
        });
        std::fs::write(self.meta_path(task), serde_json::to_string_pretty(&meta)?)?;
        Ok(())
    }

    /// Load a previously recorded result for this task, if any.
    pub fn load_meta(&self, task: &Task) -> Option<TaskResult> {
        let path = self.meta_path(task);
        let contents = std::fs::read_to_string(&path).ok()?;
        let meta: Value = serde_json::from_str(&contents)
            .map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "unparseable meta.json");
                e
            })
            .ok()?;
        parse_meta(&meta, &task.category_id, &task.task_id)
    }

    /// Scan every task directory for a `meta.json` and collect the results.
    pub fn load_all_results(&self) -> Vec<TaskResult> {
        let mut results = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.base_dir) else {
            return results;
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((category_id, task_id)) = name.split_once("__") else {
                continue;
            };
            let Ok(contents) = std::fs::read_to_string(dir.join("meta.json")) else {
                continue;
            };
            match serde_json::from_str::<Value>(&contents) {
                Ok(meta) => {
                    if let Some(result) = parse_meta(&meta, category_id, task_id) {
                        results.push(result);
                    }
                }
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "unparseable meta.json, skipping");
                }
            }
        }
        results
    }

    // ── summary.json ──────────────────────────────────────────────

    pub fn write_summary(&self, summary: &Value) -> Result<()> {
        let path = self.base_dir.join("summary.json");
        std::fs::write(&path, serde_json::to_string_pretty(summary)?)?;
        tracing::info!(path = %path.display(), "summary written");
        Ok(())
    }
}

fn parse_meta(meta: &Value, category_id: &str, task_id: &str) -> Option<TaskResult> {
    let execution = meta.get("execution_result")?;
    let opt_str = |v: &Value, key: &str| v.get(key).and_then(|x| x.as_str()).map(String::from);
    Some(TaskResult {
        task_name: meta
            .get("task_name")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("{category_id}/{task_id}")),
        success: execution.get("success").and_then(|v| v.as_bool())?,
        error_message: opt_str(execution, "error_message"),
        verification_error: opt_str(execution, "verification_error"),
        verification_output: opt_str(execution, "verification_output"),
        category_id: category_id.to_string(),
        task_id: task_id.to_string(),
        token_usage: meta
            .get("token_usage")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
        turn_count: meta.get("turn_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        agent_execution_time: meta
            .get("agent_execution_time")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
        task_execution_time: meta
            .get("task_execution_time")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Legacy transcript shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert the canonical transcript to the persisted record shape.
fn transcript_to_legacy(messages: &[TranscriptMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            TranscriptMessage::SystemText { text } => serde_json::json!({
                "content": text,
                "role": "system",
            }),
            TranscriptMessage::UserText { text } => serde_json::json!({
                "content": text,
                "role": "user",
            }),
            TranscriptMessage::AssistantText { text } => serde_json::json!({
                "id": "__fake_id__",
                "content": [{
                    "annotations": [],
                    "text": text,
                    "type": "output_text",
                }],
                "role": "assistant",
                "status": "completed",
                "type": "message",
            }),
            TranscriptMessage::AssistantToolCall {
                call_id,
                name,
                arguments,
            } => serde_json::json!({
                "arguments": arguments,
                "call_id": call_id,
                "name": name,
                "type": "function_call",
                "id": "__fake_id__",
            }),
            TranscriptMessage::ToolResult { call_id, text } => serde_json::json!({
                "call_id": call_id,
                "output": serde_json::json!({
                    "type": "text",
                    "text": text,
                    "annotations": null,
                    "meta": null,
                })
                .to_string(),
                "type": "function_call_output",
            }),
        })
        .collect()
}
