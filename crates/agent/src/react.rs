//! ReAct loop.
//!
//! The model is instructed to reply with strict JSON: either
//! `{thought, action: {tool, arguments}}` or `{thought, answer}`. Tool
//! observations come back as user messages; malformed replies earn a
//! correction message, and three malformed replies in a row end the task.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use mark_domain::{AgentOutcome, Error, Result, ServiceConfig, TokenUsage, TranscriptMessage};
use mark_mcp_client::{tool_result_text, McpClient, ToolDescriptor};
use mark_providers::{ChatMessage, ChatRequest, LlmClient};

use crate::config::AgentConfig;
use crate::factory::mcp_server_spec;
use crate::logfile::ExecutionLog;

/// Per-tool-call deadline inside the loop.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Malformed replies tolerated in a row before giving up on the model.
const MAX_CONSECUTIVE_PARSE_FAILURES: u32 = 3;

const SYSTEM_PROMPT: &str = "You are a careful ReAct (reasoning and acting) agent. \
At each step you must decide whether to call a tool or provide a final response. \
Only use the tools that are listed for you. When you finish, respond with either the final answer \
or the phrase \"Task completed.\" if no further detail is required. \
Every reply must be valid JSON without code fences.";

const FORMAT_CORRECTION: &str = "The previous response was not valid JSON following the required \
schema. Please respond again using the JSON formats provided.";

const SHAPE_CORRECTION: &str = "The previous reply did not include an action, result, or answer. \
Please respond again using the JSON formats provided.";

const INVALID_FORMAT_ERROR: &str = "Model produced an invalid response format.";

pub(crate) async fn run(
    llm: &LlmClient,
    config: &AgentConfig,
    service_config: &ServiceConfig,
    instruction: &str,
    log_path: &Path,
) -> Result<AgentOutcome> {
    let spec = mcp_server_spec(config.service, service_config)?;
    let mut client = McpClient::start(&spec).await?;
    let outcome = drive_loop(llm, config, &mut client, instruction, log_path).await;
    client.stop().await;
    outcome
}

async fn drive_loop(
    llm: &LlmClient,
    config: &AgentConfig,
    client: &mut McpClient,
    instruction: &str,
    log_path: &Path,
) -> Result<AgentOutcome> {
    let mut log = ExecutionLog::open(log_path);
    let deadline = tokio::time::Instant::now() + config.timeout;

    let tools = client.list_tools().await?;
    let tool_names: HashMap<&str, &ToolDescriptor> =
        tools.iter().map(|t| (t.name.as_str(), t)).collect();

    let task_prompt = build_task_prompt(instruction, &render_tools(&tools));
    let mut wire = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(&task_prompt),
    ];
    let mut transcript = vec![
        TranscriptMessage::system(SYSTEM_PROMPT),
        TranscriptMessage::user(&task_prompt),
    ];

    let mut usage = TokenUsage::default();
    let mut turn_count = 0u32;
    let mut actual_model: Option<String> = None;
    let mut success = false;
    let mut final_error: Option<String> = None;
    let mut consecutive_parse_failures = 0u32;

    for step in 1..=config.max_iterations {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            final_error = Some(Error::AgentTimeout(config.timeout.as_secs()).to_string());
            break;
        }

        let call_timeout = config.llm_call_timeout().min(deadline - now);
        let request = ChatRequest {
            messages: wire.clone(),
            reasoning_effort: config.reasoning_effort.clone(),
            ..Default::default()
        };

        let response = match tokio::time::timeout(call_timeout, llm.complete(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                final_error = Some(format!("LLM call failed on step {step}: {e}"));
                tracing::error!(step, error = %e, "LLM call failed");
                break;
            }
            Err(_) => {
                final_error = Some(format!("LLM call timed out on step {step}"));
                tracing::error!(step, "LLM call timed out");
                break;
            }
        };

        if turn_count == 0 {
            // Strip any provider prefix from the reported id.
            actual_model = Some(
                response
                    .model
                    .rsplit('/')
                    .next()
                    .unwrap_or(&response.model)
                    .to_string(),
            );
        }
        usage.accumulate(&response.usage);

        let assistant_text = response.content.clone().unwrap_or_default();
        wire.push(ChatMessage::assistant(&assistant_text));
        transcript.push(TranscriptMessage::assistant(&assistant_text));
        turn_count += 1;

        let parsed = parse_react_reply(&assistant_text);
        let Some(parsed) = parsed.filter(|p| p.get("thought").is_some()) else {
            consecutive_parse_failures += 1;
            final_error = Some(INVALID_FORMAT_ERROR.to_string());
            if consecutive_parse_failures >= MAX_CONSECUTIVE_PARSE_FAILURES {
                tracing::error!("model kept producing malformed replies, giving up");
                break;
            }
            wire.push(ChatMessage::user(FORMAT_CORRECTION));
            transcript.push(TranscriptMessage::user(FORMAT_CORRECTION));
            continue;
        };
        consecutive_parse_failures = 0;
        final_error = None;

        let thought = parsed
            .get("thought")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        log.line(&format!("| Thought: {thought}"));
        tracing::info!(step, thought, "react step");

        if parsed.get("answer").is_some() {
            success = true;
            break;
        }

        if let Some(action) = parsed.get("action").and_then(|v| v.as_object()) {
            let tool = action.get("tool").and_then(|v| v.as_str()).unwrap_or("");
            let arguments = action.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));

            let observation = if !tool_names.contains_key(tool) {
                let mut known: Vec<&str> = tool_names.keys().copied().collect();
                known.sort_unstable();
                format!("Invalid tool '{tool}'. Available tools: {}", known.join(", "))
            } else {
                log.tool_call(tool, &arguments.to_string());
                match tokio::time::timeout(
                    TOOL_CALL_TIMEOUT,
                    client.call_tool(tool, arguments.clone()),
                )
                .await
                {
                    Ok(Ok(result)) => tool_result_text(&result),
                    Ok(Err(e)) => format!("Tool '{tool}' failed: {e}"),
                    Err(_) => format!("Tool '{tool}' timed out"),
                }
            };

            let observation_message = format!(
                "Observation:\n{observation}\nPlease continue reasoning and reply using the required JSON format."
            );
            wire.push(ChatMessage::user(&observation_message));
            transcript.push(TranscriptMessage::user(&observation_message));
            continue;
        }

        if let Some(result) = parsed.get("result") {
            // The model narrated a result of its own; loop it back as an
            // observation and keep going.
            let text = match result {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let observation_message = format!(
                "Observation:\n{text}\nPlease continue reasoning and reply using the required JSON format."
            );
            wire.push(ChatMessage::user(&observation_message));
            transcript.push(TranscriptMessage::user(&observation_message));
            continue;
        }

        wire.push(ChatMessage::user(SHAPE_CORRECTION));
        transcript.push(TranscriptMessage::user(SHAPE_CORRECTION));
    }

    if !success && final_error.is_none() {
        final_error = Some(format!(
            "Max iterations ({}) reached without a final answer.",
            config.max_iterations
        ));
    }

    if usage.total_tokens > 0 {
        log.line(&format!(
            "| Token usage: Total: {} | Input: {} | Output: {}",
            usage.total_tokens, usage.input_tokens, usage.output_tokens
        ));
        log.line(&format!("| Turns: {turn_count}"));
    }

    Ok(AgentOutcome {
        success,
        transcript,
        token_usage: usage,
        turn_count,
        execution_time: 0.0,
        error: if success { None } else { final_error },
        actual_model,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt rendering and reply parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_task_prompt(instruction: &str, tools_description: &str) -> String {
    format!(
        "Task:\n{instruction}\n\n\
         Available MCP tools:\n{tools_description}\n\n\
         Respond using the JSON formats below.\n\n\
         If you need to use a tool:\n\
         {{\n  \"thought\": \"Reasoning for the next action\",\n  \"action\": {{\n    \"tool\": \"tool-name\",\n    \"arguments\": {{\n      \"parameter\": value\n    }}\n  }}\n}}\n\n\
         If you can provide the final answer:\n\
         {{\n  \"thought\": \"Reasoning that justifies the answer\",\n  \"answer\": \"Either the final solution or 'Task completed.' when no more detail is required\"\n}}\n\n\
         Remember: omitting the action object ends the task, so only do this when finished."
    )
}

/// Render the tool catalogue for the prompt: name, description, and each
/// parameter with a `(required)` marker.
fn render_tools(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "(no tools available)".to_string();
    }
    tools
        .iter()
        .map(|tool| {
            let properties = tool
                .input_schema
                .get("properties")
                .and_then(|v| v.as_object());
            let required: Vec<&str> = tool
                .input_schema
                .get("required")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();

            let arguments = match properties {
                Some(props) if !props.is_empty() => props
                    .iter()
                    .map(|(name, details)| {
                        let marker = if required.contains(&name.as_str()) {
                            " (required)"
                        } else {
                            ""
                        };
                        format!(
                            "- {name}{marker}: {}",
                            serde_json::to_string_pretty(details).unwrap_or_default()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => "(no arguments)".to_string(),
            };

            let description = if tool.description.is_empty() {
                "No description provided."
            } else {
                &tool.description
            };
            format!(
                "Tool: {}\nDescription: {}\nArguments:\n{arguments}",
                tool.name, description
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse an assistant reply as a ReAct JSON object. Code fences and a
/// leading `json` language tag are tolerated and stripped.
fn parse_react_reply(payload: &str) -> Option<Value> {
    let mut candidate = payload.trim().trim_matches('`').trim();
    if let Some(prefix) = candidate.get(..4) {
        if prefix.eq_ignore_ascii_case("json") {
            candidate = candidate[4..].trim_start();
        }
    }
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_action_reply() {
        let reply = r#"{"thought": "list the files", "action": {"tool": "list_directory", "arguments": {"path": "."}}}"#;
        let parsed = parse_react_reply(reply).unwrap();
        assert_eq!(parsed["action"]["tool"], "list_directory");
    }

    #[test]
    fn strips_code_fences_and_json_tag() {
        let reply = "```json\n{\"thought\": \"done\", \"answer\": \"Task completed.\"}\n```";
        let parsed = parse_react_reply(reply).unwrap();
        assert_eq!(parsed["answer"], "Task completed.");
    }

    #[test]
    fn prose_reply_fails_to_parse() {
        assert!(parse_react_reply("Here is my plan: first I will look around.").is_none());
        assert!(parse_react_reply("42").is_none());
    }

    #[test]
    fn task_prompt_embeds_instruction_and_tools() {
        let prompt = build_task_prompt("Move the file.", "Tool: move_file\n...");
        assert!(prompt.starts_with("Task:\nMove the file."));
        assert!(prompt.contains("Available MCP tools:\nTool: move_file"));
        assert!(prompt.contains("\"thought\""));
        assert!(prompt.contains("omitting the action object ends the task"));
    }

    #[test]
    fn tool_rendering_marks_required_params() {
        let tools = vec![ToolDescriptor {
            name: "write_file".into(),
            description: "Write a file".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path"]
            }),
        }];
        let rendered = render_tools(&tools);
        assert!(rendered.contains("Tool: write_file"));
        assert!(rendered.contains("- path (required):"));
        assert!(rendered.contains("- content:"));
    }

    #[test]
    fn empty_catalogue_renders_placeholder() {
        assert_eq!(render_tools(&[]), "(no tools available)");
    }
}
