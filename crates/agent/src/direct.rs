//! Direct tool-calling loop.
//!
//! Renders the MCP tool catalogue into the provider's function-tool schema
//! and alternates completions with tool dispatch until the model stops
//! calling tools or the turn budget runs out. Anthropic models talking to
//! an HTTP MCP service skip the loop entirely: the provider drives the
//! tools itself in a single request.

use std::path::Path;

use serde_json::Value;

use mark_domain::{
    AgentOutcome, Error, Result, ServiceConfig, ServiceKind, TokenUsage, TranscriptMessage,
};
use mark_mcp_client::{McpClient, ToolDescriptor};
use mark_providers::{ChatMessage, ChatRequest, LlmClient, ToolDefinition};

use crate::config::AgentConfig;
use crate::factory::{anthropic_mcp_extra_body, mcp_server_spec};
use crate::logfile::ExecutionLog;

/// Arguments are clipped to this many characters in terminal-facing lines;
/// the log file always receives the full string.
const ARGS_DISPLAY_LIMIT: usize = 140;

pub(crate) async fn run(
    llm: &LlmClient,
    config: &AgentConfig,
    service_config: &ServiceConfig,
    instruction: &str,
    log_path: &Path,
) -> Result<AgentOutcome> {
    if llm.model_spec().is_anthropic() && config.service == ServiceKind::Github {
        return run_anthropic_native(llm, config, service_config, instruction, log_path).await;
    }

    let spec = mcp_server_spec(config.service, service_config)?;
    let mut client = McpClient::start(&spec).await?;
    let outcome = drive_loop(llm, config, &mut client, instruction, log_path).await;
    // The session must end on every exit path, success or not.
    client.stop().await;
    outcome
}

fn to_tool_definitions(tools: &[ToolDescriptor]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| ToolDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        })
        .collect()
}

fn clip(text: &str) -> String {
    if text.chars().count() > ARGS_DISPLAY_LIMIT {
        let clipped: String = text.chars().take(ARGS_DISPLAY_LIMIT).collect();
        format!("{clipped}...")
    } else {
        text.to_string()
    }
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

    let tools = to_tool_definitions(&client.list_tools().await?);

    let mut wire: Vec<ChatMessage> = vec![ChatMessage::user(instruction)];
    let mut transcript = vec![TranscriptMessage::user(instruction)];
    let mut usage = TokenUsage::default();
    let mut turn_count = 0u32;
    let mut actual_model: Option<String> = None;
    let mut completed = false;
    let mut error: Option<String> = None;

    'turns: while turn_count < config.max_turns {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            error = Some(Error::AgentTimeout(config.timeout.as_secs()).to_string());
            break;
        }
        turn_count += 1;

        let call_timeout = config.llm_call_timeout().min(deadline - now);
        let request = ChatRequest {
            messages: wire.clone(),
            tools: tools.clone(),
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
            reasoning_effort: config.reasoning_effort.clone(),
            ..Default::default()
        };

        let response = match tokio::time::timeout(call_timeout, llm.complete(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(turn = turn_count, error = %e, "LLM call failed");
                error = Some(e.to_string());
                break;
            }
            Err(_) => {
                error = Some(Error::AgentTimeout(config.timeout.as_secs()).to_string());
                break;
            }
        };

        if turn_count == 1 {
            actual_model = Some(response.model.clone());
        }
        usage.accumulate(&response.usage);

        if let Some(content) = &response.content {
            log.block(content);
            transcript.push(TranscriptMessage::assistant(content));
        }
        for call in &response.tool_calls {
            transcript.push(TranscriptMessage::tool_call(
                &call.id,
                &call.name,
                &call.arguments,
            ));
        }
        wire.push(ChatMessage::Assistant {
            content: response.content.clone(),
            tool_calls: response.tool_calls.clone(),
        });

        if response.tool_calls.is_empty() {
            completed = true;
            break;
        }

        for call in &response.tool_calls {
            if tokio::time::Instant::now() >= deadline {
                error = Some(Error::AgentTimeout(config.timeout.as_secs()).to_string());
                break 'turns;
            }

            tracing::info!(tool = %call.name, args = %clip(&call.arguments), "tool call");
            log.tool_call(&call.name, &call.arguments);

            let result_text = match serde_json::from_str::<Value>(&call.arguments) {
                Err(e) => format!("Error: invalid tool arguments: {e}"),
                Ok(args) => match client.call_tool(&call.name, args).await {
                    Ok(result) => serde_json::to_string(&result).unwrap_or_default(),
                    // A server-side tool failure is an observation the model
                    // can react to; a dead transport ends the execution.
                    Err(e @ Error::McpProtocol(_)) => format!("Error: {e}"),
                    Err(e) => {
                        let text = format!("Error: {e}");
                        transcript.push(TranscriptMessage::tool_result(&call.id, &text));
                        wire.push(ChatMessage::tool(&call.id, &text));
                        error = Some(e.to_string());
                        break 'turns;
                    }
                },
            };

            transcript.push(TranscriptMessage::tool_result(&call.id, &result_text));
            wire.push(ChatMessage::tool(&call.id, &result_text));
        }
    }

    if !completed && error.is_none() {
        error = Some(format!(
            "Max turns ({}) reached without completion.",
            config.max_turns
        ));
    }

    log_usage_summary(&mut log, &usage, turn_count);

    Ok(AgentOutcome {
        success: completed && error.is_none(),
        transcript,
        token_usage: usage,
        turn_count,
        execution_time: 0.0,
        error,
        actual_model,
    })
}

/// Anthropic native MCP: the provider connects to the HTTP MCP server and
/// drives the tools itself, so the whole task is one completion.
async fn run_anthropic_native(
    llm: &LlmClient,
    config: &AgentConfig,
    service_config: &ServiceConfig,
    instruction: &str,
    log_path: &Path,
) -> Result<AgentOutcome> {
    let mut log = ExecutionLog::open(log_path);
    tracing::debug!("using Anthropic native MCP execution");

    let request = ChatRequest {
        messages: vec![ChatMessage::user(instruction)],
        reasoning_effort: config.reasoning_effort.clone(),
        extra_headers: vec![
            ("anthropic-version".into(), "2023-06-01".into()),
            ("anthropic-beta".into(), "mcp-client-2025-04-04".into()),
        ],
        extra_body: Some(anthropic_mcp_extra_body(config.service, service_config)?),
        ..Default::default()
    };

    let response = tokio::time::timeout(config.timeout, llm.complete(&request))
        .await
        .map_err(|_| Error::AgentTimeout(config.timeout.as_secs()))??;

    let mut transcript = vec![TranscriptMessage::user(instruction)];
    if let Some(content) = &response.content {
        log.block(content);
        transcript.push(TranscriptMessage::assistant(content));
    }
    log_usage_summary(&mut log, &response.usage, 1);

    Ok(AgentOutcome {
        success: true,
        transcript,
        token_usage: response.usage,
        turn_count: 1,
        execution_time: 0.0,
        error: None,
        actual_model: Some(response.model),
    })
}

fn log_usage_summary(log: &mut ExecutionLog, usage: &TokenUsage, turns: u32) {
    if usage.is_empty() {
        return;
    }
    let mut line = format!(
        "|\n| Token usage: Total: {} | Input: {} | Output: {}",
        usage.total_tokens, usage.input_tokens, usage.output_tokens
    );
    if usage.reasoning_tokens > 0 {
        line.push_str(&format!(" | Reasoning: {}", usage.reasoning_tokens));
    }
    for part in line.split('\n') {
        log.line(part);
    }
    log.line(&format!("| Turns: {turns}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_truncates_long_arguments() {
        let short = r#"{"path":"a.txt"}"#;
        assert_eq!(clip(short), short);

        let long = "x".repeat(200);
        let clipped = clip(&long);
        assert!(clipped.ends_with("..."));
        assert_eq!(clipped.chars().count(), ARGS_DISPLAY_LIMIT + 3);
    }

    #[test]
    fn tool_definitions_keep_schema() {
        let descriptors = vec![ToolDescriptor {
            name: "query".into(),
            description: "Run SQL".into(),
            input_schema: serde_json::json!({"type":"object","properties":{"sql":{"type":"string"}}}),
        }];
        let defs = to_tool_definitions(&descriptors);
        assert_eq!(defs[0].name, "query");
        assert_eq!(defs[0].parameters["properties"]["sql"]["type"], "string");
    }
}
