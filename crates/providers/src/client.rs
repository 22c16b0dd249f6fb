//! OpenAI-compatible chat completions client.
//!
//! One adapter covers every provider in the catalog: they all speak the
//! chat-completions wire format (Anthropic included, via its OpenAI
//! compatibility surface). Provider-specific extras ride along as extra
//! headers and extra body fields.

use std::time::Duration;

use serde_json::Value;

use mark_domain::{Error, Result, TokenUsage};

use crate::catalog::ModelSpec;
use crate::types::{ChatMessage, ChatRequest, ChatResponse, ToolDefinition, ToolInvocation};

/// Whole-request ceiling; individual calls are usually bounded tighter by
/// the caller.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub struct LlmClient {
    spec: ModelSpec,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(spec: ModelSpec) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { spec, client })
    }

    pub fn model_spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Send one chat completion and wait for the full response.
    pub async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.spec.base_url);
        let body = self.build_body(req);

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.spec.api_key)
            .header("Content-Type", "application/json");
        for (name, value) in &req.extra_headers {
            builder = builder.header(name, value);
        }

        tracing::debug!(model = %self.spec.canonical_id, url = %url, "sending chat completion");

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(self.status_error(status, &text));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| Error::Provider {
            provider: self.spec.provider.clone(),
            message: format!("invalid completion body: {e}"),
        })?;
        self.parse_response(&parsed)
    }

    // ── Request building ──────────────────────────────────────────

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.spec.canonical_id,
            "messages": messages,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
            if let Some(choice) = &req.tool_choice {
                body["tool_choice"] = Value::String(choice.clone());
            }
        }
        if let Some(effort) = &req.reasoning_effort {
            body["reasoning_effort"] = Value::String(effort.clone());
        }
        if let Some(Value::Object(extra)) = &req.extra_body {
            for (key, value) in extra {
                body[key] = value.clone();
            }
        }
        body
    }

    // ── Response parsing ──────────────────────────────────────────

    fn parse_response(&self, body: &Value) -> Result<ChatResponse> {
        let message = body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| Error::Provider {
                provider: self.spec.provider.clone(),
                message: "no choices in response".into(),
            })?;

        let content = message
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);

        let tool_calls = message
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
            .unwrap_or_default();

        let usage = body.get("usage").map(parse_usage).unwrap_or_default();

        let model = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.spec.canonical_id)
            .to_string();

        Ok(ChatResponse {
            content,
            tool_calls,
            usage,
            model,
        })
    }

    // ── Error mapping ─────────────────────────────────────────────

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Provider {
                provider: self.spec.provider.clone(),
                message: "network error: request timed out".into(),
            }
        } else {
            Error::Provider {
                provider: self.spec.provider.clone(),
                message: format!("network error: {e}"),
            }
        }
    }

    fn status_error(&self, status: reqwest::StatusCode, body: &str) -> Error {
        let lowered = body.to_lowercase();
        match status.as_u16() {
            429 if lowered.contains("quota") || lowered.contains("billing") => {
                Error::QuotaExceeded(self.spec.canonical_id.clone())
            }
            429 => Error::RateLimited(self.spec.canonical_id.clone()),
            400 if lowered.contains("context_length") || lowered.contains("context window") => {
                Error::ContextWindowExceeded(self.spec.canonical_id.clone())
            }
            402 => Error::QuotaExceeded(self.spec.canonical_id.clone()),
            500..=599 => Error::Provider {
                provider: self.spec.provider.clone(),
                message: format!("internal server error ({status}): {}", truncate(body, 300)),
            },
            _ => Error::Provider {
                provider: self.spec.provider.clone(),
                message: format!("HTTP {status}: {}", truncate(body, 300)),
            },
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_wire(msg: &ChatMessage) -> Value {
    match msg {
        ChatMessage::System { content } => serde_json::json!({
            "role": "system",
            "content": content,
        }),
        ChatMessage::User { content } => serde_json::json!({
            "role": "user",
            "content": content,
        }),
        ChatMessage::Assistant { content, tool_calls } => {
            let mut obj = serde_json::json!({ "role": "assistant" });
            obj["content"] = match content {
                Some(text) => Value::String(text.clone()),
                None => Value::Null,
            };
            if !tool_calls.is_empty() {
                obj["tool_calls"] = Value::Array(
                    tool_calls
                        .iter()
                        .map(|call| {
                            serde_json::json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments,
                                }
                            })
                        })
                        .collect(),
                );
            }
            obj
        }
        ChatMessage::Tool {
            tool_call_id,
            content,
        } => serde_json::json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn parse_tool_call(value: &Value) -> Option<ToolInvocation> {
    let function = value.get("function")?;
    Some(ToolInvocation {
        id: value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        name: function.get("name")?.as_str()?.to_string(),
        arguments: function
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}")
            .to_string(),
    })
}

fn parse_usage(usage: &Value) -> TokenUsage {
    let field = |name: &str| usage.get(name).and_then(|v| v.as_u64()).unwrap_or(0);
    let input_tokens = field("prompt_tokens");
    let output_tokens = field("completion_tokens");
    let mut total_tokens = field("total_tokens");
    if total_tokens == 0 {
        total_tokens = input_tokens + output_tokens;
    }
    let reasoning_tokens = usage
        .get("completion_tokens_details")
        .and_then(|d| d.get("reasoning_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
        reasoning_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ModelSpec {
        ModelSpec {
            short_name: "gpt-4o".into(),
            provider: "openai".into(),
            canonical_id: "gpt-4o".into(),
            api_key: "sk-test".into(),
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    #[test]
    fn body_includes_tools_and_choice() {
        let client = LlmClient::new(spec()).unwrap();
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: vec![ToolDefinition {
                name: "read_file".into(),
                description: "Read a file".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            tool_choice: Some("auto".into()),
            ..Default::default()
        };
        let body = client.build_body(&req);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert_eq!(body["tool_choice"], "auto");
        assert!(body.get("reasoning_effort").is_none());
    }

    #[test]
    fn extra_body_is_merged() {
        let client = LlmClient::new(spec()).unwrap();
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            extra_body: Some(serde_json::json!({
                "mcp_servers": [{"type": "url", "url": "https://api.githubcopilot.com/mcp/"}]
            })),
            ..Default::default()
        };
        let body = client.build_body(&req);
        assert_eq!(body["mcp_servers"][0]["type"], "url");
    }

    #[test]
    fn assistant_with_tool_calls_round_trips() {
        let msg = ChatMessage::Assistant {
            content: None,
            tool_calls: vec![ToolInvocation {
                id: "call_1".into(),
                name: "query".into(),
                arguments: r#"{"sql":"select 1"}"#.into(),
            }],
        };
        let wire = message_to_wire(&msg);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "query");
    }

    #[test]
    fn parse_response_extracts_tool_calls_and_usage() {
        let client = LlmClient::new(spec()).unwrap();
        let body = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "list_directory", "arguments": "{\"path\":\".\"}"}
                    }]
                }
            }],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 30,
                "total_tokens": 150,
                "completion_tokens_details": {"reasoning_tokens": 12}
            }
        });
        let resp = client.parse_response(&body).unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls[0].name, "list_directory");
        assert_eq!(resp.usage.total_tokens, 150);
        assert_eq!(resp.usage.reasoning_tokens, 12);
        assert_eq!(resp.model, "gpt-4o-2024-08-06");
    }

    #[test]
    fn usage_total_falls_back_to_sum() {
        let usage = parse_usage(&serde_json::json!({
            "prompt_tokens": 10,
            "completion_tokens": 5
        }));
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn status_errors_classify() {
        let client = LlmClient::new(spec()).unwrap();
        let rate = client.status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(rate, Error::RateLimited(_)));
        assert!(rate.is_retryable());

        let quota = client.status_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"type":"insufficient_quota","message":"quota exceeded"}}"#,
        );
        assert!(matches!(quota, Error::QuotaExceeded(_)));
        assert!(!quota.is_retryable());

        let ctx = client.status_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"context_length_exceeded"}}"#,
        );
        assert!(matches!(ctx, Error::ContextWindowExceeded(_)));

        let server = client.status_error(reqwest::StatusCode::BAD_GATEWAY, "bad gateway");
        assert!(server.is_retryable());
    }
}
