//! Provider-agnostic request and response types for chat completions.

use serde_json::Value;

use mark_domain::TokenUsage;

/// A tool definition rendered into the provider's function-tool schema.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// A tool call emitted by the model. `arguments` is the JSON-encoded
/// argument object exactly as produced; parsing is the caller's problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One conversation message in provider wire shape.
#[derive(Debug, Clone)]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolInvocation>,
    },
    /// A tool result, keyed to the assistant tool call it answers.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    /// `"auto"` when tools are offered; `None` omits the field.
    pub tool_choice: Option<String>,
    /// Reasoning effort level; `None` means the provider default.
    pub reasoning_effort: Option<String>,
    /// Extra request headers (Anthropic beta flags).
    pub extra_headers: Vec<(String, String)>,
    /// Extra top-level body fields merged into the request (Anthropic
    /// native MCP passes `mcp_servers` this way).
    pub extra_body: Option<Value>,
}

/// A chat completion response, reduced to what the agent loops consume.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: TokenUsage,
    /// The model id the provider reports having actually served.
    pub model: String,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
