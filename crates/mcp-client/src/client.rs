//! Unified MCP client over the stdio and HTTP transports.
//!
//! The two transports are explicit variants behind one logical interface:
//! `start`, `list_tools` (cached per session), `call_tool`, `stop`. The
//! agent loop owns the client for exactly one task execution; the tool cache
//! does not survive a restart.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use mark_domain::Result;

use crate::http::HttpTransport;
use crate::protocol::{self, ToolDescriptor};
use crate::stdio::{StdioTransport, DEFAULT_REQUEST_TIMEOUT};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How to reach an MCP tool server.
#[derive(Debug, Clone)]
pub enum McpServerSpec {
    /// Spawn a child process and speak JSON-RPC over its stdio.
    Stdio {
        name: String,
        command: String,
        args: Vec<String>,
        /// Extra environment merged over the parent's.
        env: HashMap<String, String>,
        request_timeout: Duration,
    },
    /// Connect to a hosted MCP endpoint.
    Http {
        name: String,
        url: String,
        headers: Vec<(String, String)>,
    },
}

impl McpServerSpec {
    pub fn stdio(name: &str, command: &str, args: Vec<String>) -> Self {
        McpServerSpec::Stdio {
            name: name.to_string(),
            command: command.to_string(),
            args,
            env: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        if let McpServerSpec::Stdio { env, .. } = &mut self {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            McpServerSpec::Stdio { name, .. } | McpServerSpec::Http { name, .. } => name,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

pub struct McpClient {
    transport: Transport,
    tools: Option<Vec<ToolDescriptor>>,
}

impl McpClient {
    /// Start a session: spawn the process and run the MCP handshake
    /// (`initialize` + `notifications/initialized`), or create the HTTP
    /// session. On failure everything spawned so far is torn down.
    pub async fn start(spec: &McpServerSpec) -> Result<Self> {
        let transport = match spec {
            McpServerSpec::Stdio {
                name,
                command,
                args,
                env,
                request_timeout,
            } => {
                let mut stdio = StdioTransport::spawn(name, command, args, env, *request_timeout)?;
                match Self::handshake(&mut stdio).await {
                    Ok(()) => Transport::Stdio(stdio),
                    Err(e) => {
                        stdio.stop().await;
                        return Err(e);
                    }
                }
            }
            McpServerSpec::Http { name, url, headers } => {
                let mut http = HttpTransport::new(name, url, headers)?;
                http.start().await?;
                Transport::Http(http)
            }
        };

        tracing::debug!(server = %spec.name(), "MCP session started");
        Ok(Self {
            transport,
            tools: None,
        })
    }

    async fn handshake(stdio: &mut StdioTransport) -> Result<()> {
        stdio
            .request("initialize", Some(protocol::initialize_params()))
            .await?;
        stdio.notify("notifications/initialized").await
    }

    /// List the server's tools. The first call hits the server; the result
    /// is cached for the rest of the session.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        if let Some(tools) = &self.tools {
            return Ok(tools.clone());
        }
        let tools = match &mut self.transport {
            Transport::Stdio(stdio) => {
                let result = stdio
                    .request("tools/list", Some(serde_json::json!({})))
                    .await?;
                serde_json::from_value::<protocol::ToolsListResult>(result)
                    .map_err(|e| {
                        mark_domain::Error::McpProtocol(format!("malformed tools/list result: {e}"))
                    })?
                    .tools
            }
            Transport::Http(http) => http.list_tools().await?,
        };
        tracing::debug!(tool_count = tools.len(), "discovered MCP tools");
        self.tools = Some(tools.clone());
        Ok(tools)
    }

    /// Invoke a tool. Transport and protocol failures raise; a tool-level
    /// error payload comes back as an ordinary result value so the agent
    /// can observe and react.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Value> {
        match &mut self.transport {
            Transport::Stdio(stdio) => {
                let params = serde_json::json!({
                    "name": name,
                    "arguments": arguments,
                });
                stdio.request("tools/call", Some(params)).await
            }
            Transport::Http(http) => http.call_tool(name, arguments).await,
        }
    }

    pub fn is_alive(&self) -> bool {
        match &self.transport {
            Transport::Stdio(stdio) => stdio.is_alive(),
            Transport::Http(http) => http.is_alive(),
        }
    }

    /// End the session. Must run on every exit path of the agent loop.
    pub async fn stop(self) {
        match self.transport {
            Transport::Stdio(stdio) => stdio.stop().await,
            Transport::Http(mut http) => http.stop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A shell script that answers initialize, tools/list and tools/call in
    /// order, standing in for a real MCP server binary.
    const FAKE_SERVER: &str = r#"
read init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'
read initialized
read list
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo back","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}}'
read call
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hello"}]}}'
read call2
printf '%s\n' '{"jsonrpc":"2.0","id":4,"result":{"content":[{"type":"text","text":"hello again"}]}}'
"#;

    fn fake_spec() -> McpServerSpec {
        McpServerSpec::stdio("fake", "sh", vec!["-c".into(), FAKE_SERVER.into()])
    }

    #[tokio::test]
    async fn full_session_lifecycle() {
        let mut client = McpClient::start(&fake_spec()).await.unwrap();

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = client
            .call_tool("echo", serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(protocol::tool_result_text(&result), "hello");

        client.stop().await;
    }

    #[tokio::test]
    async fn tool_list_is_cached() {
        let mut client = McpClient::start(&fake_spec()).await.unwrap();
        let first = client.list_tools().await.unwrap();
        // The fake server only answers tools/list once; a second call must
        // come from the cache.
        let second = client.list_tools().await.unwrap();
        assert_eq!(first, second);
        // The cache survives across tool calls.
        client
            .call_tool("echo", serde_json::json!({"text": "x"}))
            .await
            .unwrap();
        let third = client.list_tools().await.unwrap();
        assert_eq!(first, third);
        client.stop().await;
    }

    #[tokio::test]
    async fn failed_handshake_reaps_process() {
        let spec = McpServerSpec::stdio("broken", "sh", vec!["-c".into(), "read x; exit 1".into()]);
        assert!(McpClient::start(&spec).await.is_err());
    }

    #[test]
    fn spec_env_builder() {
        let spec = McpServerSpec::stdio("pg", "pipx", vec!["run".into(), "postgres-mcp".into()])
            .with_env("DATABASE_URI", "postgresql://u:p@localhost:5432/db");
        match spec {
            McpServerSpec::Stdio { env, .. } => {
                assert_eq!(env["DATABASE_URI"], "postgresql://u:p@localhost:5432/db");
            }
            _ => unreachable!(),
        }
    }
}
