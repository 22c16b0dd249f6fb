//! HTTP transport: an MCP server fronted by a plain REST surface.
//!
//! Session establishment is `POST /sessions`, the tool catalogue lives at
//! `GET /tools`, and invocations go through `POST /tools/call`. All requests
//! share a default header set (typically a bearer token).

use std::time::Duration;

use serde_json::Value;

use mark_domain::{Error, Result};

use crate::protocol::ToolDescriptor;

/// Whole-request timeout for the HTTP session.
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct HttpTransport {
    name: String,
    base_url: String,
    client: reqwest::Client,
    session_id: Option<String>,
}

impl HttpTransport {
    pub fn new(name: &str, url: &str, headers: &[(String, String)]) -> Result<Self> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        for (key, value) in headers {
            let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::Config(format!("invalid MCP header name '{key}': {e}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid MCP header value for '{key}': {e}")))?;
            default_headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .timeout(SESSION_TIMEOUT)
            .default_headers(default_headers)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            base_url: url.trim_end_matches('/').to_string(),
            client,
            session_id: None,
        })
    }

    /// Establish the MCP session. Falls back to the locally generated id
    /// when the server does not return one.
    pub async fn start(&mut self) -> Result<()> {
        let local_id = uuid::Uuid::new_v4().to_string();
        let payload = serde_json::json!({
            "id": local_id,
            "capabilities": { "tools": {} },
        });

        let body = self
            .post_json(&format!("{}/sessions", self.base_url), &payload)
            .await?;
        let session_id = body
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or(local_id);

        tracing::debug!(server = %self.name, session_id = %session_id, "MCP HTTP session created");
        self.session_id = Some(session_id);
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.require_session()?;
        let url = format!("{}/tools", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error("tools", e))?;
        let body = self.check_status("list tools", response).await?;
        let tools = body
            .get("tools")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        serde_json::from_value(tools)
            .map_err(|e| Error::McpProtocol(format!("{}: malformed tools list: {e}", self.name)))
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let session_id = self.require_session()?;
        let payload = serde_json::json!({
            "sessionId": session_id,
            "name": name,
            "arguments": arguments,
        });
        let body = self
            .post_json(&format!("{}/tools/call", self.base_url), &payload)
            .await?;
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Close the session. The underlying connection pool is dropped with
    /// the client; there is nothing to tear down server-side.
    pub fn stop(&mut self) {
        if self.session_id.take().is_some() {
            tracing::debug!(server = %self.name, "MCP HTTP session closed");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.session_id.is_some()
    }

    // ── Internal helpers ──────────────────────────────────────────

    fn require_session(&self) -> Result<&str> {
        self.session_id
            .as_deref()
            .ok_or_else(|| Error::McpUnavailable(format!("{}: HTTP session not started", self.name)))
    }

    fn transport_error(&self, operation: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::McpTimeout {
                service: self.name.clone(),
                operation: operation.to_string(),
                seconds: SESSION_TIMEOUT.as_secs(),
            }
        } else {
            Error::McpUnavailable(format!("{}: {operation}: {e}", self.name))
        }
    }

    async fn post_json(&self, url: &str, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        self.check_status(url, response).await
    }

    async fn check_status(&self, operation: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::McpAuthentication(self.name.clone()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "{}: {operation} failed: {status} - {text}",
                self.name
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::McpProtocol(format!("{}: {operation}: invalid JSON body: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let t = HttpTransport::new("github", "https://example.com/mcp/", &[]).unwrap();
        assert_eq!(t.base_url, "https://example.com/mcp");
    }

    #[test]
    fn calls_require_session() {
        let t = HttpTransport::new("github", "https://example.com/mcp", &[]).unwrap();
        assert!(!t.is_alive());
        let err = t.require_session().unwrap_err();
        assert!(matches!(err, Error::McpUnavailable(_)));
    }

    #[test]
    fn invalid_header_is_config_error() {
        let err = HttpTransport::new(
            "github",
            "https://example.com",
            &[("Auth\norization".to_string(), "x".to_string())],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
