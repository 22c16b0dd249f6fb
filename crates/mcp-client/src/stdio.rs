//! Stdio transport: a child process speaking line-delimited JSON-RPC.
//!
//! The transport owns the child for its whole lifetime. Requests and
//! responses are strictly sequential; servers may interleave notifications,
//! which are skipped until the response with the matching id arrives. A
//! response line that fails to parse leaves the session unusable.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};

use mark_domain::{Error, Result};

use crate::protocol::{Notification, Request, Response};

/// Default per-request read deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Non-JSON stdout lines tolerated per read before declaring the server
/// broken (misconfigured servers sometimes log to stdout).
const MAX_SKIP_LINES: usize = 1000;

pub struct StdioTransport {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    request_timeout: Duration,
    alive: bool,
}

impl StdioTransport {
    /// Spawn the server process with `env` merged over the parent's
    /// environment. Stderr is drained to debug logging in the background.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::McpUnavailable(format!("{name}: failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::McpProtocol(format!("{name}: failed to capture child stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::McpProtocol(format!("{name}: failed to capture child stdout")))?;

        if let Some(stderr) = child.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, line = %line, "mcp server stderr");
                }
            });
        }

        tracing::debug!(server = %name, command, "spawned MCP server process");

        Ok(Self {
            name: name.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 0,
            request_timeout,
            alive: true,
        })
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    async fn write_line(&mut self, json: &str) -> Result<()> {
        if !self.alive {
            return Err(Error::McpUnavailable(format!("{}: server process has exited", self.name)));
        }
        self.stdin.write_all(json.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read the next JSON line from stdout, skipping blank and non-JSON
    /// lines up to [`MAX_SKIP_LINES`].
    async fn read_json_line(&mut self) -> Result<String> {
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let n = self.stdout.read_line(&mut line).await?;
            if n == 0 {
                self.alive = false;
                return Err(Error::McpUnavailable(format!("{}: server closed stdout", self.name)));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive = false;
                return Err(Error::McpProtocol(format!(
                    "{}: too many non-JSON lines on stdout",
                    self.name
                )));
            }
            tracing::debug!(server = %self.name, line = %trimmed, "skipping non-JSON stdout line");
        }
    }

    /// Send a request and wait for the response with the matching id.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_request_id();
        let req = Request::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(server = %self.name, id, method, "sending MCP request");
        self.write_line(&json).await?;

        let deadline = self.request_timeout;
        let name = self.name.clone();
        let response = tokio::time::timeout(deadline, async {
            loop {
                let line = self.read_json_line().await?;
                match serde_json::from_str::<Response>(&line) {
                    Ok(resp) if resp.id == id => return Ok(resp),
                    Ok(resp) => {
                        tracing::debug!(
                            server = %self.name,
                            expected = id,
                            got = resp.id,
                            "response for a different request, skipping"
                        );
                    }
                    // Notifications and requests from the server have no
                    // matching id; anything that is not parseable JSON-RPC
                    // at all poisons the session.
                    Err(_) if line.contains("\"method\"") => {
                        tracing::debug!(server = %self.name, "skipping server notification");
                    }
                    Err(e) => {
                        self.alive = false;
                        return Err(Error::McpProtocol(format!(
                            "{}: unparseable response line: {e}",
                            self.name
                        )));
                    }
                }
            }
        })
        .await;

        match response {
            Ok(inner) => inner?
                .into_result()
                .map_err(|e| Error::McpProtocol(format!("{name}: {method} failed: {e}"))),
            Err(_) => {
                self.alive = false;
                Err(Error::McpTimeout {
                    service: name,
                    operation: method.to_string(),
                    seconds: deadline.as_secs(),
                })
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&mut self, method: &str) -> Result<()> {
        let json = serde_json::to_string(&Notification::new(method))?;
        tracing::debug!(server = %self.name, method, "sending MCP notification");
        self.write_line(&json).await
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Stop the server: SIGTERM, wait up to the grace period, then SIGKILL.
    pub async fn stop(mut self) {
        self.alive = false;

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // Safety: plain signal send to our own child process.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, ?status, "MCP server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.name, error = %e, "error waiting for MCP server");
            }
            Err(_) => {
                tracing::warn!(server = %self.name, "MCP server ignored SIGTERM, killing");
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(server = %self.name, error = %e, "failed to kill MCP server");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_echo_server(script: &str) -> StdioTransport {
        // A tiny shell loop standing in for an MCP server.
        StdioTransport::spawn(
            "test",
            "sh",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn request_matches_response_id() {
        let mut t = spawn_echo_server(
            r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'"#,
        );
        let result = t.request("tools/list", None).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn noise_lines_are_skipped() {
        let mut t = spawn_echo_server(
            r#"read line; echo 'starting up...'; echo; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'"#,
        );
        assert!(t.request("initialize", None).await.is_ok());
    }

    #[tokio::test]
    async fn server_error_is_surfaced() {
        let mut t = spawn_echo_server(
            r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}'"#,
        );
        let err = t.request("tools/call", None).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        // A server-level error does not poison the transport.
        assert!(t.is_alive());
    }

    #[tokio::test]
    async fn eof_marks_transport_dead() {
        let mut t = spawn_echo_server("read line; exit 0");
        let err = t.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, Error::McpUnavailable(_)));
        assert!(!t.is_alive());
    }

    #[tokio::test]
    async fn request_timeout_is_reported() {
        let mut t = StdioTransport::spawn(
            "test",
            "sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &HashMap::new(),
            Duration::from_millis(100),
        )
        .unwrap();
        let err = t.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, Error::McpTimeout { .. }));
        assert!(err.is_retryable());
        t.stop().await;
    }

    #[tokio::test]
    async fn stop_terminates_child() {
        let t = spawn_echo_server("sleep 60");
        t.stop().await;
    }
}
