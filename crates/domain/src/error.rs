//! Shared error type used across all MCPMark crates.
//!
//! Every variant knows whether it is worth retrying the whole task. Bare
//! strings (errors that crossed a process or JSON boundary and lost their
//! type) fall back to a short substring match.

/// Substring patterns marking a bare error message as retryable.
///
/// Kept short and generic: the goal is to catch API/infrastructure issues,
/// not task failures.
const RETRYABLE_PATTERNS: &[&str] = &[
    "ratelimit",
    "agent execution failed",
    "unavailable",
    "internal server error",
    "network error",
    "quota",
    "account balance",
    "mcp network error",
    "state duplication error",
];

/// Returns true when a bare error message matches a retryable pattern.
pub fn is_retryable_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lowered.contains(p))
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("configuration error: {0}")]
    Config(String),

    // Message must keep matching the retryable substring list after
    // round-tripping through meta.json as a bare string.
    #[error("RateLimitError: model '{0}' is being throttled")]
    RateLimited(String),

    #[error("quota exceeded for model '{0}'")]
    QuotaExceeded(String),

    #[error("context window exceeded for model '{0}'")]
    ContextWindowExceeded(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("MCP service '{0}' is unavailable")]
    McpUnavailable(String),

    #[error("MCP service '{service}' timed out after {seconds}s during {operation}")]
    McpTimeout {
        service: String,
        operation: String,
        seconds: u64,
    },

    #[error("authentication failed for MCP service '{0}'")]
    McpAuthentication(String),

    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("State Duplication Error")]
    StateDuplication,

    #[error("state setup failed for service '{service}': {message}")]
    StateSetup { service: String, message: String },

    #[error("state cleanup failed for service '{service}': {message}")]
    StateCleanup { service: String, message: String },

    #[error("task verification failed: {0}")]
    Verification(String),

    #[error("Execution timed out after {0} seconds")]
    AgentTimeout(u64),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the task that produced this error should be re-executed.
    ///
    /// The typed classification is authoritative; `Http` and `Other` carry
    /// messages from outside the type system and use the substring fallback.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited(_)
            | Error::McpUnavailable(_)
            | Error::McpTimeout { .. }
            | Error::StateDuplication
            | Error::StateSetup { .. }
            | Error::AgentTimeout(_) => true,

            Error::Config(_)
            | Error::QuotaExceeded(_)
            | Error::ContextWindowExceeded(_)
            | Error::McpAuthentication(_)
            | Error::StateCleanup { .. }
            | Error::Verification(_) => false,

            Error::Provider { message, .. } => is_retryable_message(message),
            Error::Http(message) | Error::Other(message) => is_retryable_message(message),
            Error::Io(e) => is_retryable_message(&e.to_string()),
            Error::Json(_) | Error::McpProtocol(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
