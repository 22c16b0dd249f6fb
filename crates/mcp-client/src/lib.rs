//! MCP client for the evaluation pipeline.
//!
//! Speaks the Model Context Protocol to a tool server over one of two
//! transports: a stdio child process (line-delimited JSON-RPC 2.0) or an
//! HTTP session. Both expose the same logical interface: start, list tools
//! (cached), call tool, stop.

pub mod client;
pub mod http;
pub mod protocol;
pub mod stdio;

pub use client::{McpClient, McpServerSpec};
pub use protocol::{tool_result_text, ToolDescriptor};
