//! Shared domain types for the MCPMark evaluation pipeline.
//!
//! Everything here is a plain value type: tasks, transcripts, token usage,
//! results, and the shared error enum. No I/O lives in this crate.

pub mod error;
pub mod outcome;
pub mod result;
pub mod task;
pub mod transcript;
pub mod usage;

pub use error::{Error, Result};
pub use outcome::AgentOutcome;
pub use result::TaskResult;
pub use task::{InitialStateInfo, ServiceConfig, ServiceKind, Task, TrackedResource};
pub use transcript::TranscriptMessage;
pub use usage::TokenUsage;
