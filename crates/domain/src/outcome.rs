//! Agent execution outcome.

use serde::{Deserialize, Serialize};

use crate::transcript::TranscriptMessage;
use crate::usage::TokenUsage;

/// What an agent loop hands back after driving one task: the transcript so
/// far (partial on abort), accumulated usage, and how it ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub success: bool,
    pub transcript: Vec<TranscriptMessage>,
    pub token_usage: TokenUsage,
    pub turn_count: u32,
    /// Seconds spent inside the loop.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model id the provider reported actually serving the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_model: Option<String>,
}

impl AgentOutcome {
    /// An outcome for a loop that failed before completing, carrying
    /// whatever transcript and usage were assembled.
    pub fn failure(
        error: impl Into<String>,
        transcript: Vec<TranscriptMessage>,
        token_usage: TokenUsage,
        turn_count: u32,
        execution_time: f64,
    ) -> Self {
        Self {
            success: false,
            transcript,
            token_usage,
            turn_count,
            execution_time,
            error: Some(error.into()),
            actual_model: None,
        }
    }
}
