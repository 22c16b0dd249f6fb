//! Agent loops.
//!
//! Two loop variants share one external contract: given a rendered task
//! instruction, drive the LLM ↔ MCP tool cycle under the task deadline and
//! return the outcome with transcript and token usage. The direct loop
//! speaks the provider's native function-tool protocol; the ReAct loop
//! constrains the model to strict JSON thought/action/answer replies.

pub mod config;
pub mod direct;
pub mod factory;
pub mod logfile;
pub mod react;

use std::path::Path;
use std::sync::Arc;

use mark_domain::{AgentOutcome, ServiceKind};
use mark_providers::LlmClient;

pub use config::{AgentConfig, LoopVariant, ServiceConfigSource};

/// The agent: one LLM client plus the loop configuration. One `execute`
/// call runs one task; the MCP session lives exactly that long.
pub struct Agent {
    llm: LlmClient,
    config: AgentConfig,
    service_config: Arc<dyn ServiceConfigSource>,
}

impl Agent {
    pub fn new(
        llm: LlmClient,
        config: AgentConfig,
        service_config: Arc<dyn ServiceConfigSource>,
    ) -> Self {
        Self {
            llm,
            config,
            service_config,
        }
    }

    pub fn service(&self) -> ServiceKind {
        self.config.service
    }

    /// Execute one instruction, appending human-readable progress to
    /// `log_path` as the loop runs.
    pub async fn execute(&self, instruction: &str, log_path: &Path) -> AgentOutcome {
        let started = std::time::Instant::now();
        let service_config = self.service_config.service_config().await;

        let result = match self.config.variant {
            LoopVariant::Direct => {
                direct::run(&self.llm, &self.config, &service_config, instruction, log_path).await
            }
            LoopVariant::React => {
                react::run(&self.llm, &self.config, &service_config, instruction, log_path).await
            }
        };

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => AgentOutcome::failure(
                format!("Agent execution failed: {e}"),
                vec![],
                Default::default(),
                0,
                0.0,
            ),
        };
        outcome.execution_time = started.elapsed().as_secs_f64();
        outcome
    }
}
