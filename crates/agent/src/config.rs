//! Agent loop configuration.

use std::time::Duration;

use async_trait::async_trait;

use mark_domain::{ServiceConfig, ServiceKind};

/// Default turn budget for the direct tool-calling loop.
pub const DEFAULT_MAX_TURNS: u32 = 2;

/// Default step budget for the ReAct loop.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Which loop protocol drives the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopVariant {
    /// Provider-native function calling.
    Direct,
    /// Strict-JSON thought/action/answer replies.
    React,
}

/// Source of fresh service configuration, re-read before each execution.
///
/// The state manager behind this may mutate between tasks (new test
/// directory, new container URL); the agent never caches its output.
#[async_trait]
pub trait ServiceConfigSource: Send + Sync {
    async fn service_config(&self) -> ServiceConfig;
}

#[async_trait]
impl ServiceConfigSource for ServiceConfig {
    async fn service_config(&self) -> ServiceConfig {
        self.clone()
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub service: ServiceKind,
    /// Task deadline; the loop stops issuing calls once it expires.
    pub timeout: Duration,
    /// Reasoning effort forwarded to the provider; `None` is the provider
    /// default.
    pub reasoning_effort: Option<String>,
    /// Direct-loop turn budget. Note the asymmetry with `max_iterations`.
    pub max_turns: u32,
    /// ReAct-loop step budget.
    pub max_iterations: u32,
    pub variant: LoopVariant,
}

impl AgentConfig {
    pub fn new(service: ServiceKind, timeout: Duration) -> Self {
        Self {
            service,
            timeout,
            reasoning_effort: None,
            max_turns: DEFAULT_MAX_TURNS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            variant: LoopVariant::Direct,
        }
    }

    pub fn with_variant(mut self, variant: LoopVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort.filter(|e| e != "default");
        self
    }

    /// Ceiling for one LLM completion: half the task deadline.
    pub fn llm_call_timeout(&self) -> Duration {
        self.timeout / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_preserve_loop_asymmetry() {
        let config = AgentConfig::new(ServiceKind::Filesystem, Duration::from_secs(300));
        assert_eq!(config.max_turns, 2);
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.variant, LoopVariant::Direct);
    }

    #[test]
    fn llm_timeout_is_half_the_deadline() {
        let config = AgentConfig::new(ServiceKind::Filesystem, Duration::from_secs(300));
        assert_eq!(config.llm_call_timeout(), Duration::from_secs(150));
    }

    #[test]
    fn default_effort_is_normalised_away() {
        let config = AgentConfig::new(ServiceKind::Filesystem, Duration::from_secs(60))
            .with_reasoning_effort(Some("default".into()));
        assert!(config.reasoning_effort.is_none());
        let config = config.with_reasoning_effort(Some("high".into()));
        assert_eq!(config.reasoning_effort.as_deref(), Some("high"));
    }
}
