//! LLM provider layer.
//!
//! Exposes one contract: [`LlmClient::complete`], an OpenAI-style chat
//! completion against whichever provider the model catalog resolved. The
//! catalog maps short model names to credentials and canonical ids; the
//! pricing table turns token totals into dollars for the aggregator.

pub mod catalog;
pub mod client;
pub mod pricing;
pub mod types;

pub use catalog::{ModelCatalog, ModelSpec};
pub use client::LlmClient;
pub use pricing::compute_cost_usd;
pub use types::{ChatMessage, ChatRequest, ChatResponse, ToolDefinition, ToolInvocation};
