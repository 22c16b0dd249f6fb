//! Service state management.
//!
//! Each supported service implements the same five-hook lifecycle: one-time
//! initialization, per-task setup of an isolated initial state, runtime
//! configuration for the agent's MCP server, verification environment for
//! the verifier subprocess, and cleanup back to the baseline.

pub mod env_guard;
pub mod factory;
pub mod filesystem;
pub mod github;
pub mod insforge;
pub mod manager;
pub mod notion;
pub mod playwright;
pub mod postgres;
pub mod prepare;
pub mod supabase;
pub mod webarena;

pub use env_guard::VerificationEnv;
pub use factory::create_state_manager;
pub use manager::{ResourceTracker, ServiceConfig, StateManager};
