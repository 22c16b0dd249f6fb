//! The service-polymorphic state manager contract.
//!
//! Backends implement the `create_initial_state` / `cleanup_task_state` /
//! `cleanup_resource` hooks plus the two config surfaces; `setup` and
//! `cleanup` are template methods built on top of them. Variants are
//! explicit trait objects behind [`crate::factory::create_state_manager`],
//! one instance per evaluator run.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use mark_domain::{InitialStateInfo, Result, Task, TrackedResource};

pub use mark_domain::ServiceConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ResourceTracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-task stack of resources to release during cleanup.
///
/// Resources drain in reverse registration order. Releasing a resource
/// whose underlying object is already gone still counts as success.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    resources: Vec<TrackedResource>,
}

impl ResourceTracker {
    pub fn track(&mut self, kind: &str, id: &str, metadata: Vec<(&str, Value)>) {
        tracing::debug!(kind, id, "tracking resource for cleanup");
        self.resources.push(TrackedResource {
            kind: kind.to_string(),
            id: id.to_string(),
            metadata: metadata
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        });
    }

    /// Remove and return all tracked resources, last-registered first.
    pub fn drain_lifo(&mut self) -> Vec<TrackedResource> {
        let mut drained = std::mem::take(&mut self.resources);
        drained.reverse();
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StateManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait StateManager: Send + Sync {
    fn service_name(&self) -> &str;

    /// One-time process-wide setup: connectivity checks, credential
    /// validation, baseline capture.
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    // ── Backend hooks ─────────────────────────────────────────────

    /// Materialise a fresh initial state for the task. Must be idempotent
    /// across retries: prior partial state for the same task is removed
    /// before creating anew.
    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo>;

    /// Restore the baseline for this task's state.
    async fn cleanup_task_state(&mut self, task: &Task) -> Result<()>;

    /// Release one tracked resource. Default: nothing beyond the task-state
    /// cleanup is needed.
    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        tracing::debug!(kind = %resource.kind, id = %resource.id, "no resource-specific cleanup");
        Ok(())
    }

    /// The per-task resource stack.
    fn tracker(&mut self) -> &mut ResourceTracker;

    // ── Config surfaces ───────────────────────────────────────────

    /// Latest runtime parameters the agent's MCP server needs.
    fn service_config_for_agent(&self) -> ServiceConfig;

    /// Service-specific environment variables the verifier reads, beyond
    /// `MCP_MESSAGES`.
    fn service_verification_env(&self) -> Vec<(String, String)>;

    // ── Template methods ──────────────────────────────────────────

    /// Create the initial state and store it on the task. Returns false on
    /// failure; the evaluator records a retryable `State Duplication Error`.
    async fn setup(&mut self, task: &mut Task) -> bool {
        match self.create_initial_state(task).await {
            Ok(info) => {
                tracing::info!(
                    service = %self.service_name(),
                    task = %task.name(),
                    state_id = %info.state_id,
                    "initial state ready"
                );
                task.initial_state = Some(info);
                true
            }
            Err(e) => {
                tracing::error!(
                    service = %self.service_name(),
                    task = %task.name(),
                    error = %e,
                    "state setup failed"
                );
                false
            }
        }
    }

    /// Full environment for the verifier: `MCP_MESSAGES` plus the
    /// service-specific variables.
    fn verification_environment(&self, messages_path: &Path) -> Vec<(String, String)> {
        let mut vars = vec![(
            "MCP_MESSAGES".to_string(),
            messages_path.display().to_string(),
        )];
        vars.extend(self.service_verification_env());
        vars
    }

    /// Drain tracked resources in reverse order, then restore the task's
    /// baseline state. A single resource failure is logged and does not
    /// abort the drain, but the aggregate result reports it.
    async fn cleanup(&mut self, task: &Task) -> bool {
        let mut ok = true;

        for resource in self.tracker().drain_lifo() {
            if let Err(e) = self.cleanup_resource(&resource).await {
                tracing::warn!(
                    service = %self.service_name(),
                    kind = %resource.kind,
                    id = %resource.id,
                    error = %e,
                    "failed to release tracked resource"
                );
                ok = false;
            }
        }

        if let Err(e) = self.cleanup_task_state(task).await {
            tracing::error!(
                service = %self.service_name(),
                task = %task.name(),
                error = %e,
                "task state cleanup failed"
            );
            ok = false;
        }

        ok
    }
}
