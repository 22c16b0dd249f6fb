//! Task identity and per-task runtime state.
//!
//! A [`Task`] is discovered on disk by the task catalog and carries two kinds
//! of data: the immutable identity (service, category, id, file paths) and
//! mutable slots filled in by the state manager during setup (initial state
//! info, runtime endpoints). The mutable slots exist so that the agent and
//! the verifier can reach the per-task resource.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Runtime parameters the agent's MCP server factory consumes, produced by
/// the service's state manager and refreshed per task.
pub type ServiceConfig = serde_json::Map<String, Value>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ServiceKind
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The backend system a task operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Filesystem,
    Postgres,
    Supabase,
    Insforge,
    Notion,
    Github,
    Playwright,
    PlaywrightWebarena,
}

impl ServiceKind {
    /// Canonical lower-case name, matching the on-disk `tasks/<service>/`
    /// directory and CLI argument.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Filesystem => "filesystem",
            ServiceKind::Postgres => "postgres",
            ServiceKind::Supabase => "supabase",
            ServiceKind::Insforge => "insforge",
            ServiceKind::Notion => "notion",
            ServiceKind::Github => "github",
            ServiceKind::Playwright => "playwright",
            ServiceKind::PlaywrightWebarena => "playwright_webarena",
        }
    }

    /// Directory name used under the results root. WebArena results share
    /// the playwright namespace.
    pub fn results_dir_name(&self) -> &'static str {
        match self {
            ServiceKind::PlaywrightWebarena => "playwright",
            other => other.as_str(),
        }
    }

    /// Services reached over a stdio MCP server.
    pub fn uses_stdio_mcp(&self) -> bool {
        !matches!(self, ServiceKind::Github)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "filesystem" => Some(ServiceKind::Filesystem),
            "postgres" => Some(ServiceKind::Postgres),
            "supabase" => Some(ServiceKind::Supabase),
            "insforge" => Some(ServiceKind::Insforge),
            "notion" => Some(ServiceKind::Notion),
            "github" => Some(ServiceKind::Github),
            "playwright" => Some(ServiceKind::Playwright),
            "playwright_webarena" => Some(ServiceKind::PlaywrightWebarena),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// InitialStateInfo / TrackedResource
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Produced by a state manager during setup; lives for one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialStateInfo {
    /// Unique identifier of the materialised state (directory name, page id,
    /// container name, schema id…).
    pub state_id: String,
    /// URL at which the state is reachable, when the service has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_url: Option<String>,
    /// Service-specific context (created tables, ports, category…).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// A resource registered during setup and drained during cleanup.
///
/// Cleanup drains these in reverse registration order and must tolerate the
/// underlying object already being gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedResource {
    /// Resource kind tag, e.g. `"docker_container"`, `"backup_dir"`,
    /// `"notion_page"`, `"github_fork"`.
    pub kind: String,
    /// Service-level identifier of the resource.
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One evaluation unit: an instruction, a verifier, and optional
/// preparation, scoped to a single service.
#[derive(Debug, Clone)]
pub struct Task {
    pub service: ServiceKind,
    pub category_id: String,
    pub task_id: String,

    /// Path to the instruction markdown (`description.md` or
    /// `<task>_description.md`).
    pub instruction_path: PathBuf,
    /// Path to the verification script.
    pub verification_path: PathBuf,
    /// Optional state preparation script run during setup.
    pub prepare_script_path: Option<PathBuf>,
    /// Optional task metadata loaded from `meta.json`.
    pub meta: Option<Value>,

    /// Filled in by the state manager during setup.
    pub initial_state: Option<InitialStateInfo>,
    /// Working directory for filesystem tasks (the per-task backup copy).
    pub test_directory: Option<PathBuf>,
}

impl Task {
    pub fn new(
        service: ServiceKind,
        category_id: impl Into<String>,
        task_id: impl Into<String>,
        instruction_path: PathBuf,
        verification_path: PathBuf,
    ) -> Self {
        Self {
            service,
            category_id: category_id.into(),
            task_id: task_id.into(),
            instruction_path,
            verification_path,
            prepare_script_path: None,
            meta: None,
            initial_state: None,
            test_directory: None,
        }
    }

    /// Human-readable name, `<category>/<task>`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.category_id, self.task_id)
    }

    /// Directory name used for results, `<category>__<task>`.
    pub fn dir_name(&self) -> String {
        format!("{}__{}", self.category_id, self.task_id)
    }

    /// The id of the duplicated initial state, when the service produced one
    /// (Notion stores the duplicated page id here).
    pub fn initial_state_id(&self) -> Option<&str> {
        self.initial_state.as_ref().map(|s| s.state_id.as_str())
    }

    /// The URL of the materialised state (WebArena entry URL, API base…).
    pub fn initial_state_url(&self) -> Option<&str> {
        self.initial_state
            .as_ref()
            .and_then(|s| s.state_url.as_deref())
    }
}
