//! Task discovery and filtering.
//!
//! Tasks live under `tasks/<service>/` in one of two layouts:
//!
//! - one directory per task, holding `description.md` and `verify.py`
//!   (optionally `prepare_environment.py` and `meta.json`);
//! - sibling files `<task>_description.md` / `<task>_verify.py` inside a
//!   category directory.
//!
//! The task's category is the directory containing it; organisational
//! levels above that (difficulty tiers and the like) do not enter the
//! task identity.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use mark_domain::{Error, Result, ServiceKind, Task};

const DESCRIPTION_FILE: &str = "description.md";
const VERIFY_FILE: &str = "verify.py";
const DESCRIPTION_SUFFIX: &str = "_description.md";

/// Appended to every Notion instruction so the agent does not stall waiting
/// for user input.
const NOTION_INSTRUCTION_SUFFIX: &str = "\n\nNote: Based on your understanding, solve the task \
     all at once by yourself, don't ask for my opinions on anything.";

pub struct TaskCatalog {
    service: ServiceKind,
    tasks: Vec<Task>,
}

impl TaskCatalog {
    /// Walk `tasks_root/<service>/` and collect every task found in either
    /// layout, ordered by `(category, task)`.
    pub fn discover(tasks_root: &Path, service: ServiceKind) -> Result<Self> {
        let service_root = tasks_root.join(service.as_str());
        if !service_root.is_dir() {
            return Err(Error::Config(format!(
                "task directory not found: {}",
                service_root.display()
            )));
        }

        let mut tasks = Vec::new();
        for entry in WalkDir::new(&service_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();

            if file_name == DESCRIPTION_FILE {
                if let Some(task) = task_from_directory(service, entry.path()) {
                    tasks.push(task);
                }
            } else if let Some(prefix) = file_name.strip_suffix(DESCRIPTION_SUFFIX) {
                if let Some(task) = task_from_siblings(service, entry.path(), prefix) {
                    tasks.push(task);
                }
            }
        }

        tasks.sort_by(|a, b| {
            (a.category_id.as_str(), a.task_id.as_str())
                .cmp(&(b.category_id.as_str(), b.task_id.as_str()))
        });
        tracing::info!(
            service = %service,
            count = tasks.len(),
            "discovered tasks"
        );
        Ok(Self { service, tasks })
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn all(&self) -> &[Task] {
        &self.tasks
    }

    /// Filter tasks: `"all"`, `"<category>"`, or `"<category>/<task>"`.
    pub fn filter(&self, filter: &str) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| matches_filter(task, filter))
            .cloned()
            .collect()
    }

    /// Read the task's instruction, with service-specific boilerplate
    /// appended where the service needs it.
    pub fn task_instruction(&self, task: &Task) -> Result<String> {
        let base = std::fs::read_to_string(&task.instruction_path).map_err(|e| {
            Error::Config(format!(
                "cannot read instruction {}: {e}",
                task.instruction_path.display()
            ))
        })?;
        Ok(match self.service {
            ServiceKind::Notion => format!("{base}{NOTION_INSTRUCTION_SUFFIX}"),
            _ => base,
        })
    }
}

/// Whether a task matches a filter string.
pub fn matches_filter(task: &Task, filter: &str) -> bool {
    if filter.eq_ignore_ascii_case("all") {
        return true;
    }
    match filter.split_once('/') {
        Some((category, task_id)) => task.category_id == category && task.task_id == task_id,
        None => task.category_id == filter,
    }
}

fn task_from_directory(service: ServiceKind, description_path: &Path) -> Option<Task> {
    let task_dir = description_path.parent()?;
    let verify_path = task_dir.join(VERIFY_FILE);
    if !verify_path.is_file() {
        tracing::debug!(dir = %task_dir.display(), "description without verify script, skipping");
        return None;
    }

    let task_id = task_dir.file_name()?.to_string_lossy().into_owned();
    let category_id = task_dir
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "uncategorized".to_string());

    let mut task = Task::new(
        service,
        category_id,
        task_id,
        description_path.to_path_buf(),
        verify_path,
    );

    let prepare = task_dir.join("prepare_environment.py");
    if prepare.is_file() {
        task.prepare_script_path = Some(prepare);
    }
    let meta_path = task_dir.join("meta.json");
    if meta_path.is_file() {
        match std::fs::read_to_string(&meta_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
        {
            Some(meta) => task.meta = Some(meta),
            None => {
                tracing::warn!(path = %meta_path.display(), "unparseable task meta.json, ignoring")
            }
        }
    }
    Some(task)
}

fn task_from_siblings(service: ServiceKind, description_path: &Path, prefix: &str) -> Option<Task> {
    let dir = description_path.parent()?;
    let verify_path = dir.join(format!("{prefix}_verify.py"));
    if !verify_path.is_file() {
        return None;
    }
    let category_id = dir.file_name()?.to_string_lossy().into_owned();
    Some(Task::new(
        service,
        category_id,
        prefix,
        description_path.to_path_buf(),
        verify_path,
    ))
}
