//! Filesystem state manager.
//!
//! The baseline is a read-only template directory per task category. Setup
//! copies the template into a unique per-task backup directory and points
//! the agent (and the verifier) at the backup, leaving the template
//! untouched. Cleanup removes the backup tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use mark_domain::{Error, InitialStateInfo, Result, Task, TrackedResource};

use crate::manager::{ResourceTracker, ServiceConfig, StateManager};

/// Directory holding the per-task working copies.
const BACKUP_ROOT_NAME: &str = ".mark_backups";

pub struct FilesystemStateManager {
    /// Root under which category template directories live
    /// (`FILESYSTEM_TEST_ROOT`).
    test_root_base: PathBuf,
    /// Template directory for the current task's category.
    test_root: PathBuf,
    backup_root: PathBuf,
    /// The live working copy the agent operates on.
    current_task_dir: Option<PathBuf>,
    tracker: ResourceTracker,
}

impl FilesystemStateManager {
    pub fn new(test_root_base: impl Into<PathBuf>) -> Self {
        let test_root_base = test_root_base.into();
        let backup_root = test_root_base
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(BACKUP_ROOT_NAME);
        Self {
            test_root: test_root_base.clone(),
            test_root_base,
            backup_root,
            current_task_dir: None,
            tracker: ResourceTracker::default(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("FILESYSTEM_TEST_ROOT")
            .unwrap_or_else(|_| "./test_environments".to_string());
        Self::new(base)
    }

    /// Select the category-specific template root for this task.
    fn select_test_root(&mut self, task: &Task) {
        self.test_root = if task.category_id.is_empty() {
            self.test_root_base.clone()
        } else {
            self.test_root_base.join(&task.category_id)
        };
        tracing::debug!(root = %self.test_root.display(), "selected template root");
    }

    fn backup_dir_for(&self, task: &Task) -> PathBuf {
        self.backup_root.join(format!(
            "backup_{}_{}_{}_{}",
            task.service,
            task.category_id,
            task.task_id,
            std::process::id()
        ))
    }
}

/// Recursively copy a directory tree, preserving relative layout.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
        // Symlinks in templates are not expected; skip anything else.
    }
    Ok(())
}

#[async_trait]
impl StateManager for FilesystemStateManager {
    fn service_name(&self) -> &str {
        "filesystem"
    }

    /// Verify the template root exists and is writable.
    async fn initialize(&mut self) -> Result<()> {
        if !self.test_root_base.exists() {
            return Err(Error::Config(format!(
                "filesystem test environment not found: {}",
                self.test_root_base.display()
            )));
        }
        let probe = self.test_root_base.join(".mark_write_probe");
        tokio::fs::write(&probe, b"probe").await?;
        tokio::fs::remove_file(&probe).await?;
        tracing::info!(root = %self.test_root_base.display(), "filesystem environment ready");
        Ok(())
    }

    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo> {
        self.select_test_root(task);
        if !self.test_root.exists() {
            return Err(Error::StateSetup {
                service: "filesystem".into(),
                message: format!("template directory missing: {}", self.test_root.display()),
            });
        }

        let backup_dir = self.backup_dir_for(task);
        // Idempotent across retries: stale copies from a previous attempt
        // are removed before copying anew.
        if backup_dir.exists() {
            tokio::fs::remove_dir_all(&backup_dir).await?;
        }
        tokio::fs::create_dir_all(&self.backup_root).await?;

        let src = self.test_root.clone();
        let dst = backup_dir.clone();
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| Error::Other(format!("backup copy task panicked: {e}")))??;

        tracing::info!(
            task = %task.name(),
            backup = %backup_dir.display(),
            "created working copy of template"
        );

        task.test_directory = Some(backup_dir.clone());
        self.current_task_dir = Some(backup_dir.clone());
        self.tracker.track(
            "backup_dir",
            &backup_dir.display().to_string(),
            vec![("category", Value::String(task.category_id.clone()))],
        );

        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            "task_directory".to_string(),
            Value::String(backup_dir.display().to_string()),
        );
        Ok(InitialStateInfo {
            state_id: backup_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            state_url: None,
            metadata,
        })
    }

    async fn cleanup_task_state(&mut self, task: &Task) -> Result<()> {
        if let Some(dir) = task.test_directory.as_ref().or(self.current_task_dir.as_ref()) {
            if dir.exists() {
                tokio::fs::remove_dir_all(dir).await?;
                tracing::info!(dir = %dir.display(), "removed working copy");
            }
        }
        self.current_task_dir = None;
        Ok(())
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if resource.kind == "backup_dir" {
            let path = PathBuf::from(&resource.id);
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await?;
            }
        }
        Ok(())
    }

    fn tracker(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    fn service_config_for_agent(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        if let Some(dir) = &self.current_task_dir {
            config.insert(
                "test_directory".to_string(),
                Value::String(dir.display().to_string()),
            );
        }
        config
    }

    fn service_verification_env(&self) -> Vec<(String, String)> {
        match &self.current_task_dir {
            Some(dir) => vec![(
                "FILESYSTEM_TEST_DIR".to_string(),
                dir.display().to_string(),
            )],
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mark_domain::ServiceKind;
    use std::fs;

    fn template_with(category: &str, files: &[(&str, &str)]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let cat_dir = root.path().join(category);
        for (rel, contents) in files {
            let path = cat_dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        root
    }

    fn task_for(root: &Path, category: &str) -> Task {
        Task::new(
            ServiceKind::Filesystem,
            category,
            "file_reorganize",
            root.join(category).join("description.md"),
            root.join(category).join("verify.py"),
        )
    }

    #[tokio::test]
    async fn setup_copies_template_and_cleanup_removes_it() {
        let root = template_with(
            "legal_document",
            &[
                ("legal_files/Preferred_Stock_Purchase_Agreement_v10.txt", "agreement"),
                ("legal_files/notes/summary.md", "notes"),
            ],
        );
        let mut mgr = FilesystemStateManager::new(root.path());
        mgr.initialize().await.unwrap();

        let mut task = task_for(root.path(), "legal_document");
        assert!(mgr.setup(&mut task).await);

        let backup = task.test_directory.clone().unwrap();
        assert!(backup
            .join("legal_files/Preferred_Stock_Purchase_Agreement_v10.txt")
            .exists());
        assert!(backup.join("legal_files/notes/summary.md").exists());
        // The template itself is untouched and still in place.
        assert!(root
            .path()
            .join("legal_document/legal_files/notes/summary.md")
            .exists());

        // Agent mutates only the working copy.
        fs::create_dir_all(backup.join("legal_files/final_version")).unwrap();

        assert!(mgr.cleanup(&task).await);
        assert!(!backup.exists());
    }

    #[tokio::test]
    async fn setup_is_idempotent_across_retries() {
        let root = template_with("cat", &[("a.txt", "one")]);
        let mut mgr = FilesystemStateManager::new(root.path());
        let mut task = task_for(root.path(), "cat");

        assert!(mgr.setup(&mut task).await);
        let backup = task.test_directory.clone().unwrap();
        // Leave debris from a failed attempt behind.
        fs::write(backup.join("stale.txt"), "junk").unwrap();

        assert!(mgr.setup(&mut task).await);
        let backup = task.test_directory.clone().unwrap();
        assert!(backup.join("a.txt").exists());
        assert!(!backup.join("stale.txt").exists());

        mgr.cleanup(&task).await;
    }

    #[tokio::test]
    async fn missing_category_template_fails_setup() {
        let root = template_with("present", &[("x", "y")]);
        let mut mgr = FilesystemStateManager::new(root.path());
        let mut task = task_for(root.path(), "absent");
        assert!(!mgr.setup(&mut task).await);
    }

    #[tokio::test]
    async fn service_config_exposes_working_copy() {
        let root = template_with("cat", &[("a.txt", "one")]);
        let mut mgr = FilesystemStateManager::new(root.path());
        let mut task = task_for(root.path(), "cat");
        assert!(mgr.service_config_for_agent().is_empty());

        mgr.setup(&mut task).await;
        let config = mgr.service_config_for_agent();
        let dir = config["test_directory"].as_str().unwrap();
        assert!(dir.contains("backup_filesystem_cat_file_reorganize"));

        let env = mgr.service_verification_env();
        assert_eq!(env[0].0, "FILESYSTEM_TEST_DIR");

        mgr.cleanup(&task).await;
    }

    #[tokio::test]
    async fn cleanup_tolerates_already_removed_backup() {
        let root = template_with("cat", &[("a.txt", "1")]);
        let mut mgr = FilesystemStateManager::new(root.path());
        let mut task = task_for(root.path(), "cat");
        mgr.setup(&mut task).await;
        fs::remove_dir_all(task.test_directory.as_ref().unwrap()).unwrap();
        assert!(mgr.cleanup(&task).await);
    }
}
