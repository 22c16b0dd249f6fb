//! WebArena state manager.
//!
//! WebArena tasks run against a containerised web application. Setup picks
//! the category's image/container/port triple, starts a fresh container and
//! polls the HTTP endpoint until ready; shopping images additionally need a
//! Magento configuration pass before they serve the right base URL. Cleanup
//! stops and removes the container. When an external-endpoints file is
//! supplied the Docker lifecycle is disabled entirely and tasks run against
//! the remote URLs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mark_domain::{Error, InitialStateInfo, Result, Task, TrackedResource};

use crate::manager::{ResourceTracker, ServiceConfig, StateManager};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Docker config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub image_name: String,
    pub container_name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub readiness_path: String,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub image_tar_path: Option<PathBuf>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image_name: "shopping_admin_final_0719".into(),
            container_name: "shopping_admin".into(),
            host_port: 7780,
            container_port: 80,
            readiness_path: "/admin".into(),
            readiness_timeout: Duration::from_secs(600),
            readiness_poll_interval: Duration::from_secs(2),
            image_tar_path: None,
        }
    }
}

impl DockerConfig {
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.host_port)
    }

    pub fn entry_url(&self) -> String {
        let base = self.base_url();
        match self.readiness_path.as_str() {
            "" | "/" => base,
            path => format!("{base}{path}"),
        }
    }
}

/// Category-specific image/container/port/readiness mapping.
const CATEGORY_CONFIGS: &[(&str, &str, &str, u16, &str)] = &[
    ("reddit", "postmill-populated-exposed-withimg", "forum", 9999, "/"),
    ("shopping", "shopping_final_0712", "shopping", 7770, "/"),
    ("shopping_admin", "shopping_admin_final_0719", "shopping_admin", 7780, "/admin"),
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebArenaStateManager {
    config: DockerConfig,
    skip_cleanup: bool,
    external_endpoints: HashMap<String, String>,
    http: reqwest::Client,
    tracker: ResourceTracker,
}

impl WebArenaStateManager {
    pub fn new(config: DockerConfig, skip_cleanup: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            config,
            skip_cleanup,
            external_endpoints: HashMap::new(),
            http,
            tracker: ResourceTracker::default(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let mut config = DockerConfig::default();
        if let Ok(tar) = std::env::var("WEBARENA_IMAGE_TAR") {
            config.image_tar_path = Some(PathBuf::from(tar));
        }
        let skip_cleanup = std::env::var("WEBARENA_SKIP_CLEANUP")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let mut manager = Self::new(config, skip_cleanup)?;
        if let Ok(endpoints_file) = std::env::var("WEBARENA_ENDPOINTS_FILE") {
            manager.load_external_endpoints(&PathBuf::from(endpoints_file))?;
        }
        Ok(manager)
    }

    fn uses_external_endpoints(&self) -> bool {
        !self.external_endpoints.is_empty()
    }

    /// Parse an endpoints file of `key: url` lines; the `sandbox_id` header
    /// line and blanks are skipped.
    pub fn load_external_endpoints(&mut self, path: &std::path::Path) -> Result<()> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read endpoints file {}: {e}", path.display()))
        })?;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("sandbox_id") {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let url = value.trim().trim_end_matches('/');
                if !url.is_empty() {
                    self.external_endpoints
                        .insert(key.trim().to_string(), url.to_string());
                }
            }
        }
        tracing::info!(
            count = self.external_endpoints.len(),
            "using external WebArena endpoints, Docker lifecycle disabled"
        );
        Ok(())
    }

    fn external_url_for(&self, category: &str) -> Option<String> {
        if let Some(url) = self.external_endpoints.get(category) {
            return Some(url.clone());
        }
        for key in ["homepage", "gitlab", "wiki", "map"] {
            if let Some(url) = self.external_endpoints.get(key) {
                return Some(url.clone());
            }
        }
        None
    }

    /// Point the Docker config at the task's category.
    fn apply_category_config(&mut self, category: &str) {
        if let Some((_, image, container, port, readiness)) = CATEGORY_CONFIGS
            .iter()
            .find(|(cat, ..)| *cat == category)
        {
            tracing::info!(category, image = %image, container = %container, port = %port, "category docker config selected");
            self.config.image_name = image.to_string();
            self.config.container_name = container.to_string();
            self.config.host_port = *port;
            self.config.readiness_path = readiness.to_string();
        }
    }

    // ── Docker helpers ────────────────────────────────────────────

    async fn docker(&self, args: &[&str]) -> Result<std::process::Output> {
        tracing::debug!(args = ?args, "running docker command");
        tokio::process::Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| Error::StateSetup {
                service: "playwright_webarena".into(),
                message: format!("failed to run docker: {e}"),
            })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self
            .docker(&["images", "--format", "{{.Repository}}:{{.Tag}}"])
            .await?;
        let (target_repo, target_tag) = match image.split_once(':') {
            Some((repo, tag)) => (repo, tag),
            None => (image, "latest"),
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|line| {
            let (repo, tag) = match line.trim().split_once(':') {
                Some((repo, tag)) => (repo, tag),
                None => (line.trim(), "latest"),
            };
            repo == target_repo && tag == target_tag
        }))
    }

    async fn load_image_from_tar_if_needed(&self) -> Result<()> {
        let Some(tar_path) = &self.config.image_tar_path else {
            return Ok(());
        };
        if self.image_exists(&self.config.image_name).await? {
            return Ok(());
        }
        tracing::info!(tar = %tar_path.display(), "loading docker image from tar");
        let tar = tar_path.display().to_string();
        let output = self.docker(&["load", "--input", tar.as_str()]).await?;
        if !output.status.success() {
            return Err(Error::StateSetup {
                service: "playwright_webarena".into(),
                message: format!(
                    "docker load failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    /// Stop and remove; errors ignored when the container never existed.
    async fn stop_and_remove_container(&self, name: &str) -> Result<()> {
        self.docker(&["stop", name]).await?;
        self.docker(&["rm", name]).await?;
        Ok(())
    }

    async fn docker_exec(&self, args: &[&str]) -> Result<std::process::Output> {
        let mut full = vec!["exec", self.config.container_name.as_str()];
        full.extend_from_slice(args);
        self.docker(&full).await
    }

    // ── Readiness ─────────────────────────────────────────────────

    async fn port_open(&self, port: u16) -> bool {
        tokio::time::timeout(
            Duration::from_secs(1),
            tokio::net::TcpStream::connect(("localhost", port)),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
    }

    async fn http_ready(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(_) => false,
        }
    }

    /// Wait for the entry URL to come up: first the TCP port, then HTTP.
    async fn wait_until_ready(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.readiness_timeout;
        let url = self.config.entry_url();

        while tokio::time::Instant::now() < deadline {
            if self.port_open(self.config.host_port).await {
                break;
            }
            tokio::time::sleep(self.config.readiness_poll_interval).await;
        }
        while tokio::time::Instant::now() < deadline {
            if self.http_ready(&url).await {
                tracing::info!(url = %url, "webarena endpoint ready");
                return true;
            }
            tokio::time::sleep(self.config.readiness_poll_interval).await;
        }
        tracing::error!(url = %url, "timed out waiting for webarena endpoint");
        false
    }

    async fn wait_for_mysql(&self) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
        while tokio::time::Instant::now() < deadline {
            if let Ok(output) = self
                .docker_exec(&["mysql", "-u", "magentouser", "-pMyPassword", "magentodb", "-e", "SELECT 1;"])
                .await
            {
                if output.status.success() {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        tracing::warn!("mysql not ready before deadline");
        false
    }

    async fn wait_for_magento(&self) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(180);
        while tokio::time::Instant::now() < deadline {
            if let Ok(output) = self
                .docker_exec(&["/var/www/magento2/bin/magento", "config:show", "web/unsecure/base_url"])
                .await
            {
                if output.status.success() {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        tracing::warn!("magento not ready before deadline");
        false
    }

    /// Point Magento at the container's public URL and flush caches. For
    /// the admin image, password rotation is also disabled so the seeded
    /// credentials keep working.
    async fn configure_magento(&self, admin: bool) {
        if !self.wait_for_mysql().await {
            tracing::warn!("configuring magento without mysql confirmation");
        }
        if !self.wait_for_magento().await {
            tracing::warn!("configuring magento without readiness confirmation");
        }

        let base_url = self.config.base_url();
        let sql = format!(
            "UPDATE core_config_data SET value='{base_url}/' \
             WHERE path IN ('web/secure/base_url', 'web/unsecure/base_url');"
        );
        let base_url_arg = format!("--base-url={base_url}");

        let mut steps: Vec<Vec<&str>> = vec![
            vec![
                "/var/www/magento2/bin/magento",
                "setup:store-config:set",
                base_url_arg.as_str(),
            ],
            vec![
                "mysql",
                "-u",
                "magentouser",
                "-pMyPassword",
                "magentodb",
                "-e",
                sql.as_str(),
            ],
        ];
        if admin {
            steps.push(vec![
                "/var/www/magento2/bin/magento",
                "config:set",
                "admin/security/password_is_forced",
                "0",
            ]);
            steps.push(vec![
                "/var/www/magento2/bin/magento",
                "config:set",
                "admin/security/password_lifetime",
                "0",
            ]);
        }
        steps.push(vec!["/var/www/magento2/bin/magento", "cache:flush"]);

        for step in steps {
            match self.docker_exec(&step).await {
                Ok(output) if output.status.success() => {
                    tracing::debug!(step = ?step, "magento setup step ok");
                }
                Ok(output) => {
                    tracing::warn!(
                        step = ?step,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "magento setup step failed"
                    );
                }
                Err(e) => {
                    tracing::warn!(step = ?step, error = %e, "magento setup step failed to run");
                }
            }
        }
    }
}

#[async_trait]
impl StateManager for WebArenaStateManager {
    fn service_name(&self) -> &str {
        "playwright_webarena"
    }

    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo> {
        if self.uses_external_endpoints() {
            let base_url = self.external_url_for(&task.category_id).ok_or_else(|| {
                Error::StateSetup {
                    service: "playwright_webarena".into(),
                    message: format!("no external endpoint for category '{}'", task.category_id),
                }
            })?;
            tracing::info!(category = %task.category_id, url = %base_url, "external sandbox selected");
            let metadata = [
                ("category".to_string(), Value::String(task.category_id.clone())),
                ("base_url".to_string(), Value::String(base_url.clone())),
                ("source".to_string(), Value::String("external_sandbox".into())),
            ]
            .into_iter()
            .collect();
            return Ok(InitialStateInfo {
                state_id: format!("external_{}", task.category_id),
                state_url: Some(base_url),
                metadata,
            });
        }

        self.apply_category_config(&task.category_id);
        self.load_image_from_tar_if_needed().await?;

        // Stale containers from crashed runs would collide on name and port.
        self.stop_and_remove_container(&self.config.container_name.clone())
            .await?;

        let container_name = self.config.container_name.clone();
        let image_name = self.config.image_name.clone();
        let port_mapping = format!("{}:{}", self.config.host_port, self.config.container_port);
        let output = self
            .docker(&[
                "run",
                "--name",
                container_name.as_str(),
                "-p",
                port_mapping.as_str(),
                "-d",
                image_name.as_str(),
            ])
            .await?;
        if !output.status.success() {
            return Err(Error::StateSetup {
                service: "playwright_webarena".into(),
                message: format!(
                    "failed to start container: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!(
            container = %self.config.container_name,
            id = %container_id,
            "started webarena container"
        );

        match self.config.container_name.as_str() {
            "shopping" => self.configure_magento(false).await,
            "shopping_admin" => self.configure_magento(true).await,
            _ => {}
        }

        if !self.wait_until_ready().await {
            self.stop_and_remove_container(&self.config.container_name.clone())
                .await?;
            return Err(Error::StateSetup {
                service: "playwright_webarena".into(),
                message: format!("readiness deadline expired for {}", self.config.entry_url()),
            });
        }

        let entry_url = self.config.entry_url();
        self.tracker.track(
            "docker_container",
            &self.config.container_name.clone(),
            vec![
                ("image", Value::String(self.config.image_name.clone())),
                ("host_port", Value::Number(self.config.host_port.into())),
                ("base_url", Value::String(entry_url.clone())),
            ],
        );

        let metadata = [
            ("docker_image".to_string(), Value::String(self.config.image_name.clone())),
            ("container_name".to_string(), Value::String(self.config.container_name.clone())),
            ("host_port".to_string(), Value::Number(self.config.host_port.into())),
            ("base_url".to_string(), Value::String(entry_url.clone())),
            ("category".to_string(), Value::String(task.category_id.clone())),
        ]
        .into_iter()
        .collect();

        Ok(InitialStateInfo {
            state_id: self.config.container_name.clone(),
            state_url: Some(entry_url),
            metadata,
        })
    }

    async fn cleanup_task_state(&mut self, _task: &Task) -> Result<()> {
        if self.uses_external_endpoints() {
            return Ok(());
        }
        if self.skip_cleanup {
            tracing::info!(
                container = %self.config.container_name,
                url = %self.config.entry_url(),
                "skipping container cleanup, container left running"
            );
            return Ok(());
        }
        self.stop_and_remove_container(&self.config.container_name.clone())
            .await
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if self.uses_external_endpoints() || self.skip_cleanup {
            return Ok(());
        }
        if resource.kind == "docker_container" {
            self.stop_and_remove_container(&resource.id.clone()).await?;
        }
        Ok(())
    }

    fn tracker(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    fn service_config_for_agent(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        if self.uses_external_endpoints() {
            config.insert("environment".into(), Value::String("webarena-external".into()));
            config.insert(
                "endpoints".into(),
                Value::Object(
                    self.external_endpoints
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ),
            );
        } else {
            config.insert("environment".into(), Value::String("webarena-docker".into()));
            config.insert("base_url".into(), Value::String(self.config.entry_url()));
            config.insert(
                "docker".into(),
                serde_json::json!({
                    "image": self.config.image_name,
                    "container": self.config.container_name,
                    "host_port": self.config.host_port,
                    "container_port": self.config.container_port,
                }),
            );
        }
        config
    }

    fn service_verification_env(&self) -> Vec<(String, String)> {
        vec![("PLAYWRIGHT_BASE_URL".to_string(), self.config.entry_url())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn entry_url_handles_root_and_path() {
        let mut config = DockerConfig::default();
        assert_eq!(config.entry_url(), "http://localhost:7780/admin");
        config.readiness_path = "/".into();
        assert_eq!(config.entry_url(), "http://localhost:7780");
    }

    #[test]
    fn category_config_applies() {
        let mut mgr = WebArenaStateManager::new(DockerConfig::default(), false).unwrap();
        mgr.apply_category_config("shopping");
        assert_eq!(mgr.config.image_name, "shopping_final_0712");
        assert_eq!(mgr.config.container_name, "shopping");
        assert_eq!(mgr.config.host_port, 7770);
        assert_eq!(mgr.config.readiness_path, "/");
    }

    #[test]
    fn unknown_category_keeps_defaults() {
        let mut mgr = WebArenaStateManager::new(DockerConfig::default(), false).unwrap();
        mgr.apply_category_config("gitlab");
        assert_eq!(mgr.config.image_name, "shopping_admin_final_0719");
    }

    #[test]
    fn endpoints_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sandbox_id: abc123").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "reddit: http://10.0.0.5:9999/").unwrap();
        writeln!(file, "shopping: http://10.0.0.5:7770").unwrap();
        writeln!(file, "broken line without separator").unwrap();

        let mut mgr = WebArenaStateManager::new(DockerConfig::default(), false).unwrap();
        mgr.load_external_endpoints(file.path()).unwrap();
        assert!(mgr.uses_external_endpoints());
        assert_eq!(mgr.external_endpoints["reddit"], "http://10.0.0.5:9999");
        assert_eq!(mgr.external_endpoints.len(), 2);
    }

    #[test]
    fn external_url_falls_back_to_homepage() {
        let mut mgr = WebArenaStateManager::new(DockerConfig::default(), false).unwrap();
        mgr.external_endpoints
            .insert("homepage".into(), "http://sandbox".into());
        assert_eq!(mgr.external_url_for("reddit").unwrap(), "http://sandbox");
    }

    #[test]
    fn service_config_shapes() {
        let mgr = WebArenaStateManager::new(DockerConfig::default(), false).unwrap();
        let config = mgr.service_config_for_agent();
        assert_eq!(config["environment"], "webarena-docker");
        assert_eq!(config["docker"]["host_port"], 7780);
    }
}
