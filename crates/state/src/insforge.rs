//! Insforge state manager.
//!
//! Insforge exposes a hosted backend over REST. Setup runs the task's
//! preparation script against it; cleanup is delegated to the task's own
//! scripts since the backend is multi-tenant and tracks per-key state.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mark_domain::{Error, InitialStateInfo, Result, Task};

use crate::manager::{ResourceTracker, ServiceConfig, StateManager};
use crate::postgres::state_id_for;
use crate::prepare::run_prepare_script;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct InsforgeStateManager {
    api_key: String,
    backend_url: String,
    client: reqwest::Client,
    current_state_id: Option<String>,
    tracker: ResourceTracker,
}

impl InsforgeStateManager {
    pub fn new(api_key: &str, backend_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.to_string(),
            backend_url: backend_url.trim_end_matches('/').to_string(),
            client,
            current_state_id: None,
            tracker: ResourceTracker::default(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("INSFORGE_API_KEY")
            .map_err(|_| Error::Config("Missing required environment variable: INSFORGE_API_KEY".into()))?;
        let url = std::env::var("INSFORGE_BACKEND_URL")
            .map_err(|_| Error::Config("Missing required environment variable: INSFORGE_BACKEND_URL".into()))?;
        Self::new(&key, &url)
    }

    fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("INSFORGE_BACKEND_URL".to_string(), self.backend_url.clone()),
            ("INSFORGE_API_KEY".to_string(), self.api_key.clone()),
        ]
    }

    /// Reachability probe. Any HTTP response, 404 included, proves the
    /// backend is up; an authenticated endpoint is tried as a fallback.
    async fn test_connection(&self) -> Result<()> {
        let health = format!("{}/api/health", self.backend_url);
        if let Ok(resp) = self.client.get(&health).send().await {
            tracing::debug!(status = %resp.status(), "insforge connectivity probe");
            return Ok(());
        }
        let session = format!("{}/api/auth/sessions/current", self.backend_url);
        let resp = self
            .client
            .get(&session)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::Config(format!("cannot connect to Insforge backend: {e}")))?;
        tracing::debug!(status = %resp.status(), "insforge auth probe");
        Ok(())
    }
}

#[async_trait]
impl StateManager for InsforgeStateManager {
    fn service_name(&self) -> &str {
        "insforge"
    }

    async fn initialize(&mut self) -> Result<()> {
        self.test_connection().await?;
        tracing::info!("insforge state manager initialized");
        Ok(())
    }

    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo> {
        let state_id = state_id_for(task);
        run_prepare_script(task, &self.env_vars()).await?;

        self.current_state_id = Some(state_id.clone());
        let metadata = [
            ("state_id".to_string(), Value::String(state_id.clone())),
            ("category_id".to_string(), Value::String(task.category_id.clone())),
            ("task_id".to_string(), Value::String(task.task_id.clone())),
            ("task_name".to_string(), Value::String(task.name())),
        ]
        .into_iter()
        .collect();

        Ok(InitialStateInfo {
            state_id,
            state_url: Some(self.backend_url.clone()),
            metadata,
        })
    }

    async fn cleanup_task_state(&mut self, task: &Task) -> Result<()> {
        // Resource teardown is owned by the task's own cleanup scripts;
        // here we only drop the per-task context.
        tracing::info!(task = %task.name(), "insforge task context cleared");
        self.current_state_id = None;
        Ok(())
    }

    fn tracker(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    fn service_config_for_agent(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        config.insert("backend_url".into(), Value::String(self.backend_url.clone()));
        config.insert("api_key".into(), Value::String(self.api_key.clone()));
        if let Some(state_id) = &self.current_state_id {
            config.insert("state_id".into(), Value::String(state_id.clone()));
        }
        config
    }

    fn service_verification_env(&self) -> Vec<(String, String)> {
        self.env_vars()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_is_normalised() {
        let mgr = InsforgeStateManager::new("key", "https://app.insforge.app/").unwrap();
        assert_eq!(mgr.backend_url, "https://app.insforge.app");
    }

    #[test]
    fn verification_env_pairs() {
        let mgr = InsforgeStateManager::new("secret", "https://app.insforge.app").unwrap();
        let vars = mgr.service_verification_env();
        assert_eq!(vars[0], ("INSFORGE_BACKEND_URL".into(), "https://app.insforge.app".into()));
        assert_eq!(vars[1], ("INSFORGE_API_KEY".into(), "secret".into()));
    }

    #[test]
    fn from_env_requires_credentials() {
        std::env::remove_var("INSFORGE_API_KEY");
        std::env::remove_var("INSFORGE_BACKEND_URL");
        assert!(matches!(
            InsforgeStateManager::from_env(),
            Err(Error::Config(_))
        ));
    }
}
