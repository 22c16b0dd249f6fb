//! Supabase state manager.
//!
//! Same PostgreSQL backend as the plain postgres service, fronted by a
//! PostgREST API that the Supabase MCP server talks to. State bookkeeping
//! happens directly against the database; the API URL and key are what the
//! agent and verifier receive.

use async_trait::async_trait;
use serde_json::Value;

use mark_domain::{Error, InitialStateInfo, Result, Task};

use crate::manager::{ResourceTracker, ServiceConfig, StateManager};
use crate::postgres::{create_pg_initial_state, PgConfig, PgCore, PgTaskContext};

pub struct SupabaseStateManager {
    core: PgCore,
    api_url: String,
    api_key: String,
    context: Option<PgTaskContext>,
    tracker: ResourceTracker,
}

impl SupabaseStateManager {
    pub fn new(api_url: &str, api_key: &str, pg: PgConfig) -> Self {
        Self {
            core: PgCore::new(pg),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            context: None,
            tracker: ResourceTracker::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("SUPABASE_API_URL")
            .map_err(|_| Error::Config("Missing required environment variable: SUPABASE_API_URL".into()))?;
        let api_key = std::env::var("SUPABASE_API_KEY")
            .map_err(|_| Error::Config("Missing required environment variable: SUPABASE_API_KEY".into()))?;
        // Supabase CLI defaults, overridable through the POSTGRES_* family.
        let pg = PgConfig {
            host: std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".into()),
            port: std::env::var("POSTGRES_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(54322),
            user: std::env::var("POSTGRES_USERNAME").unwrap_or_else(|_| "postgres".into()),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or_else(|_| "postgres".into()),
            database: std::env::var("POSTGRES_DATABASE").unwrap_or_else(|_| "postgres".into()),
        };
        Ok(Self::new(&api_url, &api_key, pg))
    }

    fn prepare_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("SUPABASE_API_URL".to_string(), self.api_url.clone()),
            ("SUPABASE_API_KEY".to_string(), self.api_key.clone()),
        ];
        env.extend(self.core.config.env_vars());
        env
    }
}

#[async_trait]
impl StateManager for SupabaseStateManager {
    fn service_name(&self) -> &str {
        "supabase"
    }

    async fn initialize(&mut self) -> Result<()> {
        self.core.connect().await?;
        tracing::info!("supabase state manager initialized");
        Ok(())
    }

    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo> {
        let prepare_env = self.prepare_env();
        let context = create_pg_initial_state(&self.core, task, &prepare_env).await?;
        let info = InitialStateInfo {
            state_id: context.state_id.clone(),
            state_url: Some(self.api_url.clone()),
            metadata: context.metadata(task),
        };
        self.context = Some(context);
        Ok(info)
    }

    /// Drops every non-baseline table, including tables the agent created
    /// as part of its answer. Verification has already run by cleanup time,
    /// so the verdict is unaffected; the isolation guarantee wins.
    async fn cleanup_task_state(&mut self, task: &Task) -> Result<()> {
        let failures = self.core.drop_non_baseline().await?;
        let schema = self
            .context
            .take()
            .map(|c| c.schema)
            .unwrap_or_else(|| task.category_id.clone());
        self.core.drop_schema(&schema).await?;
        if failures > 0 {
            return Err(Error::StateCleanup {
                service: "supabase".into(),
                message: format!("{failures} table(s) could not be dropped"),
            });
        }
        Ok(())
    }

    fn tracker(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    fn service_config_for_agent(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        config.insert("api_url".into(), Value::String(self.api_url.clone()));
        config.insert("api_key".into(), Value::String(self.api_key.clone()));
        // PostgREST serves `public` unless the task pinned its own schema.
        let schema = self
            .context
            .as_ref()
            .map(|c| c.schema.clone())
            .unwrap_or_else(|| "public".into());
        config.insert("schema".into(), Value::String(schema));
        if let Some(context) = &self.context {
            config.insert("state_id".into(), Value::String(context.state_id.clone()));
        }
        config
    }

    fn service_verification_env(&self) -> Vec<(String, String)> {
        self.prepare_env()
    }
}
