//! GitHub state manager.
//!
//! Setup forks the task's reference repository into the evaluation
//! organisation and waits for the fork to exist; cleanup deletes it. The
//! agent reaches GitHub through the hosted MCP endpoint with the same
//! token the verifier receives.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mark_domain::{Error, InitialStateInfo, Result, Task, TrackedResource};

use crate::manager::{ResourceTracker, ServiceConfig, StateManager};

const GITHUB_API: &str = "https://api.github.com";

/// Forks are created asynchronously; poll until visible.
const FORK_POLL_DEADLINE: Duration = Duration::from_secs(60);
const FORK_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct GithubStateManager {
    token: String,
    eval_org: String,
    client: reqwest::Client,
    current_fork: Option<String>,
    tracker: ResourceTracker,
}

impl GithubStateManager {
    pub fn new(token: &str, eval_org: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("mcpmark")
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            token: token.to_string(),
            eval_org: eval_org.to_string(),
            client,
            current_fork: None,
            tracker: ResourceTracker::default(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let token = std::env::var("MCP_GITHUB_TOKEN").or_else(|_| std::env::var("GITHUB_TOKEN")).map_err(
            |_| Error::Config("Missing required environment variable: MCP_GITHUB_TOKEN".into()),
        )?;
        let org = std::env::var("GITHUB_EVAL_ORG")
            .map_err(|_| Error::Config("Missing required environment variable: GITHUB_EVAL_ORG".into()))?;
        Self::new(&token, &org)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{GITHUB_API}{path}"))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    /// The reference repository for a task, from `meta.json`
    /// (`"source_repo": "owner/name"`) or the category name as `owner/name`.
    fn source_repo(&self, task: &Task) -> Result<(String, String)> {
        let repo = task
            .meta
            .as_ref()
            .and_then(|m| m.get("source_repo"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| {
                std::env::var(format!(
                    "GITHUB_SOURCE_{}",
                    task.category_id.to_uppercase().replace('-', "_")
                ))
                .ok()
            })
            .ok_or_else(|| Error::StateSetup {
                service: "github".into(),
                message: format!("no source repository configured for task {}", task.name()),
            })?;
        repo.split_once('/')
            .map(|(owner, name)| (owner.to_string(), name.to_string()))
            .ok_or_else(|| Error::StateSetup {
                service: "github".into(),
                message: format!("source repository '{repo}' is not owner/name"),
            })
    }

    async fn repo_exists(&self, owner: &str, name: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET, &format!("/repos/{owner}/{name}"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn create_fork(&self, owner: &str, name: &str) -> Result<()> {
        let body = serde_json::json!({ "organization": self.eval_org });
        let response = self
            .request(reqwest::Method::POST, &format!("/repos/{owner}/{name}/forks"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::McpAuthentication("github".into()));
        }
        // 202 Accepted is the normal fork response.
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::StateSetup {
                service: "github".into(),
                message: format!("fork of {owner}/{name} failed: {status} - {text}"),
            });
        }
        Ok(())
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/repos/{owner}/{name}"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        // A fork that is already gone counts as cleaned up.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Error::StateCleanup {
            service: "github".into(),
            message: format!("delete of {owner}/{name} failed: {status}"),
        })
    }
}

#[async_trait]
impl StateManager for GithubStateManager {
    fn service_name(&self) -> &str {
        "github"
    }

    async fn initialize(&mut self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "/user")
            .send()
            .await
            .map_err(|e| Error::Config(format!("cannot reach GitHub API: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::McpAuthentication("github".into()));
        }
        tracing::info!(org = %self.eval_org, "github state manager initialized");
        Ok(())
    }

    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo> {
        let (owner, name) = self.source_repo(task)?;

        // A fork left over from a previous attempt must go first so the new
        // fork starts from the reference state.
        if self.repo_exists(&self.eval_org, &name).await? {
            tracing::info!(repo = %name, "removing stale fork from previous run");
            let org = self.eval_org.clone();
            self.delete_repo(&org, &name).await?;
        }

        self.create_fork(&owner, &name).await?;

        let deadline = tokio::time::Instant::now() + FORK_POLL_DEADLINE;
        loop {
            if self.repo_exists(&self.eval_org, &name).await? {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::StateSetup {
                    service: "github".into(),
                    message: format!("fork {}/{name} did not appear in time", self.eval_org),
                });
            }
            tokio::time::sleep(FORK_POLL_INTERVAL).await;
        }

        let fork_full_name = format!("{}/{name}", self.eval_org);
        tracing::info!(fork = %fork_full_name, "fork ready");
        self.current_fork = Some(fork_full_name.clone());
        self.tracker.track(
            "github_fork",
            &fork_full_name,
            vec![("source", Value::String(format!("{owner}/{name}")))],
        );

        let metadata = [
            ("source_repo".to_string(), Value::String(format!("{owner}/{name}"))),
            ("eval_org".to_string(), Value::String(self.eval_org.clone())),
        ]
        .into_iter()
        .collect();

        Ok(InitialStateInfo {
            state_id: fork_full_name.clone(),
            state_url: Some(format!("https://github.com/{fork_full_name}")),
            metadata,
        })
    }

    async fn cleanup_task_state(&mut self, _task: &Task) -> Result<()> {
        if let Some(fork) = self.current_fork.take() {
            if let Some((owner, name)) = fork.split_once('/') {
                self.delete_repo(owner, name).await?;
                tracing::info!(fork = %fork, "deleted fork");
            }
        }
        Ok(())
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if resource.kind == "github_fork" {
            if let Some((owner, name)) = resource.id.split_once('/') {
                self.delete_repo(owner, name).await?;
            }
        }
        Ok(())
    }

    fn tracker(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    fn service_config_for_agent(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        config.insert("github_token".into(), Value::String(self.token.clone()));
        config.insert("eval_org".into(), Value::String(self.eval_org.clone()));
        if let Some(fork) = &self.current_fork {
            config.insert("fork_repo".into(), Value::String(fork.clone()));
        }
        config
    }

    fn service_verification_env(&self) -> Vec<(String, String)> {
        vec![
            ("MCP_GITHUB_TOKEN".to_string(), self.token.clone()),
            ("GITHUB_EVAL_ORG".to_string(), self.eval_org.clone()),
        ]
    }
}
