//! Notion state manager.
//!
//! The baseline is a template page. Setup duplicates it under the eval
//! parent page and records the duplicated page id; the verifier receives
//! that id on its command line. Cleanup archives the duplicate, restoring
//! the workspace to its pre-evaluation shape.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mark_domain::{Error, InitialStateInfo, Result, Task, TrackedResource};

use crate::manager::{ResourceTracker, ServiceConfig, StateManager};

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

pub struct NotionStateManager {
    api_key: String,
    /// Parent page under which duplicates are created.
    eval_parent_page_id: String,
    client: reqwest::Client,
    duplicated_page_id: Option<String>,
    tracker: ResourceTracker,
}

impl NotionStateManager {
    pub fn new(api_key: &str, eval_parent_page_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            api_key: api_key.to_string(),
            eval_parent_page_id: eval_parent_page_id.to_string(),
            client,
            duplicated_page_id: None,
            tracker: ResourceTracker::default(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("NOTION_API_KEY")
            .map_err(|_| Error::Config("Missing required environment variable: NOTION_API_KEY".into()))?;
        let parent = std::env::var("NOTION_EVAL_PARENT_PAGE_ID").map_err(|_| {
            Error::Config("Missing required environment variable: NOTION_EVAL_PARENT_PAGE_ID".into())
        })?;
        Self::new(&key, &parent)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{NOTION_API}{path}"))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .header("Content-Type", "application/json")
    }

    async fn send(&self, builder: reqwest::RequestBuilder, operation: &str) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("notion {operation}: {e}")))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::McpAuthentication("notion".into()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::StateSetup {
                service: "notion".into(),
                message: format!("{operation} failed: {status} - {text}"),
            });
        }
        response
            .json()
            .await
            .map_err(|e| Error::Http(format!("notion {operation}: invalid body: {e}")))
    }

    /// Template page id for a task: `meta.json` may pin one, otherwise the
    /// category-level env var `NOTION_TEMPLATE_<CATEGORY>` applies.
    fn template_page_id(&self, task: &Task) -> Result<String> {
        if let Some(id) = task
            .meta
            .as_ref()
            .and_then(|m| m.get("template_page_id"))
            .and_then(|v| v.as_str())
        {
            return Ok(id.to_string());
        }
        let var = format!("NOTION_TEMPLATE_{}", task.category_id.to_uppercase());
        std::env::var(&var).map_err(|_| Error::StateSetup {
            service: "notion".into(),
            message: format!("no template page for task {} (set {var})", task.name()),
        })
    }

    /// Duplicate the template page under the eval parent. The duplicate
    /// carries the template's title and icon plus a per-run suffix so stale
    /// duplicates are recognisable.
    async fn duplicate_page(&self, template_id: &str, task: &Task) -> Result<Value> {
        let template = self
            .send(
                self.request(reqwest::Method::GET, &format!("/pages/{template_id}")),
                "retrieve template page",
            )
            .await?;

        let title = template
            .pointer("/properties/title/title/0/plain_text")
            .and_then(|v| v.as_str())
            .unwrap_or(&task.category_id);

        let body = serde_json::json!({
            "parent": { "page_id": self.eval_parent_page_id },
            "icon": template.get("icon"),
            "properties": {
                "title": {
                    "title": [{
                        "text": { "content": format!("{title} (eval {})", task.task_id) }
                    }]
                }
            }
        });
        self.send(
            self.request(reqwest::Method::POST, "/pages").json(&body),
            "duplicate template page",
        )
        .await
    }

    async fn archive_page(&self, page_id: &str) -> Result<()> {
        let body = serde_json::json!({ "archived": true });
        // Archiving an already-archived page succeeds; a missing page is
        // treated as already cleaned up.
        match self
            .send(
                self.request(reqwest::Method::PATCH, &format!("/pages/{page_id}")).json(&body),
                "archive duplicated page",
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::StateSetup { message, .. }) if message.contains("404") => {
                tracing::debug!(page_id, "duplicated page already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StateManager for NotionStateManager {
    fn service_name(&self) -> &str {
        "notion"
    }

    async fn initialize(&mut self) -> Result<()> {
        // Credential check: the bot user endpoint requires nothing but a
        // valid token.
        self.send(self.request(reqwest::Method::GET, "/users/me"), "validate token")
            .await?;
        tracing::info!("notion state manager initialized");
        Ok(())
    }

    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo> {
        let template_id = self.template_page_id(task)?;
        let duplicated = self.duplicate_page(&template_id, task).await?;

        let page_id = duplicated
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::StateSetup {
                service: "notion".into(),
                message: "duplicate response carried no page id".into(),
            })?
            .to_string();
        let page_url = duplicated.get("url").and_then(|v| v.as_str()).map(String::from);

        tracing::info!(task = %task.name(), page_id = %page_id, "duplicated template page");
        self.duplicated_page_id = Some(page_id.clone());
        self.tracker.track(
            "notion_page",
            &page_id,
            vec![("template", Value::String(template_id.clone()))],
        );

        let metadata = [
            ("template_page_id".to_string(), Value::String(template_id)),
            (
                "duplicated_page_url".to_string(),
                page_url.clone().map(Value::String).unwrap_or(Value::Null),
            ),
        ]
        .into_iter()
        .collect();

        Ok(InitialStateInfo {
            state_id: page_id,
            state_url: page_url,
            metadata,
        })
    }

    async fn cleanup_task_state(&mut self, task: &Task) -> Result<()> {
        let page_id = self
            .duplicated_page_id
            .take()
            .or_else(|| task.initial_state_id().map(String::from));
        if let Some(page_id) = page_id {
            self.archive_page(&page_id).await?;
            tracing::info!(page_id = %page_id, "archived duplicated page");
        }
        Ok(())
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if resource.kind == "notion_page" {
            self.archive_page(&resource.id).await?;
        }
        Ok(())
    }

    fn tracker(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    fn service_config_for_agent(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        config.insert("notion_key".into(), Value::String(self.api_key.clone()));
        if let Some(page_id) = &self.duplicated_page_id {
            config.insert("duplicated_page_id".into(), Value::String(page_id.clone()));
        }
        config
    }

    fn service_verification_env(&self) -> Vec<(String, String)> {
        vec![("NOTION_API_KEY".to_string(), self.api_key.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mark_domain::ServiceKind;
    use std::path::PathBuf;

    fn task_with_meta(meta: Option<Value>) -> Task {
        let mut task = Task::new(
            ServiceKind::Notion,
            "it_trouble_shooting_hub",
            "security_audit_ticket",
            PathBuf::from("description.md"),
            PathBuf::from("verify.py"),
        );
        task.meta = meta;
        task
    }

    #[test]
    fn template_id_prefers_task_meta() {
        let mgr = NotionStateManager::new("secret", "parent-page").unwrap();
        let task = task_with_meta(Some(serde_json::json!({
            "template_page_id": "abc-123"
        })));
        assert_eq!(mgr.template_page_id(&task).unwrap(), "abc-123");
    }

    #[test]
    fn template_id_falls_back_to_env() {
        let mgr = NotionStateManager::new("secret", "parent-page").unwrap();
        std::env::set_var("NOTION_TEMPLATE_IT_TROUBLE_SHOOTING_HUB", "env-template");
        let task = task_with_meta(None);
        assert_eq!(mgr.template_page_id(&task).unwrap(), "env-template");
        std::env::remove_var("NOTION_TEMPLATE_IT_TROUBLE_SHOOTING_HUB");
    }

    #[test]
    fn missing_template_is_setup_error() {
        let mgr = NotionStateManager::new("secret", "parent-page").unwrap();
        let mut task = task_with_meta(None);
        task.category_id = "japan_travel_planner".into();
        std::env::remove_var("NOTION_TEMPLATE_JAPAN_TRAVEL_PLANNER");
        let err = mgr.template_page_id(&task).unwrap_err();
        assert!(matches!(err, Error::StateSetup { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn service_config_carries_key() {
        let mgr = NotionStateManager::new("secret", "parent-page").unwrap();
        let config = mgr.service_config_for_agent();
        assert_eq!(config["notion_key"], "secret");
    }
}
