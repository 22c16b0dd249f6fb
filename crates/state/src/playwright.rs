//! Standalone Playwright state manager.
//!
//! Browser tasks run against hosted evaluation pages; no browser is
//! launched during setup. Setup resolves the category's test URL so the
//! agent knows where to navigate, and the most recent manager instance is
//! kept process-wide so verification can find the live browser endpoint
//! written by the MCP server.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use mark_domain::{InitialStateInfo, Result, Task, TrackedResource};

use crate::manager::{ResourceTracker, ServiceConfig, StateManager};

/// Endpoint of the last active browser session, shared process-wide so the
/// verifier can reconnect to the exact session the agent used.
static ACTIVE_SESSION: Mutex<Option<String>> = Mutex::new(None);

/// Hosted test environments per task category.
fn default_test_environments() -> HashMap<String, String> {
    [
        ("element_extraction", "https://mcp-eval-website.vercel.app/extraction"),
        ("form_interaction", "https://mcp-eval-website.vercel.app/forms/"),
        ("web_navigation", "https://mcp-eval-website.vercel.app/navigation"),
        ("eval_web", "https://mcp-eval-website.vercel.app/"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub struct PlaywrightStateManager {
    browser: String,
    headless: bool,
    viewport_width: u32,
    viewport_height: u32,
    test_environments: HashMap<String, String>,
    current_test_url: Option<String>,
    /// File the MCP server writes its wsEndpoint to, for verification reuse.
    ws_endpoint_file: Option<String>,
    tracker: ResourceTracker,
}

impl PlaywrightStateManager {
    pub fn new(browser: &str, headless: bool) -> Self {
        Self {
            browser: browser.to_string(),
            headless,
            viewport_width: 1280,
            viewport_height: 720,
            test_environments: default_test_environments(),
            current_test_url: None,
            ws_endpoint_file: std::env::var("MCP_PW_WS_FILE").ok(),
            tracker: ResourceTracker::default(),
        }
    }

    pub fn from_env() -> Self {
        let browser =
            std::env::var("PLAYWRIGHT_BROWSER").unwrap_or_else(|_| "chromium".to_string());
        let headless = std::env::var("PLAYWRIGHT_HEADLESS")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        Self::new(&browser, headless)
    }

    /// Record the browser session endpoint for the current task. The MCP
    /// server owns the browser; this is only a pointer to it.
    pub fn remember_session(endpoint: &str) {
        tracing::debug!(endpoint, "remembering active browser session");
        *ACTIVE_SESSION.lock() = Some(endpoint.to_string());
    }

    /// Endpoint of the most recently active browser session, if any.
    pub fn last_session() -> Option<String> {
        ACTIVE_SESSION.lock().clone()
    }
}

#[async_trait]
impl StateManager for PlaywrightStateManager {
    fn service_name(&self) -> &str {
        "playwright"
    }

    async fn create_initial_state(&mut self, task: &mut Task) -> Result<InitialStateInfo> {
        let test_url = self.test_environments.get(&task.category_id).cloned();
        if test_url.is_none() {
            tracing::warn!(
                category = %task.category_id,
                "no test environment defined for category"
            );
        }
        self.current_test_url = test_url.clone();

        let context_id = format!(
            "context_{}_{}_{}",
            task.category_id,
            task.task_id,
            chrono::Local::now().format("%s")
        );
        self.tracker.track(
            "browser_context",
            &context_id,
            vec![
                ("task_name", Value::String(task.name())),
                (
                    "test_url",
                    test_url.clone().map(Value::String).unwrap_or(Value::Null),
                ),
            ],
        );

        let metadata = [
            ("browser".to_string(), Value::String(self.browser.clone())),
            ("headless".to_string(), Value::Bool(self.headless)),
            (
                "test_url".to_string(),
                test_url.clone().map(Value::String).unwrap_or(Value::Null),
            ),
            ("task_category".to_string(), Value::String(task.category_id.clone())),
        ]
        .into_iter()
        .collect();

        Ok(InitialStateInfo {
            state_id: context_id,
            state_url: test_url,
            metadata,
        })
    }

    async fn cleanup_task_state(&mut self, task: &Task) -> Result<()> {
        // The MCP server owns the real browser; dropping the session pointer
        // is the whole cleanup.
        *ACTIVE_SESSION.lock() = None;
        self.current_test_url = None;
        tracing::debug!(task = %task.name(), "cleared browser session state");
        Ok(())
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if resource.kind == "browser_context" {
            tracing::debug!(id = %resource.id, "browser context released");
        }
        Ok(())
    }

    fn tracker(&mut self) -> &mut ResourceTracker {
        &mut self.tracker
    }

    fn service_config_for_agent(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        config.insert("browser".into(), Value::String(self.browser.clone()));
        config.insert("headless".into(), Value::Bool(self.headless));
        config.insert("viewport_width".into(), Value::Number(self.viewport_width.into()));
        config.insert("viewport_height".into(), Value::Number(self.viewport_height.into()));
        if let Some(url) = &self.current_test_url {
            config.insert("test_url".into(), Value::String(url.clone()));
        }
        config.insert(
            "test_environments".into(),
            Value::Object(
                self.test_environments
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        config
    }

    fn service_verification_env(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        if let Some(url) = &self.current_test_url {
            vars.push(("PLAYWRIGHT_BASE_URL".to_string(), url.clone()));
        }
        if let Some(file) = &self.ws_endpoint_file {
            vars.push(("MCP_PW_WS_FILE".to_string(), file.clone()));
        }
        vars
    }
}
