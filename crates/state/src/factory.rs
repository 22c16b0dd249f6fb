//! State manager construction.
//!
//! One state manager per evaluator run, selected by service. Configuration
//! comes from the environment; a missing credential surfaces as a fatal
//! configuration error before any task runs.

use mark_domain::{Result, ServiceKind};

use crate::filesystem::FilesystemStateManager;
use crate::github::GithubStateManager;
use crate::insforge::InsforgeStateManager;
use crate::manager::StateManager;
use crate::notion::NotionStateManager;
use crate::playwright::PlaywrightStateManager;
use crate::postgres::PostgresStateManager;
use crate::supabase::SupabaseStateManager;
use crate::webarena::WebArenaStateManager;

/// Build the state manager for a service from environment configuration.
pub fn create_state_manager(service: ServiceKind) -> Result<Box<dyn StateManager>> {
    let manager: Box<dyn StateManager> = match service {
        ServiceKind::Filesystem => Box::new(FilesystemStateManager::from_env()),
        ServiceKind::Postgres => Box::new(PostgresStateManager::from_env()?),
        ServiceKind::Supabase => Box::new(SupabaseStateManager::from_env()?),
        ServiceKind::Insforge => Box::new(InsforgeStateManager::from_env()?),
        ServiceKind::Notion => Box::new(NotionStateManager::from_env()?),
        ServiceKind::Github => Box::new(GithubStateManager::from_env()?),
        ServiceKind::Playwright => Box::new(PlaywrightStateManager::from_env()),
        ServiceKind::PlaywrightWebarena => Box::new(WebArenaStateManager::from_env()?),
    };
    tracing::debug!(service = %service, "state manager created");
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_manager_needs_no_credentials() {
        let manager = create_state_manager(ServiceKind::Filesystem).unwrap();
        assert_eq!(manager.service_name(), "filesystem");
    }

    #[test]
    fn playwright_manager_needs_no_credentials() {
        let manager = create_state_manager(ServiceKind::Playwright).unwrap();
        assert_eq!(manager.service_name(), "playwright");
    }

    #[test]
    fn credentialed_services_fail_fast_without_env() {
        std::env::remove_var("NOTION_API_KEY");
        std::env::remove_var("NOTION_EVAL_PARENT_PAGE_ID");
        assert!(create_state_manager(ServiceKind::Notion).is_err());
    }
}
