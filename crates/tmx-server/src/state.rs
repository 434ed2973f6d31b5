//! Shared application state.

use std::sync::Arc;

use tmx_jobs::JobManager;

use crate::config::ServerConfig;

/// State shared by every connection handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub manager: Arc<JobManager>,
}

impl AppState {
    /// Start the job manager and build the shared state.
    pub fn new(config: ServerConfig) -> Self {
        let manager = JobManager::start(config.manager_config());
        Self {
            config: Arc::new(config),
            manager,
        }
    }
}
