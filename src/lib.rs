pub mod actions;
pub mod config;
pub mod error;
pub mod events;
pub mod generator;
pub mod orchestrator;
pub mod ports;
pub mod project;
pub mod publish;
pub mod rest;
pub mod security;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use config::HostConfig;
use generator::{GenerationBackend, GeminiClient};
use ports::PortAllocator;
use project::ProjectStore;
use supervisor::Supervisor;

/// Shared application state passed to every request handler and background
/// task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<HostConfig>,
    pub store: Arc<ProjectStore>,
    pub supervisor: Arc<Supervisor>,
    pub generator: Arc<dyn GenerationBackend>,
    /// Shared client for proxying preview traffic; cloning it reuses one
    /// connection pool across requests.
    pub http_client: reqwest::Client,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire the default component graph from a config: filesystem store,
    /// port allocator, supervisor, and the Gemini client.
    pub fn from_config(config: HostConfig) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(ProjectStore::new(config.projects_dir.clone()));
        let supervisor = Supervisor::new(
            Arc::clone(&store),
            PortAllocator::new(config.ports.base_port, config.ports.pool_size),
            config.commands.clone(),
            Duration::from_secs(config.timeouts.server_ready_secs),
        );
        let generator: Arc<dyn GenerationBackend> =
            Arc::new(GeminiClient::new(config.generator.clone()));
        Self {
            config,
            store,
            supervisor,
            generator,
            http_client: reqwest::Client::new(),
            started_at: std::time::Instant::now(),
        }
    }

    /// Same graph with the generation backend swapped out (tests).
    pub fn with_generator(config: HostConfig, generator: Arc<dyn GenerationBackend>) -> Self {
        let mut ctx = Self::from_config(config);
        ctx.generator = generator;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_clones_share_the_component_graph() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HostConfig::default();
        config.projects_dir = dir.path().to_path_buf();

        let ctx = AppContext::from_config(config);
        let clone = ctx.clone();
        // One store, one supervisor, one pooled HTTP client handle — clones
        // are handles onto the same graph, not new components.
        assert!(Arc::ptr_eq(&ctx.store, &clone.store));
        assert!(Arc::ptr_eq(&ctx.supervisor, &clone.supervisor));
        let _shared_pool: reqwest::Client = clone.http_client.clone();
    }
}
