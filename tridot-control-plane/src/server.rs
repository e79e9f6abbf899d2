use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{Config, NodeStore};
use crate::error::{NodeServiceError, RepositoryError};
use crate::repository::{InMemoryNodeRepository, NodeRepository, RedisNodeRepository};
use crate::rest_server::{AppState, router};
use crate::service::NodeService;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to open node store: {0}")]
    Repository(#[from] RepositoryError),

    #[error("failed to seed regions: {0}")]
    Seed(#[from] NodeServiceError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(std::io::Error),
}

/// HTTP server for the node registry.
#[derive(Debug)]
pub struct ControlPlaneServer {
    config: Config,
}

impl ControlPlaneServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn init_logging() {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "tridot_control_plane=info".into()),
            )
            .init();
        info!("Logging initialized");
    }

    async fn open_repository(&self) -> Result<Arc<dyn NodeRepository>, ServerError> {
        Ok(match self.config.node_store {
            NodeStore::Redis => {
                let repo = RedisNodeRepository::connect(&self.config.redis_url).await?;
                info!("Connected to Redis node store");
                Arc::new(repo)
            }
            NodeStore::Memory => {
                info!("Using in-memory node store; nodes are lost on restart");
                Arc::new(InMemoryNodeRepository::new())
            }
        })
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service = NodeService::new(self.open_repository().await?);
        if self.config.seed_regions {
            service.seed_default_regions().await?;
        }

        let state = AppState::new(Arc::new(service), self.config.provision_token.clone());
        let app = router(state);

        let addr = self.config.bind_address;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!(%addr, "Control plane HTTP API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        info!("Control plane stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            redis_url: String::new(),
            node_store: NodeStore::Memory,
            provision_token: Some("token".to_string()),
            seed_regions: true,
        }
    }

    #[tokio::test]
    async fn stops_when_shutdown_resolves() {
        let server = ControlPlaneServer::new(memory_config());
        server.run(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = memory_config();
        config.bind_address = occupied.local_addr().unwrap();

        let err = ControlPlaneServer::new(config)
            .run(async {})
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
