//! Tridot control plane
//!
//! Keeps the registry of relay nodes and the regions they serve, and turns
//! node health reports into a 0-100 capacity score used for placement.
//!
//! ## Architecture
//!
//! - `config`: environment-driven configuration
//! - `model`: regions, nodes and per-region capacity
//! - `capacity`: the capacity heuristic
//! - `repository`: Redis and in-memory storage behind [`NodeRepository`]
//! - `service`: node registration, health scoring and region listing
//! - `rest_server`: the HTTP API
//! - `server`: startup and graceful shutdown
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tridot_control_plane::{Config, ControlPlaneServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     ControlPlaneServer::init_logging();
//!     let config = Config::from_env()?;
//!     ControlPlaneServer::new(config)
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod capacity;
pub mod config;
pub mod error;
pub mod model;
pub mod repository;
pub mod rest_server;
pub mod server;
pub mod service;

pub use capacity::{HealthSample, compute_capacity_score};
pub use config::{Config, NodeStore};
pub use error::{NodeServiceError, RepositoryError};
pub use repository::{InMemoryNodeRepository, NodeRepository, RedisNodeRepository};
pub use server::{ControlPlaneServer, ServerError};
pub use service::NodeService;

/// Current version of the tridot control plane
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default bind address for the HTTP API
    pub const BIND_ADDRESS: &str = "0.0.0.0:8080";
    /// Default Redis URL for the node store
    pub const REDIS_URL: &str = "redis://127.0.0.1:6379/0";
}
