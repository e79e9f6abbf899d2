use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address '{value}': {source}")]
    BindAddress {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error("unknown node store '{0}' (expected 'redis' or 'memory')")]
    UnknownStore(String),
}

/// Where nodes and regions are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStore {
    Redis,
    Memory,
}

impl FromStr for NodeStore {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::UnknownStore(other.to_string())),
        }
    }
}

/// Configuration for the tridot control plane
#[derive(Debug, Clone)]
pub struct Config {
    /// The address and port the HTTP API binds to
    pub bind_address: SocketAddr,
    /// Redis URL for the node registry
    pub redis_url: String,
    pub node_store: NodeStore,
    /// Shared secret node agents present; `None` disables node endpoints
    pub provision_token: Option<String>,
    /// Upsert the built-in regions at startup
    pub seed_regions: bool,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_value =
            lookup("TRIDOT_BIND_ADDRESS").unwrap_or_else(|| crate::defaults::BIND_ADDRESS.to_string());
        let bind_address = bind_value
            .parse()
            .map_err(|source| ConfigError::BindAddress {
                value: bind_value.clone(),
                source,
            })?;

        let redis_url = lookup("TRIDOT_REDIS_URL")
            .or_else(|| lookup("REDIS_URL"))
            .unwrap_or_else(|| crate::defaults::REDIS_URL.to_string());

        let node_store = match lookup("TRIDOT_NODE_STORE") {
            Some(value) => value.parse()?,
            None => NodeStore::Redis,
        };

        let provision_token = lookup("TRIDOT_PROVISION_TOKEN").filter(|token| !token.is_empty());
        if provision_token.is_none() {
            warn!("TRIDOT_PROVISION_TOKEN not set; node registration and health endpoints are disabled");
        }

        let seed_regions = lookup("TRIDOT_SEED_REGIONS")
            .map(|value| !matches!(value.trim(), "0" | "false" | "no"))
            .unwrap_or(true);

        info!(
            bind_address = %bind_address,
            node_store = ?node_store,
            seed_regions,
            "Configuration loaded from environment"
        );

        Ok(Config {
            bind_address,
            redis_url,
            node_store,
            provision_token,
            seed_regions,
        })
    }
}
