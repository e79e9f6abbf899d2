//! WireGuard interface management: config rendering, the `wg`/`wg-quick`
//! runtime bridge and interface key material.

pub mod keys;
pub mod manager;
pub mod render;
pub mod runtime;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tridot_core::PeerRecord;

use crate::command::CommandError;

pub use keys::WireGuardKeys;
pub use manager::WireGuardManager;
pub use render::render_config;
pub use runtime::{WireGuardRuntime, parse_dump};

#[derive(Debug, Error)]
pub enum WireGuardError {
    #[error("interface name required")]
    MissingInterfaceName,

    #[error("config directory required")]
    MissingConfigDir,

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable per-process interface settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    pub interface_name: String,
    pub listen_port: u16,
    /// Interface address in CIDR form.
    pub address: String,
    pub dns: Vec<String>,
    pub mtu: Option<u16>,
    /// Keepalive applied to peers without their own override; 0 disables it.
    pub persistent_keepalive: u16,
    pub config_dir: PathBuf,
    pub private_key_file: Option<PathBuf>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            interface_name: "wg0".to_string(),
            listen_port: 51820,
            address: String::new(),
            dns: Vec::new(),
            mtu: None,
            persistent_keepalive: 25,
            config_dir: PathBuf::from("/etc/wireguard"),
            private_key_file: None,
        }
    }
}

impl InterfaceConfig {
    pub fn config_path(&self) -> PathBuf {
        self.config_dir
            .join(format!("{}.conf", self.interface_name))
    }
}

/// Aggregated live counters read from the interface on every health cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStats {
    pub peer_count: u32,
    /// Peers whose latest handshake falls inside the active window.
    pub active_peers: u32,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake: Option<DateTime<Utc>>,
}

impl DeviceStats {
    pub fn handshake_ratio(&self) -> f64 {
        if self.peer_count == 0 {
            0.0
        } else {
            f64::from(self.active_peers) / f64::from(self.peer_count)
        }
    }
}

/// What the agent needs from a WireGuard implementation: write a complete
/// peer set to the config file and report live stats.
pub trait WireGuardBackend: Send + Sync {
    fn write_peers(&self, peers: &[PeerRecord]) -> Result<PathBuf, WireGuardError>;
    fn stats(&self) -> Result<DeviceStats, WireGuardError>;
}
