pub mod agent;
pub mod bootstrap;
pub mod command;
pub mod config;
pub mod control_plane;
pub mod firewall;
pub mod fsio;
pub mod metrics;
pub mod retry;
pub mod state;
pub mod system_info;
pub mod throughput;
pub mod transport;
pub mod wireguard;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentPhase, NodeAgent};
pub use bootstrap::{AgentRuntime, build_runtime};
pub use config::AgentConfig;
pub use metrics::{Exporter, MetricsSink};
pub use state::{FileStateStore, StateStore};
pub use wireguard::{DeviceStats, InterfaceConfig, WireGuardBackend, WireGuardManager};

/// Version string reported in the User-Agent header and `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] control_plane::ControlPlaneError),

    #[error("WireGuard error: {0}")]
    WireGuard(#[from] wireguard::WireGuardError),

    #[error("WireGuard backend not configured")]
    WireGuardNotConfigured,

    #[error("Invalid peer set: {0}")]
    PeerSet(#[from] tridot_core::PeerSetError),

    #[error("Firewall error: {0}")]
    Firewall(#[from] firewall::FirewallError),

    #[error("State error: {0}")]
    State(#[from] state::StateError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] metrics::MetricsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
