use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::wireguard::InterfaceConfig;

pub const CONFIG_FILE_ENV: &str = "TRIDOT_AGENT_CONFIG_FILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub control_plane: ControlPlaneSettings,
    pub provision: ProvisionSettings,
    pub mtls: MtlsSettings,
    pub agent: RuntimeSettings,
    pub wireguard: InterfaceConfig,
    pub network: NetworkPolicySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
    pub url: String,
    pub register_path: String,
    pub health_path: String,
    pub timeout_secs: u64,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            register_path: "/api/v1/nodes/register".to_string(),
            health_path: "/api/v1/nodes/health".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Identity the agent presents when registering.
///
/// When `region_code` is unset the register call is sent without a body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvisionSettings {
    pub token: String,
    pub region_code: Option<String>,
    pub hostname: Option<String>,
    pub public_endpoint: Option<String>,
    pub public_ipv4: Option<String>,
    pub public_ipv6: Option<String>,
}

/// Inline PEM wins over the file path for each of the three parts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MtlsSettings {
    pub ca_pem: Option<String>,
    pub ca_file: Option<PathBuf>,
    pub cert_pem: Option<String>,
    pub cert_file: Option<PathBuf>,
    pub key_pem: Option<String>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub poll_interval_secs: u64,
    /// Empty disables the metrics endpoint.
    pub metrics_addr: String,
    pub state_dir: PathBuf,
    pub retry_base_millis: u64,
    pub max_retry_interval_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            metrics_addr: "0.0.0.0:9102".to_string(),
            state_dir: PathBuf::from("/var/lib/tridot-agent"),
            retry_base_millis: 1_000,
            max_retry_interval_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkPolicySettings {
    pub enable_nat: bool,
    pub enable_kill_switch: bool,
    pub egress_interface: Option<String>,
}

impl AgentConfig {
    /// Defaults, then the optional TOML file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_FILE_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(dir) = path.parent() {
            config.resolve_relative_paths(dir);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() && !path.as_os_str().is_empty() {
                *path = base.join(&*path);
            }
        };

        for path in [
            self.mtls.ca_file.as_mut(),
            self.mtls.cert_file.as_mut(),
            self.mtls.key_file.as_mut(),
            self.wireguard.private_key_file.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            resolve(path);
        }
        resolve(&mut self.wireguard.config_dir);
        resolve(&mut self.agent.state_dir);
    }

    /// Overlays `TRIDOT_*` variables; unparsable numeric values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(v) = var("TRIDOT_CONTROL_PLANE_URL") {
            self.control_plane.url = v;
        }
        if let Some(v) = var("TRIDOT_CONTROL_PLANE_REGISTER_PATH") {
            self.control_plane.register_path = v;
        }
        if let Some(v) = var("TRIDOT_CONTROL_PLANE_HEALTH_PATH") {
            self.control_plane.health_path = v;
        }
        if let Some(secs) = var("TRIDOT_CONTROL_PLANE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.control_plane.timeout_secs = secs;
        }

        if let Some(v) = var("TRIDOT_PROVISION_TOKEN") {
            self.provision.token = v;
        }
        if let Some(v) = var("TRIDOT_REGION_CODE") {
            self.provision.region_code = Some(v);
        }
        if let Some(v) = var("TRIDOT_NODE_HOSTNAME") {
            self.provision.hostname = Some(v);
        }
        if let Some(v) = var("TRIDOT_PUBLIC_ENDPOINT") {
            self.provision.public_endpoint = Some(v);
        }
        if let Some(v) = var("TRIDOT_PUBLIC_IPV4") {
            self.provision.public_ipv4 = Some(v);
        }
        if let Some(v) = var("TRIDOT_PUBLIC_IPV6") {
            self.provision.public_ipv6 = Some(v);
        }

        if let Some(v) = var("TRIDOT_MTLS_CA_PEM") {
            self.mtls.ca_pem = Some(v);
        }
        if let Some(v) = var("TRIDOT_MTLS_CA_FILE") {
            self.mtls.ca_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("TRIDOT_MTLS_CLIENT_CERT") {
            self.mtls.cert_pem = Some(v);
        }
        if let Some(v) = var("TRIDOT_MTLS_CLIENT_CERT_FILE") {
            self.mtls.cert_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("TRIDOT_MTLS_CLIENT_KEY") {
            self.mtls.key_pem = Some(v);
        }
        if let Some(v) = var("TRIDOT_MTLS_CLIENT_KEY_FILE") {
            self.mtls.key_file = Some(PathBuf::from(v));
        }

        if let Some(secs) = var("TRIDOT_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.agent.poll_interval_secs = secs;
        }
        if let Some(v) = lookup("TRIDOT_METRICS_ADDR") {
            self.agent.metrics_addr = v;
        }
        if let Some(v) = var("TRIDOT_STATE_DIR") {
            self.agent.state_dir = PathBuf::from(v);
        }
        if let Some(ms) = var("TRIDOT_RETRY_BASE_MILLIS").and_then(|v| v.parse().ok()) {
            self.agent.retry_base_millis = ms;
        }
        if let Some(secs) = var("TRIDOT_MAX_RETRY_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.agent.max_retry_interval_secs = secs;
        }

        if let Some(v) = var("TRIDOT_WG_INTERFACE") {
            self.wireguard.interface_name = v;
        }
        if let Some(port) = var("TRIDOT_WG_PORT").and_then(|v| v.parse().ok()) {
            self.wireguard.listen_port = port;
        }
        if let Some(v) = var("TRIDOT_WG_ADDRESS") {
            self.wireguard.address = v;
        }
        if let Some(v) = var("TRIDOT_WG_DNS") {
            self.wireguard.dns = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(mtu) = var("TRIDOT_WG_MTU").and_then(|v| v.parse().ok()) {
            self.wireguard.mtu = Some(mtu);
        }
        if let Some(ka) = var("TRIDOT_WG_KEEPALIVE").and_then(|v| v.parse().ok()) {
            self.wireguard.persistent_keepalive = ka;
        }
        if let Some(v) = var("TRIDOT_WG_CONFIG_DIR") {
            self.wireguard.config_dir = PathBuf::from(v);
        }
        if let Some(v) = var("TRIDOT_WG_PRIVATE_KEY_FILE") {
            self.wireguard.private_key_file = Some(PathBuf::from(v));
        }

        if let Some(b) = var("TRIDOT_ENABLE_NAT").and_then(|v| parse_bool(&v)) {
            self.network.enable_nat = b;
        }
        if let Some(b) = var("TRIDOT_ENABLE_KILL_SWITCH").and_then(|v| parse_bool(&v)) {
            self.network.enable_kill_switch = b;
        }
        if let Some(v) = var("TRIDOT_EGRESS_INTERFACE") {
            self.network.egress_interface = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.control_plane.url.trim().is_empty() {
            return invalid("control plane url is required");
        }
        if self.provision.token.is_empty() {
            return invalid("provision token is required");
        }
        if !has_material(&self.mtls.ca_pem, &self.mtls.ca_file) {
            return invalid("mtls ca certificate or file is required");
        }
        if !has_material(&self.mtls.cert_pem, &self.mtls.cert_file) {
            return invalid("mtls client certificate is required");
        }
        if !has_material(&self.mtls.key_pem, &self.mtls.key_file) {
            return invalid("mtls client key is required");
        }
        if self.agent.poll_interval_secs == 0 {
            return invalid("poll interval must be greater than zero");
        }
        if self.agent.state_dir.as_os_str().is_empty() {
            return invalid("agent state directory is required");
        }
        if self.agent.max_retry_interval_secs == 0 {
            return invalid("max retry interval must be greater than zero");
        }
        if !self.agent.metrics_addr.is_empty()
            && self.agent.metrics_addr.parse::<SocketAddr>().is_err()
        {
            return invalid("metrics address must be a socket address");
        }
        if self.wireguard.interface_name.trim().is_empty() {
            return invalid("wireguard interface name is required");
        }
        if self.wireguard.config_dir.as_os_str().is_empty() {
            return invalid("wireguard config directory is required");
        }
        if self.wireguard.listen_port == 0 {
            return invalid("wireguard listen port is invalid");
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.agent.poll_interval_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.agent.retry_base_millis)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_secs(self.agent.max_retry_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.control_plane.timeout_secs)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.agent.metrics_addr.parse().ok()
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.wireguard
            .private_key_file
            .clone()
            .unwrap_or_else(|| self.agent.state_dir.join("private.key"))
    }
}

fn has_material(inline: &Option<String>, file: &Option<PathBuf>) -> bool {
    inline.as_deref().is_some_and(|pem| !pem.trim().is_empty())
        || file.as_deref().is_some_and(|p| !p.as_os_str().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
