use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tridot_core::RegisterNodeRequest;

use crate::AgentError;
use crate::agent::{NetworkPolicyStep, NodeAgent, WireGuardHook};
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::AgentConfig;
use crate::control_plane::HttpControlPlane;
use crate::firewall::NetworkPolicy;
use crate::metrics::Exporter;
use crate::retry::RetryPolicy;
use crate::state::FileStateStore;
use crate::system_info::{self, CpuSampler};
use crate::transport::build_mtls_client;
use crate::wireguard::{WireGuardKeys, WireGuardManager, WireGuardRuntime};

/// Everything the binary needs to run one agent process.
pub struct AgentRuntime {
    pub agent: NodeAgent,
    pub exporter: Arc<Exporter>,
    pub metrics_addr: Option<SocketAddr>,
}

/// Wires the production components together. Any failure here is a
/// configuration or host problem and must stop the process before the
/// control loop starts.
pub fn build_runtime(config: &AgentConfig) -> Result<AgentRuntime, AgentError> {
    let client = build_mtls_client(&config.mtls, config.request_timeout())?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let keys = WireGuardKeys::load_or_generate(&config.private_key_path())?;
    let manager = Arc::new(WireGuardManager::new(
        config.wireguard.clone(),
        Some(keys.private_key.clone()),
        WireGuardRuntime::new(runner.clone()),
    )?);
    let config_path = manager.ensure_base_config()?;

    let state = Arc::new(FileStateStore::open(&config.agent.state_dir)?);
    let exporter = Arc::new(Exporter::new()?);

    let mut control_plane = HttpControlPlane::new(
        client,
        &config.control_plane.url,
        &config.control_plane.register_path,
        &config.control_plane.health_path,
        config.provision.token.clone(),
    )?;
    if let Some(registration) = registration_request(config, &keys.public_key) {
        info!(
            region = %registration.region_code,
            hostname = %registration.hostname,
            "Registering with node identity"
        );
        control_plane = control_plane.with_registration(registration);
    }

    let up_manager = manager.clone();
    let up: WireGuardHook = Arc::new(move |path: &Path| up_manager.bring_up(path));
    let sync_manager = manager.clone();
    let sync: WireGuardHook = Arc::new(move |path: &Path| sync_manager.sync_peers(path));

    let cpu = CpuSampler::new();
    let mut agent = NodeAgent::new(
        Arc::new(control_plane),
        config.poll_interval(),
        RetryPolicy::new(config.retry_base(), config.max_retry_interval()),
    )
    .with_wireguard(manager, config_path, Some(up), Some(sync))
    .with_state(state)
    .with_metrics(exporter.clone())
    .with_cpu_probe(Box::new(move || cpu.sample()));

    if let Some(step) = network_policy_step(config, runner)? {
        agent = agent.with_network_policy(step);
    }

    Ok(AgentRuntime {
        agent,
        exporter,
        metrics_addr: config.metrics_addr(),
    })
}

/// Register body, sent only when a region is configured.
fn registration_request(config: &AgentConfig, public_key: &str) -> Option<RegisterNodeRequest> {
    let provision = &config.provision;
    let region_code = provision
        .region_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())?;

    let hostname = provision
        .hostname
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(system_info::hostname);
    let endpoint = provision.public_endpoint.clone().unwrap_or_else(|| {
        let host = provision.public_ipv4.as_deref().unwrap_or(hostname.as_str());
        format!("{host}:{}", config.wireguard.listen_port)
    });

    Some(RegisterNodeRequest {
        region_code: region_code.to_string(),
        hostname,
        public_ipv4: provision.public_ipv4.clone(),
        public_ipv6: provision.public_ipv6.clone(),
        public_key: public_key.to_string(),
        endpoint,
        tunnel_port: config.wireguard.listen_port,
    })
}

fn network_policy_step(
    config: &AgentConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<Option<NetworkPolicyStep>, AgentError> {
    let network = &config.network;
    if !network.enable_nat && !network.enable_kill_switch {
        return Ok(None);
    }

    let policy = NetworkPolicy::detect(runner)?;
    let interface = config.wireguard.interface_name.clone();
    let egress = network.egress_interface.clone();
    let enable_nat = network.enable_nat;
    let enable_kill_switch = network.enable_kill_switch;

    Ok(Some(Box::new(move || {
        if enable_nat {
            policy.apply_nat_rules(&interface, egress.as_deref())?;
        }
        if enable_kill_switch {
            policy.enable_kill_switch(&interface)?;
        }
        Ok(())
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.wireguard.listen_port = 51900;
        config
    }

    #[test]
    fn no_region_means_no_registration_body() {
        assert!(registration_request(&config(), "pub").is_none());

        let mut blank = config();
        blank.provision.region_code = Some("  ".into());
        assert!(registration_request(&blank, "pub").is_none());
    }

    #[test]
    fn registration_body_uses_provision_settings() {
        let mut config = config();
        config.provision.region_code = Some("eu-fra".into());
        config.provision.hostname = Some("node-1".into());
        config.provision.public_ipv4 = Some("203.0.113.10".into());

        let request = registration_request(&config, "pub").unwrap();

        assert_eq!(request.region_code, "eu-fra");
        assert_eq!(request.hostname, "node-1");
        assert_eq!(request.public_key, "pub");
        assert_eq!(request.endpoint, "203.0.113.10:51900");
        assert_eq!(request.tunnel_port, 51900);
    }

    #[test]
    fn explicit_endpoint_wins() {
        let mut config = config();
        config.provision.region_code = Some("TR-IST".into());
        config.provision.public_endpoint = Some("vpn.example.net:443".into());

        let request = registration_request(&config, "pub").unwrap();
        assert_eq!(request.endpoint, "vpn.example.net:443");
        assert!(!request.hostname.is_empty());
    }

    #[test]
    fn network_policy_disabled_by_default() {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        assert!(network_policy_step(&config(), runner).unwrap().is_none());
    }
}
