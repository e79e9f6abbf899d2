use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use super::{DeviceStats, WireGuardError};
use crate::command::CommandRunner;
use crate::fsio;

/// Peers that handshook within this window count as active.
pub const DEFAULT_ACTIVE_WINDOW: Duration = Duration::from_secs(3 * 60);

/// Bridge to the platform's `wg` and `wg-quick` tools.
#[derive(Clone)]
pub struct WireGuardRuntime {
    runner: Arc<dyn CommandRunner>,
    active_window: Duration,
}

impl WireGuardRuntime {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            active_window: DEFAULT_ACTIVE_WINDOW,
        }
    }

    pub fn with_active_window(mut self, window: Duration) -> Self {
        self.active_window = window;
        self
    }

    /// `wg-quick up <config>`.
    pub fn bring_up(&self, config_path: &Path) -> Result<(), WireGuardError> {
        let path = config_path.to_string_lossy();
        info!(config = %path, "Bringing up WireGuard interface");
        self.runner.run("wg-quick", &["up", &path])?;
        Ok(())
    }

    /// Applies the peer set of `config_path` to a running interface without
    /// restarting it. wg-quick-only keys are stripped first because
    /// `wg syncconf` rejects them.
    pub fn sync_peers(&self, interface: &str, config_path: &Path) -> Result<(), WireGuardError> {
        let path = config_path.to_string_lossy();
        let stripped = self.runner.run("wg-quick", &["strip", &path])?;

        let stripped_path = config_path.with_extension("stripped");
        fsio::write_private_atomic(&stripped_path, stripped.as_bytes()).map_err(|source| {
            WireGuardError::Write {
                path: stripped_path.clone(),
                source,
            }
        })?;

        let stripped_arg = stripped_path.to_string_lossy();
        let result = self.runner.run("wg", &["syncconf", interface, &stripped_arg]);
        let _ = std::fs::remove_file(&stripped_path);
        result?;

        debug!(interface, config = %path, "Synced WireGuard peers");
        Ok(())
    }

    pub fn read_stats(&self, interface: &str) -> Result<DeviceStats, WireGuardError> {
        if interface.is_empty() {
            return Err(WireGuardError::MissingInterfaceName);
        }
        let dump = self.runner.run("wg", &["show", interface, "dump"])?;
        Ok(parse_dump(&dump, Utc::now(), self.active_window))
    }
}

/// Parses `wg show <iface> dump` output.
///
/// The first line describes the interface and is skipped. Peer lines carry
/// public key, preshared key, endpoint, allowed IPs, latest handshake (epoch
/// seconds, 0 = never), rx bytes, tx bytes and keepalive. `wg show all dump`
/// lines have the interface name prepended and are accepted too.
pub fn parse_dump(dump: &str, now: DateTime<Utc>, active_window: Duration) -> DeviceStats {
    let window = chrono::Duration::from_std(active_window).unwrap_or(chrono::Duration::MAX);
    let mut stats = DeviceStats::default();

    for line in dump.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        let offset = match fields.len() {
            8 => 0,
            n if n >= 9 => 1,
            _ => continue,
        };

        let handshake: i64 = fields[offset + 4].trim().parse().unwrap_or(0);
        let rx: u64 = fields[offset + 5].trim().parse().unwrap_or(0);
        let tx: u64 = fields[offset + 6].trim().parse().unwrap_or(0);

        stats.peer_count += 1;
        stats.rx_bytes = stats.rx_bytes.saturating_add(rx);
        stats.tx_bytes = stats.tx_bytes.saturating_add(tx);

        if handshake <= 0 {
            continue;
        }
        let Some(at) = Utc.timestamp_opt(handshake, 0).single() else {
            continue;
        };
        if stats.last_handshake.is_none_or(|latest| at > latest) {
            stats.last_handshake = Some(at);
        }
        if now.signed_duration_since(at) <= window {
            stats.active_peers += 1;
        }
    }

    stats
}
