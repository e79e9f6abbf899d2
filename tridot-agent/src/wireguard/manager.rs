use std::path::{Path, PathBuf};

use tracing::info;
use tridot_core::PeerRecord;

use super::render::{render_config, write_config};
use super::runtime::WireGuardRuntime;
use super::{DeviceStats, InterfaceConfig, WireGuardBackend, WireGuardError};

/// Owns the interface config file and the runtime bridge for one interface.
pub struct WireGuardManager {
    interface: InterfaceConfig,
    private_key: Option<String>,
    runtime: WireGuardRuntime,
}

impl WireGuardManager {
    pub fn new(
        interface: InterfaceConfig,
        private_key: Option<String>,
        runtime: WireGuardRuntime,
    ) -> Result<Self, WireGuardError> {
        if interface.interface_name.trim().is_empty() {
            return Err(WireGuardError::MissingInterfaceName);
        }
        if interface.config_dir.as_os_str().is_empty() {
            return Err(WireGuardError::MissingConfigDir);
        }
        Ok(Self {
            interface,
            private_key,
            runtime,
        })
    }

    pub fn interface(&self) -> &InterfaceConfig {
        &self.interface
    }

    pub fn config_path(&self) -> PathBuf {
        self.interface.config_path()
    }

    /// Rewrites the config file with the current interface settings and no
    /// peers. A file left by an earlier run may hold a peer set that was
    /// never applied, so it is always replaced; the persisted set is
    /// restored on top of this.
    pub fn ensure_base_config(&self) -> Result<PathBuf, WireGuardError> {
        let path = self.write_peers(&[])?;
        info!(config = %path.display(), "Wrote base WireGuard config");
        Ok(path)
    }

    pub fn bring_up(&self, config_path: &Path) -> Result<(), WireGuardError> {
        self.runtime.bring_up(config_path)
    }

    pub fn sync_peers(&self, config_path: &Path) -> Result<(), WireGuardError> {
        self.runtime
            .sync_peers(&self.interface.interface_name, config_path)
    }
}

impl WireGuardBackend for WireGuardManager {
    fn write_peers(&self, peers: &[PeerRecord]) -> Result<PathBuf, WireGuardError> {
        let contents = render_config(&self.interface, self.private_key.as_deref(), peers);
        write_config(&self.interface, &contents)
    }

    fn stats(&self) -> Result<DeviceStats, WireGuardError> {
        self.runtime.read_stats(&self.interface.interface_name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::RecordingRunner;

    fn manager(dir: &Path, runner: Arc<RecordingRunner>) -> WireGuardManager {
        let interface = InterfaceConfig {
            address: "10.8.0.1/24".into(),
            config_dir: dir.to_path_buf(),
            ..Default::default()
        };
        WireGuardManager::new(interface, Some("priv".into()), WireGuardRuntime::new(runner)).unwrap()
    }

    #[test]
    fn write_peers_renders_to_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Arc::new(RecordingRunner::default()));

        let path = manager
            .write_peers(&[PeerRecord::new("peer-a").with_allowed_ips(["10.8.0.2/32"])])
            .unwrap();

        assert_eq!(path, dir.path().join("wg0.conf"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("[Interface]\nPrivateKey = priv\n"));
        assert!(written.contains("PublicKey = peer-a"));
    }

    #[test]
    fn ensure_base_config_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Arc::new(RecordingRunner::default()));
        manager.write_peers(&[PeerRecord::new("peer-a")]).unwrap();

        let interface = InterfaceConfig {
            listen_port: 51999,
            ..manager.interface().clone()
        };
        let restarted = WireGuardManager::new(
            interface,
            Some("priv".into()),
            WireGuardRuntime::new(Arc::new(RecordingRunner::default())),
        )
        .unwrap();
        let path = restarted.ensure_base_config().unwrap();

        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("ListenPort = 51999"));
        assert!(!written.contains("peer-a"));
    }

    #[test]
    fn stats_reads_interface_dump() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default().with_output(
            "wg",
            "priv\tpub\t51820\toff\npeer\t(none)\t(none)\t10.8.0.2/32\t0\t10\t20\toff\n",
        ));
        let manager = manager(dir.path(), runner.clone());

        let stats = manager.stats().unwrap();

        assert_eq!(stats.peer_count, 1);
        assert_eq!(stats.rx_bytes, 10);
        assert_eq!(runner.calls(), vec!["wg show wg0 dump"]);
    }

    #[test]
    fn rejects_missing_interface_name() {
        let interface = InterfaceConfig {
            interface_name: " ".into(),
            ..Default::default()
        };
        let runtime = WireGuardRuntime::new(Arc::new(RecordingRunner::default()));
        assert!(matches!(
            WireGuardManager::new(interface, None, runtime),
            Err(WireGuardError::MissingInterfaceName)
        ));
    }
}
