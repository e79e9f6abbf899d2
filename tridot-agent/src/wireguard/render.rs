use std::fmt::Write as _;
use std::path::PathBuf;

use tridot_core::PeerRecord;

use super::{InterfaceConfig, WireGuardError};
use crate::fsio;

/// Renders the full wg-quick config for `interface` and `peers`.
///
/// Output is deterministic and keeps the peer order of the input.
pub fn render_config(
    interface: &InterfaceConfig,
    private_key: Option<&str>,
    peers: &[PeerRecord],
) -> String {
    let mut out = String::new();

    out.push_str("[Interface]\n");
    if let Some(key) = private_key.filter(|k| !k.is_empty()) {
        let _ = writeln!(out, "PrivateKey = {key}");
    }
    if !interface.address.is_empty() {
        let _ = writeln!(out, "Address = {}", interface.address);
    }
    let _ = writeln!(out, "ListenPort = {}", interface.listen_port);
    if let Some(mtu) = interface.mtu.filter(|mtu| *mtu > 0) {
        let _ = writeln!(out, "MTU = {mtu}");
    }
    if !interface.dns.is_empty() {
        let _ = writeln!(out, "DNS = {}", interface.dns.join(","));
    }

    for peer in peers {
        out.push('\n');
        out.push_str("[Peer]\n");
        let _ = writeln!(out, "PublicKey = {}", peer.public_key);
        if let Some(psk) = peer.preshared_key.as_deref().filter(|k| !k.is_empty()) {
            let _ = writeln!(out, "PresharedKey = {psk}");
        }
        if !peer.allowed_ips.is_empty() {
            let _ = writeln!(out, "AllowedIPs = {}", peer.allowed_ips.join(","));
        }
        if let Some(endpoint) = peer.endpoint.as_deref().filter(|e| !e.is_empty()) {
            let _ = writeln!(out, "Endpoint = {endpoint}");
        }
        let keepalive = peer
            .persistent_keepalive
            .unwrap_or(interface.persistent_keepalive);
        if keepalive > 0 {
            let _ = writeln!(out, "PersistentKeepalive = {keepalive}");
        }
    }

    out
}

/// Writes rendered config to `{config_dir}/{interface_name}.conf` (mode 0600)
/// and returns the path.
pub fn write_config(
    interface: &InterfaceConfig,
    contents: &str,
) -> Result<PathBuf, WireGuardError> {
    if interface.interface_name.trim().is_empty() {
        return Err(WireGuardError::MissingInterfaceName);
    }
    if interface.config_dir.as_os_str().is_empty() {
        return Err(WireGuardError::MissingConfigDir);
    }

    fsio::ensure_private_dir(&interface.config_dir).map_err(|source| WireGuardError::Write {
        path: interface.config_dir.clone(),
        source,
    })?;

    let path = interface.config_path();
    fsio::write_private_atomic(&path, contents.as_bytes()).map_err(|source| {
        WireGuardError::Write {
            path: path.clone(),
            source,
        }
    })?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface() -> InterfaceConfig {
        InterfaceConfig {
            interface_name: "wg0".into(),
            listen_port: 51820,
            address: "10.8.0.1/24".into(),
            dns: vec!["1.1.1.1".into(), "8.8.8.8".into()],
            mtu: Some(1420),
            persistent_keepalive: 25,
            ..Default::default()
        }
    }

    #[test]
    fn renders_interface_and_peers_in_order() {
        let peers = vec![
            PeerRecord {
                public_key: "peer-b".into(),
                preshared_key: Some("psk".into()),
                allowed_ips: vec!["10.8.0.3/32".into(), "fd00::3/128".into()],
                endpoint: Some("198.51.100.7:51820".into()),
                persistent_keepalive: Some(30),
            },
            PeerRecord::new("peer-a").with_allowed_ips(["10.8.0.2/32"]),
        ];

        let rendered = render_config(&interface(), Some("priv-key"), &peers);

        let expected = "\
[Interface]
PrivateKey = priv-key
Address = 10.8.0.1/24
ListenPort = 51820
MTU = 1420
DNS = 1.1.1.1,8.8.8.8

[Peer]
PublicKey = peer-b
PresharedKey = psk
AllowedIPs = 10.8.0.3/32,fd00::3/128
Endpoint = 198.51.100.7:51820
PersistentKeepalive = 30

[Peer]
PublicKey = peer-a
AllowedIPs = 10.8.0.2/32
PersistentKeepalive = 25
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn rendering_is_deterministic() {
        let peers: Vec<_> = (0..20)
            .map(|i| PeerRecord::new(format!("peer-{i}")).with_allowed_ips([format!("10.9.0.{i}/32")]))
            .collect();

        let first = render_config(&interface(), None, &peers);
        let second = render_config(&interface(), None, &peers);
        assert_eq!(first, second);

        let positions: Vec<_> = peers
            .iter()
            .map(|p| first.find(&format!("PublicKey = {}\n", p.public_key)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn zero_keepalive_is_omitted() {
        let mut iface = interface();
        iface.persistent_keepalive = 0;
        iface.mtu = None;
        iface.dns.clear();

        let rendered = render_config(&iface, None, &[PeerRecord::new("peer")]);
        assert!(!rendered.contains("PersistentKeepalive"));
        assert!(!rendered.contains("MTU"));
        assert!(!rendered.contains("DNS"));
        assert!(!rendered.contains("PrivateKey"));
    }

    #[test]
    fn write_config_validates_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut iface = interface();
        iface.config_dir = dir.path().join("wireguard");

        let path = write_config(&iface, "[Interface]\n").unwrap();
        assert_eq!(path, dir.path().join("wireguard/wg0.conf"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[Interface]\n");

        let mut unnamed = iface.clone();
        unnamed.interface_name.clear();
        assert!(matches!(
            write_config(&unnamed, ""),
            Err(WireGuardError::MissingInterfaceName)
        ));

        let mut no_dir = iface;
        no_dir.config_dir = PathBuf::new();
        assert!(matches!(
            write_config(&no_dir, ""),
            Err(WireGuardError::MissingConfigDir)
        ));
    }
}
