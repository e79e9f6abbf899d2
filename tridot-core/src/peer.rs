use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One entry of a WireGuard peer set, as pushed by the control plane and
/// persisted by the agent after it has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Overrides the interface default keepalive when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
}

impl PeerRecord {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            preshared_key: None,
            allowed_ips: Vec::new(),
            endpoint: None,
            persistent_keepalive: None,
        }
    }

    pub fn with_allowed_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_ips = ips.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerSetError {
    #[error("peer at index {index} has an empty public key")]
    MissingPublicKey { index: usize },

    #[error("duplicate peer public key '{public_key}'")]
    DuplicatePublicKey { public_key: String },

    #[error("peer '{public_key}' has invalid allowed IP '{cidr}'")]
    InvalidAllowedIp { public_key: String, cidr: String },
}

/// Checks the invariants a peer set must hold before it is rendered.
pub fn validate_peer_set(peers: &[PeerRecord]) -> Result<(), PeerSetError> {
    let mut seen = HashSet::with_capacity(peers.len());

    for (index, peer) in peers.iter().enumerate() {
        let key = peer.public_key.trim();
        if key.is_empty() {
            return Err(PeerSetError::MissingPublicKey { index });
        }
        if !seen.insert(key) {
            return Err(PeerSetError::DuplicatePublicKey {
                public_key: key.to_string(),
            });
        }
        if let Some(bad) = peer
            .allowed_ips
            .iter()
            .find(|cidr| !is_allowed_ip(cidr))
        {
            return Err(PeerSetError::InvalidAllowedIp {
                public_key: key.to_string(),
                cidr: bad.clone(),
            });
        }
    }

    Ok(())
}

/// A CIDR, or a bare address which WireGuard treats as a host route.
fn is_allowed_ip(value: &str) -> bool {
    let value = value.trim();
    value.parse::<IpNet>().is_ok() || value.parse::<IpAddr>().is_ok()
}
