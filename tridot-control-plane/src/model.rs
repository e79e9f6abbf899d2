use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tridot_core::RegionCapacityView;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub id: Uuid,
    /// Always stored upper-cased.
    pub code: String,
    pub name: String,
    pub country_code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Draining,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "draining" => Ok(Self::Draining),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown node status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: Uuid,
    pub region_id: Uuid,
    /// Unique across all nodes; re-registering a hostname updates this node.
    pub hostname: String,
    pub public_ipv4: Option<String>,
    pub public_ipv6: Option<String>,
    pub public_key: String,
    pub endpoint: String,
    pub tunnel_port: u16,
    pub status: NodeStatus,
    pub capacity_score: u8,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Region plus the aggregate over its active nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionCapacity {
    pub region: Region,
    pub capacity_score: f64,
    pub active_nodes: u32,
}

impl From<&RegionCapacity> for RegionCapacityView {
    fn from(capacity: &RegionCapacity) -> Self {
        Self {
            code: capacity.region.code.clone(),
            name: capacity.region.name.clone(),
            country_code: capacity.region.country_code.clone(),
            is_active: capacity.region.is_active,
            capacity_score: capacity.capacity_score,
            active_nodes: capacity.active_nodes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegion {
    pub code: String,
    pub name: String,
    pub country_code: String,
    pub is_active: bool,
}

impl NewRegion {
    pub fn new(code: &str, name: &str, country_code: &str) -> Self {
        Self {
            code: code.to_ascii_uppercase(),
            name: name.to_string(),
            country_code: country_code.to_string(),
            is_active: true,
        }
    }
}

/// Insert-or-update keyed by hostname. `initial_capacity_score` is only used
/// when the hostname is new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUpsert {
    pub region_id: Uuid,
    pub hostname: String,
    pub public_ipv4: Option<String>,
    pub public_ipv6: Option<String>,
    pub public_key: String,
    pub endpoint: String,
    pub tunnel_port: u16,
    pub status: NodeStatus,
    pub initial_capacity_score: u8,
}
