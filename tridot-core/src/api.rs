use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of the agent's periodic `POST {healthPath}` call.
///
/// `timestamp` is always present. The top-level `node_id`, `active_peers`,
/// `cpu_percent` and `throughput_mbps` fields use the same names as
/// [`NodeHealthRequest`], so the control plane can score a node straight from
/// the agent's report once the agent knows its node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthReport {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_peers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wireguard: Option<WireGuardHealth>,
}

impl AgentHealthReport {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            node_id: None,
            active_peers: None,
            cpu_percent: None,
            throughput_mbps: None,
            wireguard: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGuardHealth {
    pub peer_count: u32,
    pub active_peer_count: u32,
    pub handshake_ratio: f64,
    pub last_handshake: Option<DateTime<Utc>>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_bps: f64,
    pub tx_bps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub region_code: String,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ipv6: Option<String>,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub tunnel_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    pub node_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealthRequest {
    pub node_id: Uuid,
    #[serde(default)]
    pub active_peers: u32,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub throughput_mbps: f64,
    #[serde(default)]
    pub packet_loss: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealthResponse {
    pub capacity_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCapacityView {
    pub code: String,
    pub name: String,
    pub country_code: String,
    pub is_active: bool,
    pub capacity_score: f64,
    pub active_nodes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn minimal_report_only_has_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let value = serde_json::to_value(AgentHealthReport::new(ts)).unwrap();
        assert_eq!(value, serde_json::json!({"timestamp": "2026-01-02T03:04:05Z"}));
    }

    #[test]
    fn agent_report_deserializes_as_node_health_request() {
        let node_id = Uuid::new_v4();
        let mut report = AgentHealthReport::new(Utc::now());
        report.node_id = Some(node_id);
        report.active_peers = Some(7);
        report.cpu_percent = Some(12.5);
        report.throughput_mbps = Some(3.0);
        report.wireguard = Some(WireGuardHealth {
            peer_count: 9,
            active_peer_count: 7,
            handshake_ratio: 7.0 / 9.0,
            last_handshake: None,
            rx_bytes: 1,
            tx_bytes: 2,
            rx_bps: 0.0,
            tx_bps: 0.0,
            drain: Some(false),
        });

        let body = serde_json::to_string(&report).unwrap();
        let request: NodeHealthRequest = serde_json::from_str(&body).unwrap();

        assert_eq!(request.node_id, node_id);
        assert_eq!(request.active_peers, 7);
        assert_eq!(request.cpu_percent, 12.5);
        assert_eq!(request.throughput_mbps, 3.0);
        assert_eq!(request.packet_loss, 0.0);
    }
}
