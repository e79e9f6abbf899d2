//! Types exchanged between the tridot node agent and the control plane.

pub mod api;
pub mod peer;

pub use api::{
    AgentHealthReport, NodeHealthRequest, NodeHealthResponse, RegionCapacityView,
    RegisterNodeRequest, RegisterNodeResponse, WireGuardHealth,
};
pub use peer::{PeerRecord, PeerSetError, validate_peer_set};
