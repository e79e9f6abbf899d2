//! Persistence for regions and nodes.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::model::{NewRegion, Node, NodeStatus, NodeUpsert, Region, RegionCapacity};

pub use self::memory::InMemoryNodeRepository;
pub use self::redis::RedisNodeRepository;

#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Insert-or-update keyed by the (upper-cased) region code.
    async fn upsert_region(&self, region: NewRegion) -> Result<Region, RepositoryError>;

    async fn get_region_by_code(&self, code: &str) -> Result<Option<Region>, RepositoryError>;

    /// Insert-or-update keyed by hostname. An existing node keeps its id,
    /// creation time and capacity score.
    async fn register_or_update_node(
        &self,
        node: NodeUpsert,
        now: DateTime<Utc>,
    ) -> Result<Node, RepositoryError>;

    /// Returns `None` when the node does not exist.
    async fn update_node_health(
        &self,
        node_id: Uuid,
        capacity_score: u8,
        now: DateTime<Utc>,
    ) -> Result<Option<Node>, RepositoryError>;

    async fn get_node(&self, node_id: Uuid) -> Result<Option<Node>, RepositoryError>;

    async fn list_regions_with_capacity(&self) -> Result<Vec<RegionCapacity>, RepositoryError>;
}

/// Average score and count of active nodes per region, ordered by code.
/// A region without active nodes scores 0.
pub(crate) fn aggregate_capacity(
    regions: impl IntoIterator<Item = Region>,
    nodes: &[Node],
) -> Vec<RegionCapacity> {
    let mut capacities: Vec<RegionCapacity> = regions
        .into_iter()
        .map(|region| {
            let scores: Vec<f64> = nodes
                .iter()
                .filter(|node| node.region_id == region.id && node.status == NodeStatus::Active)
                .map(|node| f64::from(node.capacity_score))
                .collect();
            let capacity_score = if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            };
            RegionCapacity {
                region,
                capacity_score,
                active_nodes: scores.len() as u32,
            }
        })
        .collect();
    capacities.sort_by(|a, b| a.region.code.cmp(&b.region.code));
    capacities
}
