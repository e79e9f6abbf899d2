use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use tridot_core::{NodeHealthRequest, RegisterNodeRequest};
use uuid::Uuid;

use crate::capacity::{HealthSample, compute_capacity_score};
use crate::error::NodeServiceError;
use crate::model::{NewRegion, Node, NodeStatus, NodeUpsert, Region, RegionCapacity};
use crate::repository::NodeRepository;

/// Score given to a node the first time it registers.
pub const INITIAL_CAPACITY_SCORE: u8 = 100;

/// Built-in regions upserted at startup: (code, name, country).
pub const DEFAULT_REGIONS: [(&str, &str, &str); 4] = [
    ("TR-IST", "İstanbul", "TR"),
    ("TR-IZM", "İzmir", "TR"),
    ("EU-FRA", "Frankfurt", "DE"),
    ("EU-NL", "Amsterdam", "NL"),
];

/// Node and region operations behind the HTTP API.
#[derive(Clone)]
pub struct NodeService {
    repo: Arc<dyn NodeRepository>,
}

impl NodeService {
    pub fn new(repo: Arc<dyn NodeRepository>) -> Self {
        Self { repo }
    }

    pub async fn seed_default_regions(&self) -> Result<Vec<Region>, NodeServiceError> {
        let mut regions = Vec::with_capacity(DEFAULT_REGIONS.len());
        for (code, name, country_code) in DEFAULT_REGIONS {
            regions.push(
                self.repo
                    .upsert_region(NewRegion::new(code, name, country_code))
                    .await?,
            );
        }
        info!(count = regions.len(), "Seeded default regions");
        Ok(regions)
    }

    pub async fn upsert_region(&self, region: NewRegion) -> Result<Region, NodeServiceError> {
        if region.code.trim().is_empty() {
            return Err(NodeServiceError::InvalidInput(
                "region code is required".to_string(),
            ));
        }
        Ok(self.repo.upsert_region(region).await?)
    }

    /// Registers a node, or refreshes it when the hostname is already known.
    pub async fn register_node(
        &self,
        request: &RegisterNodeRequest,
    ) -> Result<Node, NodeServiceError> {
        let region_code = request.region_code.trim();
        if region_code.is_empty() {
            return Err(NodeServiceError::InvalidInput(
                "region_code is required".to_string(),
            ));
        }
        let hostname = request.hostname.trim();
        if hostname.is_empty() {
            return Err(NodeServiceError::InvalidInput(
                "hostname is required".to_string(),
            ));
        }

        let code = region_code.to_ascii_uppercase();
        let region = self
            .repo
            .get_region_by_code(&code)
            .await?
            .ok_or(NodeServiceError::RegionNotFound(code))?;

        let node = self
            .repo
            .register_or_update_node(
                NodeUpsert {
                    region_id: region.id,
                    hostname: hostname.to_string(),
                    public_ipv4: request.public_ipv4.clone(),
                    public_ipv6: request.public_ipv6.clone(),
                    public_key: request.public_key.clone(),
                    endpoint: request.endpoint.clone(),
                    tunnel_port: request.tunnel_port,
                    status: NodeStatus::Active,
                    initial_capacity_score: INITIAL_CAPACITY_SCORE,
                },
                Utc::now(),
            )
            .await?;

        info!(
            node_id = %node.id,
            hostname = %node.hostname,
            region = %region.code,
            "Node registered"
        );
        Ok(node)
    }

    /// Recomputes and stores the node's capacity score from a health sample.
    pub async fn report_health(&self, request: &NodeHealthRequest) -> Result<u8, NodeServiceError> {
        if request.node_id.is_nil() {
            return Err(NodeServiceError::InvalidInput(
                "node_id is required".to_string(),
            ));
        }

        let score = compute_capacity_score(&HealthSample::from(request));
        self.repo
            .update_node_health(request.node_id, score, Utc::now())
            .await?
            .ok_or(NodeServiceError::NodeNotFound(request.node_id))?;

        debug!(node_id = %request.node_id, capacity_score = score, "Node health recorded");
        Ok(score)
    }

    pub async fn get_node(&self, node_id: Uuid) -> Result<Node, NodeServiceError> {
        self.repo
            .get_node(node_id)
            .await?
            .ok_or(NodeServiceError::NodeNotFound(node_id))
    }

    pub async fn list_regions_with_capacity(
        &self,
    ) -> Result<Vec<RegionCapacity>, NodeServiceError> {
        Ok(self.repo.list_regions_with_capacity().await?)
    }
}
