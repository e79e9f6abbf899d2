use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{NodeRepository, aggregate_capacity};
use crate::error::RepositoryError;
use crate::model::{NewRegion, Node, NodeUpsert, Region, RegionCapacity};

#[derive(Default)]
struct Tables {
    regions: HashMap<Uuid, Region>,
    region_codes: HashMap<String, Uuid>,
    nodes: HashMap<Uuid, Node>,
    hostnames: HashMap<String, Uuid>,
}

/// Process-local repository for development and tests. Each operation runs
/// under one write or read lock, which gives the same upsert atomicity as the
/// Redis scripts.
#[derive(Default)]
pub struct InMemoryNodeRepository {
    tables: RwLock<Tables>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn upsert_region(&self, region: NewRegion) -> Result<Region, RepositoryError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let code = region.code.to_ascii_uppercase();

        let id = match tables.region_codes.get(&code) {
            Some(id) => *id,
            None => {
                let id = Uuid::new_v4();
                tables.region_codes.insert(code.clone(), id);
                id
            }
        };
        let created_at = tables
            .regions
            .get(&id)
            .map_or(now, |existing| existing.created_at);

        let stored = Region {
            id,
            code,
            name: region.name,
            country_code: region.country_code,
            is_active: region.is_active,
            created_at,
            updated_at: now,
        };
        tables.regions.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_region_by_code(&self, code: &str) -> Result<Option<Region>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .region_codes
            .get(&code.to_ascii_uppercase())
            .and_then(|id| tables.regions.get(id))
            .cloned())
    }

    async fn register_or_update_node(
        &self,
        node: NodeUpsert,
        now: DateTime<Utc>,
    ) -> Result<Node, RepositoryError> {
        let mut tables = self.tables.write().await;

        let existing = tables
            .hostnames
            .get(&node.hostname)
            .and_then(|id| tables.nodes.get(id))
            .cloned();

        let stored = match existing {
            Some(existing) => Node {
                region_id: node.region_id,
                public_ipv4: node.public_ipv4,
                public_ipv6: node.public_ipv6,
                public_key: node.public_key,
                endpoint: node.endpoint,
                tunnel_port: node.tunnel_port,
                status: node.status,
                last_seen_at: Some(now),
                updated_at: now,
                ..existing
            },
            None => Node {
                id: Uuid::new_v4(),
                region_id: node.region_id,
                hostname: node.hostname,
                public_ipv4: node.public_ipv4,
                public_ipv6: node.public_ipv6,
                public_key: node.public_key,
                endpoint: node.endpoint,
                tunnel_port: node.tunnel_port,
                status: node.status,
                capacity_score: node.initial_capacity_score,
                last_seen_at: Some(now),
                created_at: now,
                updated_at: now,
            },
        };

        tables.hostnames.insert(stored.hostname.clone(), stored.id);
        tables.nodes.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_node_health(
        &self,
        node_id: Uuid,
        capacity_score: u8,
        now: DateTime<Utc>,
    ) -> Result<Option<Node>, RepositoryError> {
        let mut tables = self.tables.write().await;
        Ok(tables.nodes.get_mut(&node_id).map(|node| {
            node.capacity_score = capacity_score;
            node.last_seen_at = Some(now);
            node.updated_at = now;
            node.clone()
        }))
    }

    async fn get_node(&self, node_id: Uuid) -> Result<Option<Node>, RepositoryError> {
        Ok(self.tables.read().await.nodes.get(&node_id).cloned())
    }

    async fn list_regions_with_capacity(&self) -> Result<Vec<RegionCapacity>, RepositoryError> {
        let tables = self.tables.read().await;
        let nodes: Vec<Node> = tables.nodes.values().cloned().collect();
        Ok(aggregate_capacity(tables.regions.values().cloned(), &nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeStatus;

    fn upsert(region_id: Uuid, hostname: &str, endpoint: &str) -> NodeUpsert {
        NodeUpsert {
            region_id,
            hostname: hostname.to_string(),
            public_ipv4: None,
            public_ipv6: None,
            public_key: "pub".to_string(),
            endpoint: endpoint.to_string(),
            tunnel_port: 51820,
            status: NodeStatus::Active,
            initial_capacity_score: 100,
        }
    }

    #[tokio::test]
    async fn region_upsert_is_keyed_by_code() {
        let repo = InMemoryNodeRepository::new();
        let first = repo.upsert_region(NewRegion::new("EU-NL", "Amsterdam", "NL")).await.unwrap();
        let second = repo
            .upsert_region(NewRegion::new("eu-nl", "Amsterdam Zuid", "NL"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Amsterdam Zuid");
        assert_eq!(second.created_at, first.created_at);
        let found = repo.get_region_by_code("Eu-Nl").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn node_upsert_is_keyed_by_hostname() {
        let repo = InMemoryNodeRepository::new();
        let region = repo.upsert_region(NewRegion::new("EU-FRA", "Frankfurt", "DE")).await.unwrap();

        let first = repo
            .register_or_update_node(upsert(region.id, "node-1", "a:1"), Utc::now())
            .await
            .unwrap();
        repo.update_node_health(first.id, 55, Utc::now()).await.unwrap();
        let second = repo
            .register_or_update_node(upsert(region.id, "node-1", "b:2"), Utc::now())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.endpoint, "b:2");
        assert_eq!(second.capacity_score, 55);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn health_update_for_unknown_node_is_none() {
        let repo = InMemoryNodeRepository::new();
        assert!(
            repo.update_node_health(Uuid::new_v4(), 10, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }
}
