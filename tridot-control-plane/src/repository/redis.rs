use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::warn;
use uuid::Uuid;

use super::{NodeRepository, aggregate_capacity};
use crate::error::RepositoryError;
use crate::model::{NewRegion, Node, NodeStatus, NodeUpsert, Region, RegionCapacity};

const REGIONS_KEY: &str = "tridot:regions";
const FETCH_CHUNK: usize = 200;

fn region_code_key(code: &str) -> String {
    format!("tridot:region:code:{code}")
}

fn region_key(id: &str) -> String {
    format!("tridot:region:{id}")
}

fn region_nodes_key(region_id: &str) -> String {
    format!("tridot:region:{region_id}:nodes")
}

fn node_key(id: &str) -> String {
    format!("tridot:node:{id}")
}

fn hostname_key(hostname: &str) -> String {
    format!("tridot:node:hostname:{hostname}")
}

const UPSERT_REGION_SCRIPT: &str = r#"
    local code_key = KEYS[1]
    local new_id = ARGV[1]
    local now = ARGV[6]

    local id = redis.call('GET', code_key)
    if not id then
        id = new_id
        redis.call('SET', code_key, id)
        redis.call('HSET', 'tridot:region:' .. id, 'created_at', now)
    end

    redis.call('SADD', 'tridot:regions', id)
    redis.call('HSET', 'tridot:region:' .. id,
        'id', id,
        'code', ARGV[2],
        'name', ARGV[3],
        'country_code', ARGV[4],
        'is_active', ARGV[5],
        'updated_at', now)
    return id
"#;

const UPSERT_NODE_SCRIPT: &str = r#"
    local hostname_key = KEYS[1]
    local new_id = ARGV[1]
    local region_id = ARGV[2]
    local now = ARGV[11]

    local id = redis.call('GET', hostname_key)
    local created = false
    if not id then
        id = new_id
        created = true
        redis.call('SET', hostname_key, id)
    end

    local node_key = 'tridot:node:' .. id
    local previous_region = redis.call('HGET', node_key, 'region_id')
    if previous_region and previous_region ~= region_id then
        redis.call('SREM', 'tridot:region:' .. previous_region .. ':nodes', id)
    end
    redis.call('SADD', 'tridot:region:' .. region_id .. ':nodes', id)

    redis.call('HSET', node_key,
        'id', id,
        'region_id', region_id,
        'hostname', ARGV[3],
        'public_ipv4', ARGV[4],
        'public_ipv6', ARGV[5],
        'public_key', ARGV[6],
        'endpoint', ARGV[7],
        'tunnel_port', ARGV[8],
        'status', ARGV[9],
        'last_seen_at', now,
        'updated_at', now)
    if created then
        redis.call('HSET', node_key, 'capacity_score', ARGV[10], 'created_at', now)
    end
    return id
"#;

const UPDATE_HEALTH_SCRIPT: &str = r#"
    local node_key = KEYS[1]
    if redis.call('EXISTS', node_key) == 0 then
        return 0
    end
    redis.call('HSET', node_key,
        'capacity_score', ARGV[1],
        'last_seen_at', ARGV[2],
        'updated_at', ARGV[2])
    return 1
"#;

/// Redis-backed repository. Regions and nodes are hashes; the code and
/// hostname indexes are plain keys. Upserts run as Lua scripts so a
/// concurrent registration of the same hostname resolves to one node.
#[derive(Clone)]
pub struct RedisNodeRepository {
    conn: ConnectionManager,
}

impl RedisNodeRepository {
    pub async fn connect(redis_url: &str) -> Result<Self, RepositoryError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    async fn fetch_hash(&self, key: String) -> Result<HashMap<String, String>, RepositoryError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(map)
    }

    async fn fetch_members(&self, key: &str) -> Result<Vec<String>, RepositoryError> {
        let mut conn = self.conn.clone();
        let mut members: Vec<String> =
            redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        members.sort();
        Ok(members)
    }

    /// HGETALL for every id, pipelined in chunks. Missing hashes come back
    /// as empty maps.
    async fn fetch_hashes_bulk(
        &self,
        keys: &[String],
    ) -> Result<Vec<(String, HashMap<String, String>)>, RepositoryError> {
        let mut conn = self.conn.clone();
        let mut result = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(FETCH_CHUNK) {
            let mut pipe = redis::pipe();
            for key in chunk {
                pipe.cmd("HGETALL").arg(key);
            }
            let maps: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;
            result.extend(chunk.iter().cloned().zip(maps));
        }
        Ok(result)
    }

    async fn load_region(&self, id: &str) -> Result<Option<Region>, RepositoryError> {
        let key = region_key(id);
        let map = self.fetch_hash(key.clone()).await?;
        if map.is_empty() {
            return Ok(None);
        }
        region_from_map(&key, &map).map(Some)
    }

    async fn load_node(&self, id: &str) -> Result<Option<Node>, RepositoryError> {
        let key = node_key(id);
        let map = self.fetch_hash(key.clone()).await?;
        if map.is_empty() {
            return Ok(None);
        }
        node_from_map(&key, &map).map(Some)
    }

    async fn load_required_node(&self, id: &str) -> Result<Node, RepositoryError> {
        self.load_node(id).await?.ok_or_else(|| RepositoryError::Corrupt {
            key: node_key(id),
            reason: "node hash missing after upsert".to_string(),
        })
    }
}

#[async_trait]
impl NodeRepository for RedisNodeRepository {
    async fn upsert_region(&self, region: NewRegion) -> Result<Region, RepositoryError> {
        let mut conn = self.conn.clone();
        let code = region.code.to_ascii_uppercase();
        let id: String = Script::new(UPSERT_REGION_SCRIPT)
            .key(region_code_key(&code))
            .arg(Uuid::new_v4().to_string())
            .arg(&code)
            .arg(&region.name)
            .arg(&region.country_code)
            .arg(if region.is_active { "1" } else { "0" })
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        self.load_region(&id)
            .await?
            .ok_or_else(|| RepositoryError::Corrupt {
                key: region_key(&id),
                reason: "region hash missing after upsert".to_string(),
            })
    }

    async fn get_region_by_code(&self, code: &str) -> Result<Option<Region>, RepositoryError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = redis::cmd("GET")
            .arg(region_code_key(&code.to_ascii_uppercase()))
            .query_async(&mut conn)
            .await?;
        match id {
            Some(id) => self.load_region(&id).await,
            None => Ok(None),
        }
    }

    async fn register_or_update_node(
        &self,
        node: NodeUpsert,
        now: DateTime<Utc>,
    ) -> Result<Node, RepositoryError> {
        let mut conn = self.conn.clone();
        let id: String = Script::new(UPSERT_NODE_SCRIPT)
            .key(hostname_key(&node.hostname))
            .arg(Uuid::new_v4().to_string())
            .arg(node.region_id.to_string())
            .arg(&node.hostname)
            .arg(node.public_ipv4.as_deref().unwrap_or(""))
            .arg(node.public_ipv6.as_deref().unwrap_or(""))
            .arg(&node.public_key)
            .arg(&node.endpoint)
            .arg(node.tunnel_port)
            .arg(node.status.as_str())
            .arg(u32::from(node.initial_capacity_score))
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        self.load_required_node(&id).await
    }

    async fn update_node_health(
        &self,
        node_id: Uuid,
        capacity_score: u8,
        now: DateTime<Utc>,
    ) -> Result<Option<Node>, RepositoryError> {
        let mut conn = self.conn.clone();
        let id = node_id.to_string();
        let updated: i64 = Script::new(UPDATE_HEALTH_SCRIPT)
            .key(node_key(&id))
            .arg(u32::from(capacity_score))
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        if updated == 0 {
            return Ok(None);
        }
        self.load_node(&id).await
    }

    async fn get_node(&self, node_id: Uuid) -> Result<Option<Node>, RepositoryError> {
        self.load_node(&node_id.to_string()).await
    }

    async fn list_regions_with_capacity(&self) -> Result<Vec<RegionCapacity>, RepositoryError> {
        let region_ids = self.fetch_members(REGIONS_KEY).await?;
        let region_keys: Vec<String> = region_ids.iter().map(|id| region_key(id)).collect();

        let mut regions = Vec::with_capacity(region_keys.len());
        for (key, map) in self.fetch_hashes_bulk(&region_keys).await? {
            if map.is_empty() {
                warn!(%key, "Region listed in index but hash is missing; skipping");
                continue;
            }
            regions.push(region_from_map(&key, &map)?);
        }

        let mut node_ids = HashSet::new();
        for region in &regions {
            node_ids.extend(
                self.fetch_members(&region_nodes_key(&region.id.to_string()))
                    .await?,
            );
        }
        let mut node_keys: Vec<String> = node_ids.iter().map(|id| node_key(id)).collect();
        node_keys.sort();

        let mut nodes = Vec::with_capacity(node_keys.len());
        for (key, map) in self.fetch_hashes_bulk(&node_keys).await? {
            if map.is_empty() {
                warn!(%key, "Node listed in region but hash is missing; skipping");
                continue;
            }
            match node_from_map(&key, &map) {
                Ok(node) => nodes.push(node),
                Err(e) => warn!(error = %e, "Skipping unreadable node record"),
            }
        }

        Ok(aggregate_capacity(regions, &nodes))
    }
}

fn corrupt(key: &str, reason: impl Into<String>) -> RepositoryError {
    RepositoryError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn field<'a>(
    key: &str,
    map: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, RepositoryError> {
    map.get(name)
        .map(String::as_str)
        .ok_or_else(|| corrupt(key, format!("missing field '{name}'")))
}

fn optional_field(map: &HashMap<String, String>, name: &str) -> Option<String> {
    map.get(name).filter(|value| !value.is_empty()).cloned()
}

fn parse_field<T>(key: &str, map: &HashMap<String, String>, name: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    field(key, map, name)?
        .parse()
        .map_err(|e| corrupt(key, format!("invalid '{name}': {e}")))
}

fn parse_time(key: &str, value: &str, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| corrupt(key, format!("invalid '{name}': {e}")))
}

fn time_field(
    key: &str,
    map: &HashMap<String, String>,
    name: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    parse_time(key, field(key, map, name)?, name)
}

pub(crate) fn region_from_map(
    key: &str,
    map: &HashMap<String, String>,
) -> Result<Region, RepositoryError> {
    Ok(Region {
        id: parse_field(key, map, "id")?,
        code: field(key, map, "code")?.to_string(),
        name: field(key, map, "name")?.to_string(),
        country_code: field(key, map, "country_code")?.to_string(),
        is_active: field(key, map, "is_active")? == "1",
        created_at: time_field(key, map, "created_at")?,
        updated_at: time_field(key, map, "updated_at")?,
    })
}

pub(crate) fn node_from_map(
    key: &str,
    map: &HashMap<String, String>,
) -> Result<Node, RepositoryError> {
    let status = field(key, map, "status")?;
    let status = NodeStatus::from_str(status).map_err(|reason| corrupt(key, reason))?;
    let last_seen_at = match optional_field(map, "last_seen_at") {
        Some(value) => Some(parse_time(key, &value, "last_seen_at")?),
        None => None,
    };

    Ok(Node {
        id: parse_field(key, map, "id")?,
        region_id: parse_field(key, map, "region_id")?,
        hostname: field(key, map, "hostname")?.to_string(),
        public_ipv4: optional_field(map, "public_ipv4"),
        public_ipv6: optional_field(map, "public_ipv6"),
        public_key: field(key, map, "public_key")?.to_string(),
        endpoint: field(key, map, "endpoint")?.to_string(),
        tunnel_port: parse_field(key, map, "tunnel_port")?,
        status,
        capacity_score: parse_field(key, map, "capacity_score")?,
        last_seen_at,
        created_at: time_field(key, map, "created_at")?,
        updated_at: time_field(key, map, "updated_at")?,
    })
}
