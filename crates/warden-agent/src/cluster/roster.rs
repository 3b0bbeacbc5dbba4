//! Node roster: the role-labelled list of cluster nodes.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use warden_common::constants::redis_keys;
use warden_common::{NodeRecord, Result, RoleFilter, WardenError};

use super::{redis_err, with_deadline};

/// Read access to the cluster's node list
#[async_trait]
pub trait NodeRoster: Send + Sync {
    /// List nodes matching the role filter
    async fn list(&self, filter: RoleFilter) -> Result<Vec<NodeRecord>>;
}

/// Roster stored in a Redis hash (field = node name, value = JSON record)
#[derive(Clone)]
pub struct RedisNodeRoster {
    redis: ConnectionManager,
    timeout: Duration,
}

impl RedisNodeRoster {
    pub fn new(redis: ConnectionManager, timeout: Duration) -> Self {
        Self { redis, timeout }
    }

    /// Publish (or replace) a node record
    pub async fn register(&self, node: &NodeRecord) -> Result<()> {
        let data = serde_json::to_string(node)?;
        let mut conn = self.redis.clone();

        with_deadline(self.timeout, "roster register", async move {
            conn.hset::<_, _, _, ()>(redis_keys::NODES, &node.name, data)
                .await
                .map_err(redis_err)
        })
        .await?;

        tracing::debug!(node = %node.name, labels = ?node.labels, "Node registered in roster");
        Ok(())
    }
}

#[async_trait]
impl NodeRoster for RedisNodeRoster {
    async fn list(&self, filter: RoleFilter) -> Result<Vec<NodeRecord>> {
        let mut conn = self.redis.clone();
        let raw: Vec<String> = with_deadline(self.timeout, "roster list", async move {
            conn.hvals(redis_keys::NODES).await.map_err(redis_err)
        })
        .await
        .map_err(|e| match e {
            WardenError::Store(msg) => WardenError::Roster(msg),
            other => other,
        })?;

        Self::decode(raw, filter)
    }
}

impl RedisNodeRoster {
    /// Decode raw roster entries. One malformed entry fails the whole
    /// listing: a node missing from the result would shrink the peer
    /// batch count or escape role classification.
    fn decode(raw: Vec<String>, filter: RoleFilter) -> Result<Vec<NodeRecord>> {
        let mut nodes = Vec::with_capacity(raw.len());
        for data in raw {
            let node = serde_json::from_str::<NodeRecord>(&data).map_err(|e| {
                tracing::warn!(error = %e, "Malformed roster entry");
                WardenError::Roster(format!("malformed roster entry: {e}"))
            })?;
            if filter.matches(&node) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

/// In-memory roster
#[derive(Default)]
pub struct StaticRoster {
    nodes: RwLock<Vec<NodeRecord>>,
    failing: AtomicBool,
}

impl StaticRoster {
    pub fn new(nodes: Vec<NodeRecord>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
            failing: AtomicBool::new(false),
        }
    }

    /// Replace the node list
    pub fn set_nodes(&self, nodes: Vec<NodeRecord>) {
        *self.nodes.write() = nodes;
    }

    /// Make every subsequent query fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeRoster for StaticRoster {
    async fn list(&self, filter: RoleFilter) -> Result<Vec<NodeRecord>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WardenError::Roster("roster unavailable".to_string()));
        }

        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common::constants::labels;

    #[tokio::test]
    async fn test_static_roster_filters_by_role() {
        let roster = StaticRoster::new(vec![
            NodeRecord::new("cp-0").with_label(labels::CONTROL_PLANE_ROLE, ""),
            NodeRecord::new("w-0").with_label(labels::WORKER_ROLE, ""),
            NodeRecord::new("w-1").with_label(labels::WORKER_ROLE, ""),
        ]);

        assert_eq!(roster.list(RoleFilter::Workers).await.unwrap().len(), 2);
        assert_eq!(roster.list(RoleFilter::ControlPlane).await.unwrap().len(), 1);
        assert_eq!(roster.list(RoleFilter::Any).await.unwrap().len(), 3);
    }

    #[test]
    fn test_decode_filters_valid_entries() {
        let raw = vec![
            serde_json::to_string(&NodeRecord::new("w-0").with_label(labels::WORKER_ROLE, "")).unwrap(),
            serde_json::to_string(&NodeRecord::new("cp-0").with_label(labels::CONTROL_PLANE_ROLE, "")).unwrap(),
        ];
        let nodes = RedisNodeRoster::decode(raw, RoleFilter::Workers).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "w-0");
    }

    #[test]
    fn test_decode_rejects_malformed_entry() {
        let raw = vec![
            serde_json::to_string(&NodeRecord::new("w-0").with_label(labels::WORKER_ROLE, "")).unwrap(),
            "{bad json".to_string(),
        ];
        let err = RedisNodeRoster::decode(raw, RoleFilter::Workers).unwrap_err();
        assert!(matches!(err, WardenError::Roster(_)));
    }

    #[tokio::test]
    async fn test_static_roster_failure() {
        let roster = StaticRoster::new(vec![]);
        roster.set_failing(true);

        let err = roster.list(RoleFilter::Any).await.unwrap_err();
        assert!(matches!(err, WardenError::Roster(_)));
        assert!(err.is_retryable());

        roster.set_failing(false);
        assert!(roster.list(RoleFilter::Any).await.unwrap().is_empty());
    }
}
