//! Node health tracking
//!
//! Active probes go out from the master; passive pings come in from the
//! nodes. Either way only `healthy` and `last_contact` change.

use crate::error::{StoreError, StoreResult};
use crate::metadata::{HealthUpdate, MetadataStorage, NodeRegistry, StorageNode};
use crate::proxy::NodeClient;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeHealthReport {
    pub node_id: String,
    pub name: String,
    pub url: String,
    pub healthy: bool,
    pub latency_ms: u64,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct NodeHealthMonitor {
    metadata: Arc<dyn MetadataStorage>,
    client: Arc<dyn NodeClient>,
}

impl NodeHealthMonitor {
    pub fn new(metadata: Arc<dyn MetadataStorage>, client: Arc<dyn NodeClient>) -> Self {
        Self { metadata, client }
    }

    async fn check(&self, node: &StorageNode) -> NodeHealthReport {
        let result = self.client.probe_health(&node.url).await;
        if !result.healthy {
            warn!(
                "Node {} failed health check: {}",
                node.name,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        NodeHealthReport {
            node_id: node.id.clone(),
            name: node.name.clone(),
            url: node.url.clone(),
            healthy: result.healthy,
            latency_ms: result.latency_ms,
            status: result.status,
            error: result.error,
            checked_at: Utc::now(),
        }
    }

    /// Probe one node and persist the outcome
    pub async fn probe(&self, node_id: &str) -> StoreResult<NodeHealthReport> {
        let node = self
            .metadata
            .find_node(node_id)?
            .ok_or_else(|| StoreError::NotFound(format!("node {}", node_id)))?;
        let report = self.check(&node).await;
        self.metadata.record_health(&HealthUpdate {
            node_id: report.node_id.clone(),
            healthy: report.healthy,
            at: report.checked_at,
        })?;
        Ok(report)
    }

    /// Probe every registered node concurrently and persist all results in one batch
    pub async fn sweep(&self) -> StoreResult<Vec<NodeHealthReport>> {
        let nodes = self.metadata.list_nodes()?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        let reports = join_all(nodes.iter().map(|node| self.check(node))).await;
        let updates: Vec<HealthUpdate> = reports
            .iter()
            .map(|r| HealthUpdate { node_id: r.node_id.clone(), healthy: r.healthy, at: r.checked_at })
            .collect();
        self.metadata.record_health_batch(&updates)?;

        let healthy = reports.iter().filter(|r| r.healthy).count();
        info!("Health sweep finished: {}/{} nodes healthy", healthy, reports.len());
        Ok(reports)
    }

    /// Passive path: a node calls in with its URL and secret
    pub fn ping(&self, url: &str, secret: &str) -> StoreResult<StorageNode> {
        let mut node = match self.metadata.find_node_by_url(url)? {
            Some(node) if !secret.is_empty() && node.secret == secret => node,
            _ => {
                warn!("Rejected ping from {}: unknown node or wrong secret", url);
                return Err(StoreError::Unauthorized("invalid node credentials".to_string()));
            }
        };
        let now = Utc::now();
        self.metadata.record_health(&HealthUpdate { node_id: node.id.clone(), healthy: true, at: now })?;
        node.healthy = true;
        node.last_contact = Some(now);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockMetadataStore;
    use crate::proxy::mock_client::MockNodeClient;

    fn setup() -> (Arc<MockMetadataStore>, Arc<MockNodeClient>, NodeHealthMonitor) {
        let metadata = Arc::new(MockMetadataStore::new());
        let client = Arc::new(MockNodeClient::new());
        let monitor = NodeHealthMonitor::new(metadata.clone(), client.clone());
        (metadata, client, monitor)
    }

    fn register(metadata: &MockMetadataStore, name: &str) -> StorageNode {
        let node = StorageNode::new(name, &format!("http://{}:8081", name), "secret", 100, 1, true);
        metadata.insert_node(&node).unwrap();
        node
    }

    #[tokio::test]
    async fn test_probe_twice_only_moves_last_contact() {
        let (metadata, _client, monitor) = setup();
        let node = register(&metadata, "node-a");

        let first = monitor.probe(&node.id).await.unwrap();
        assert!(first.healthy);
        let after_first = metadata.find_node(&node.id).unwrap().unwrap();

        let second = monitor.probe(&node.id).await.unwrap();
        assert!(second.healthy);
        let after_second = metadata.find_node(&node.id).unwrap().unwrap();

        assert!(after_first.healthy && after_second.healthy);
        assert!(after_second.active);
        assert_eq!(after_first.used_storage, after_second.used_storage);
        assert_eq!(after_first.capacity, after_second.capacity);
        assert!(after_second.last_contact >= after_first.last_contact);
    }

    #[tokio::test]
    async fn test_probe_failures_mark_unhealthy_but_keep_active() {
        let (metadata, client, monitor) = setup();
        let node = register(&metadata, "node-a");
        monitor.probe(&node.id).await.unwrap();

        client.set_reject(&node.url, Some(503));
        let report = monitor.probe(&node.id).await.unwrap();
        assert!(!report.healthy);
        assert_eq!(report.status, Some(503));

        client.set_reject(&node.url, None);
        client.set_unreachable(&node.url, true);
        let report = monitor.probe(&node.id).await.unwrap();
        assert!(!report.healthy);
        assert!(report.error.is_some());

        let stored = metadata.find_node(&node.id).unwrap().unwrap();
        assert!(!stored.healthy);
        assert!(stored.active);
    }

    #[tokio::test]
    async fn test_probe_unknown_node() {
        let (_metadata, _client, monitor) = setup();
        assert!(matches!(monitor.probe("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sweep_persists_once() {
        let (metadata, client, monitor) = setup();
        let up = register(&metadata, "node-a");
        let down = register(&metadata, "node-b");
        client.set_unreachable(&down.url, true);

        let reports = monitor.sweep().await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(client.probe_count(), 2);
        assert_eq!(metadata.health_batches(), 1);
        assert!(metadata.find_node(&up.id).unwrap().unwrap().healthy);
        assert!(!metadata.find_node(&down.id).unwrap().unwrap().healthy);
        assert!(metadata.find_node(&down.id).unwrap().unwrap().last_contact.is_some());
    }

    #[test]
    fn test_ping_requires_matching_secret() {
        let (metadata, _client, monitor) = setup();
        let node = register(&metadata, "node-a");

        assert!(matches!(monitor.ping(&node.url, "wrong"), Err(StoreError::Unauthorized(_))));
        assert!(matches!(monitor.ping("http://other:1", "secret"), Err(StoreError::Unauthorized(_))));
        assert!(matches!(monitor.ping(&node.url, ""), Err(StoreError::Unauthorized(_))));
        assert!(!metadata.find_node(&node.id).unwrap().unwrap().healthy);

        let pinged = monitor.ping(&format!("{}/", node.url), "secret").unwrap();
        assert!(pinged.healthy);
        let stored = metadata.find_node(&node.id).unwrap().unwrap();
        assert!(stored.healthy);
        assert!(stored.last_contact.is_some());
    }
}
