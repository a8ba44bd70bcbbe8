//! Background workers
//!
//! On the master a sweep worker probes every node on an interval and then
//! reconciles node usage counters. On a storage node a heartbeat worker
//! registers with the master once and then pings it on an interval.

use crate::config::NodeRoleConfig;
use crate::error::{StoreError, StoreResult};
use crate::proxy::{NodeClient, Registration};
use crate::service::capacity::CapacityAccountant;
use crate::service::health_service::NodeHealthMonitor;
use crate::service::node_service::SharedSecret;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Periodic health sweep on the master
pub struct HealthSweepWorker {
    monitor: Arc<NodeHealthMonitor>,
    capacity: Arc<CapacityAccountant>,
    interval: Duration,
    reconcile: bool,
}

impl HealthSweepWorker {
    pub fn new(
        monitor: Arc<NodeHealthMonitor>,
        capacity: Arc<CapacityAccountant>,
        interval: Duration,
        reconcile: bool,
    ) -> Self {
        Self { monitor, capacity, interval, reconcile }
    }

    /// Start the sweep worker as a background task (non-blocking)
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        info!("Starting health sweep worker with {}s interval", self.interval.as_secs());

        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);

            loop {
                interval.tick().await;

                if let Err(e) = self.run_once().await {
                    error!("Health sweep failed: {}", e);
                }
            }
        })
    }

    /// One sweep, followed by usage reconciliation when enabled
    pub async fn run_once(&self) -> StoreResult<()> {
        self.monitor.sweep().await?;
        if self.reconcile {
            self.capacity.reconcile()?;
        }
        Ok(())
    }
}

/// Registration and periodic ping from a storage node to its master
pub struct NodeHeartbeatWorker {
    client: Arc<dyn NodeClient>,
    config: NodeRoleConfig,
    secret: SharedSecret,
}

impl NodeHeartbeatWorker {
    pub fn new(client: Arc<dyn NodeClient>, config: NodeRoleConfig, secret: SharedSecret) -> Self {
        Self { client, config, secret }
    }

    fn secret_path(&self) -> PathBuf {
        PathBuf::from(&self.config.secret_file)
    }

    fn current_secret(&self) -> Option<String> {
        self.secret.read().ok().and_then(|s| s.as_ref().cloned())
    }

    fn store_secret(&self, secret: &str) {
        if let Ok(mut slot) = self.secret.write() {
            *slot = Some(secret.to_string());
        }
    }

    /// Load the persisted secret, or register with the master and persist the one it hands out
    pub async fn ensure_registered(&self) -> StoreResult<String> {
        if let Some(secret) = self.current_secret() {
            return Ok(secret);
        }
        if let Some(secret) = read_secret_file(&self.secret_path())? {
            info!("Loaded node secret from {}", self.config.secret_file);
            self.store_secret(&secret);
            return Ok(secret);
        }

        let registration = Registration {
            name: self.config.name.clone(),
            url: self.config.public_url.clone(),
            capacity: self.config.capacity,
            priority: self.config.priority,
        };
        let response = self.client.self_register(&self.config.master_url, &registration).await?;
        write_secret_file(&self.secret_path(), &response.secret)?;
        self.store_secret(&response.secret);
        info!("Registered with master {} as node {}", self.config.master_url, response.node_id);
        Ok(response.secret)
    }

    pub async fn beat(&self) -> StoreResult<()> {
        let secret = self.ensure_registered().await?;
        self.client
            .ping_master(&self.config.master_url, &self.config.public_url, &secret)
            .await
    }

    /// Start the heartbeat as a background task (non-blocking)
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.ping_interval_secs.max(1));
        info!("Starting node heartbeat to {} every {}s", self.config.master_url, period.as_secs());

        tokio::spawn(async move {
            let mut interval = time::interval(period);

            loop {
                interval.tick().await;

                match self.beat().await {
                    Ok(()) => {}
                    Err(StoreError::Unauthorized(msg)) => {
                        warn!("Master rejected heartbeat: {}", msg)
                    }
                    Err(e) => warn!("Heartbeat to master failed: {}", e),
                }
            }
        })
    }
}

fn read_secret_file(path: &Path) -> StoreResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let secret = content.trim().to_string();
            Ok(if secret.is_empty() { None } else { Some(secret) })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_secret_file(path: &Path, secret: &str) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, secret)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockMetadataStore;
    use crate::metadata::{NodeRegistry, ObjectCatalog, StorageNode};
    use crate::proxy::mock_client::MockNodeClient;
    use std::sync::RwLock;
    use tempfile::TempDir;

    fn node_config(dir: &TempDir) -> NodeRoleConfig {
        NodeRoleConfig {
            master_url: "http://master:8080".to_string(),
            name: "node-a".to_string(),
            public_url: "http://node-a:8081".to_string(),
            capacity: 500,
            priority: 2,
            secret_file: dir.path().join("keys").join("node_secret").to_string_lossy().to_string(),
            ping_interval_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_registers_once_then_pings() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockNodeClient::new());
        client.set_issued_secret("issued-secret");
        let secret: SharedSecret = Arc::new(RwLock::new(None));
        let worker = NodeHeartbeatWorker::new(client.clone(), node_config(&dir), secret.clone());

        worker.beat().await.unwrap();
        worker.beat().await.unwrap();

        let registrations = client.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].url, "http://node-a:8081");
        assert_eq!(registrations[0].priority, 2);
        assert_eq!(
            client.pings(),
            vec![
                ("http://node-a:8081".to_string(), "issued-secret".to_string()),
                ("http://node-a:8081".to_string(), "issued-secret".to_string()),
            ]
        );
        assert_eq!(secret.read().unwrap().as_deref(), Some("issued-secret"));
        let persisted = std::fs::read_to_string(dir.path().join("keys").join("node_secret")).unwrap();
        assert_eq!(persisted, "issued-secret");
    }

    #[tokio::test]
    async fn test_heartbeat_reuses_persisted_secret() {
        let dir = TempDir::new().unwrap();
        let config = node_config(&dir);
        write_secret_file(Path::new(&config.secret_file), "saved-secret\n").unwrap();
        let client = Arc::new(MockNodeClient::new());
        let worker = NodeHeartbeatWorker::new(client.clone(), config, Arc::new(RwLock::new(None)));

        assert_eq!(worker.ensure_registered().await.unwrap(), "saved-secret");
        assert!(client.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_unreachable_master() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockNodeClient::new());
        client.set_unreachable("http://master:8080", true);
        let secret: SharedSecret = Arc::new(RwLock::new(None));
        let worker = NodeHeartbeatWorker::new(client.clone(), node_config(&dir), secret.clone());

        assert!(matches!(worker.beat().await, Err(StoreError::NodeUnavailable(_))));
        assert!(secret.read().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_worker_reconciles_after_sweep() {
        let metadata = Arc::new(MockMetadataStore::new());
        let client = Arc::new(MockNodeClient::new());
        let node = StorageNode::new("node-a", "http://node-a:8081", "s", 100, 1, true);
        metadata.insert_node(&node).unwrap();
        metadata.set_used_storage(&node.id, 77).unwrap();
        assert!(metadata.list_objects("none").unwrap().is_empty());

        let worker = HealthSweepWorker::new(
            Arc::new(NodeHealthMonitor::new(metadata.clone(), client.clone())),
            Arc::new(CapacityAccountant::new(metadata.clone(), 0)),
            Duration::from_secs(60),
            true,
        );
        worker.run_once().await.unwrap();

        let stored = metadata.find_node(&node.id).unwrap().unwrap();
        assert!(stored.healthy);
        assert_eq!(stored.used_storage, 0);
        assert_eq!(metadata.health_batches(), 1);
    }
}
