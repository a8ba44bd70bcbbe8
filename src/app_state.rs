//! Application State Management
//!
//! This module provides the application state that contains all services
//! and their dependencies, following the dependency injection pattern.

use log::info;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::{AppConfig, MetadataBackend};
use crate::error::StoreResult;
use crate::metadata::{mock_store::MockMetadataStore, sqlite_store::SQLiteMetadataStore, MetadataStorage};
use crate::proxy::{http_client::HttpNodeClient, mock_client::MockNodeClient, NodeClient};
use crate::service::capacity::CapacityAccountant;
use crate::service::health_service::NodeHealthMonitor;
use crate::service::health_worker::{HealthSweepWorker, NodeHeartbeatWorker};
use crate::service::node_service::{NodeObjectService, NodeService, SharedSecret};
use crate::service::placement_service::PlacementEngine;
use crate::service::router::ObjectRouter;
use crate::service::token_service::CapabilityTokenService;
use crate::storage::{self, mock_store::MockBlobStore, BlobStore};

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub metadata: Arc<dyn MetadataStorage>,
    pub node_client: Arc<dyn NodeClient>,
    pub capacity: Arc<CapacityAccountant>,
    pub placement: Arc<PlacementEngine>,
    pub router: Arc<ObjectRouter>,
    pub health: Arc<NodeHealthMonitor>,
    pub nodes: Arc<NodeService>,
    pub node_objects: Arc<NodeObjectService>,
    pub tokens: Arc<CapabilityTokenService>,
    /// Secret shared with the master, only used in the node role
    pub node_secret: SharedSecret,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> StoreResult<Self> {
        info!("Initializing application state for role {:?}", config.role);

        let metadata: Arc<dyn MetadataStorage> = match config.metadata.backend {
            MetadataBackend::SQLite => {
                info!(
                    "Using SQLite metadata backend with db_path: {}, wal_mode: {}",
                    config.metadata.db_path, config.metadata.wal_mode
                );
                Arc::new(SQLiteMetadataStore::open(
                    Path::new(&config.metadata.db_path),
                    config.metadata.wal_mode,
                )?)
            }
            MetadataBackend::Mock => {
                info!("Using mock metadata backend");
                Arc::new(MockMetadataStore::new())
            }
        };

        info!(
            "Using {:?} storage backend with base_path: {}, max_storage: {}",
            config.storage.backend, config.storage.base_path, config.storage.max_storage
        );
        let blobs = storage::create_store(&config.storage)?;

        let client: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(
            Duration::from_secs(config.nodes.probe_timeout_secs),
            Duration::from_secs(config.nodes.proxy_timeout_secs),
        )?);

        let state = Self::with_backends(config, metadata, blobs, client);
        info!("Application state initialized successfully");
        Ok(state)
    }

    /// Wire every service on top of the given backends
    pub fn with_backends(
        config: AppConfig,
        metadata: Arc<dyn MetadataStorage>,
        blobs: Arc<dyn BlobStore>,
        node_client: Arc<dyn NodeClient>,
    ) -> Self {
        let capacity = Arc::new(CapacityAccountant::new(metadata.clone(), config.storage.max_storage));
        let placement = Arc::new(PlacementEngine::new(
            metadata.clone(),
            blobs.clone(),
            node_client.clone(),
            capacity.clone(),
        ));
        let router = Arc::new(ObjectRouter::new(metadata.clone(), blobs.clone(), node_client.clone()));
        let health = Arc::new(NodeHealthMonitor::new(metadata.clone(), node_client.clone()));
        let nodes = Arc::new(NodeService::new(metadata.clone()));
        let node_objects = Arc::new(NodeObjectService::new(metadata.clone(), blobs));
        let tokens = Arc::new(CapabilityTokenService::new(
            metadata.clone(),
            &config.signing,
            &config.server.base_url,
        ));

        Self {
            config,
            metadata,
            node_client,
            capacity,
            placement,
            router,
            health,
            nodes,
            node_objects,
            tokens,
            node_secret: Arc::new(RwLock::new(None)),
        }
    }

    /// Create application state for testing with mock backends
    pub fn new_for_testing(config: AppConfig) -> Self {
        Self::with_backends(
            config,
            Arc::new(MockMetadataStore::new()),
            Arc::new(MockBlobStore::new()),
            Arc::new(MockNodeClient::new()),
        )
    }

    pub fn node_secret(&self) -> Option<String> {
        self.node_secret.read().ok().and_then(|s| s.as_ref().cloned())
    }

    pub fn set_node_secret(&self, secret: &str) {
        if let Ok(mut slot) = self.node_secret.write() {
            *slot = Some(secret.to_string());
        }
    }

    pub fn sweep_worker(&self) -> HealthSweepWorker {
        HealthSweepWorker::new(
            self.health.clone(),
            self.capacity.clone(),
            Duration::from_secs(self.config.nodes.health_sweep_interval_secs.max(1)),
            self.config.nodes.reconcile_usage,
        )
    }

    pub fn heartbeat_worker(&self) -> NodeHeartbeatWorker {
        NodeHeartbeatWorker::new(
            self.node_client.clone(),
            self.config.node.clone(),
            self.node_secret.clone(),
        )
    }
}
