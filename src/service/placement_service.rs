//! Upload placement: local disk first, then the first eligible storage node
//!
//! The choice is made once per object and recorded in its location
//! descriptor. Only one node is ever tried; when it lacks space or rejects
//! the write the upload fails.

use crate::error::{StoreError, StoreResult};
use crate::metadata::{
    AuthPolicy, Bucket, MetadataStorage, NodeRegistry, ObjectCatalog, ObjectLocation, StorageNode,
    StoredObject,
};
use crate::proxy::{NodeClient, RemoteWrite};
use crate::service::capacity::CapacityAccountant;
use crate::storage::{sha256_hex, validate_component, BlobStore};
use bytes::Bytes;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// An incoming object, fully buffered
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket: Bucket,
    pub filename: String,
    pub content_type: String,
    pub uploaded_by: String,
    pub auth_policy: Option<AuthPolicy>,
    pub data: Bytes,
}

pub struct PlacementEngine {
    metadata: Arc<dyn MetadataStorage>,
    blobs: Arc<dyn BlobStore>,
    nodes: Arc<dyn NodeClient>,
    capacity: Arc<CapacityAccountant>,
}

impl PlacementEngine {
    pub fn new(
        metadata: Arc<dyn MetadataStorage>,
        blobs: Arc<dyn BlobStore>,
        nodes: Arc<dyn NodeClient>,
        capacity: Arc<CapacityAccountant>,
    ) -> Self {
        Self { metadata, blobs, nodes, capacity }
    }

    pub async fn place(&self, request: UploadRequest) -> StoreResult<StoredObject> {
        validate_component("bucket name", &request.bucket.name)?;
        if request.filename.is_empty() {
            return Err(StoreError::BadRequest("filename is required".to_string()));
        }

        let object_id = uuid::Uuid::new_v4().to_string();
        let size = request.data.len() as u64;
        let master_free = self.capacity.master_free_space()?;
        debug!(
            "Placing {} ({} bytes) in bucket {}, master free space {}",
            request.filename, size, request.bucket.name, master_free
        );

        if size as i128 <= master_free as i128 {
            self.place_locally(&request, object_id, size)
        } else {
            self.place_on_node(&request, object_id, size).await
        }
    }

    fn place_locally(&self, request: &UploadRequest, object_id: String, size: u64) -> StoreResult<StoredObject> {
        let blob = self.blobs.write(&request.bucket.name, &object_id, &request.data)?;
        let object = self.record(request, object_id, size, blob.checksum, ObjectLocation::Local {
            path: blob.path.clone(),
        });

        if let Err(e) = self.metadata.insert_object(&object) {
            error!("Failed to record local object {}: {}", object.id, e);
            if let Err(cleanup) = self.blobs.delete(&blob.path) {
                warn!("Failed to remove orphaned file {}: {}", blob.path.display(), cleanup);
            }
            return Err(e);
        }

        info!("Stored {} locally at {}", object.id, blob.path.display());
        Ok(object)
    }

    async fn place_on_node(&self, request: &UploadRequest, object_id: String, size: u64) -> StoreResult<StoredObject> {
        let node = self.metadata.first_eligible_node()?.ok_or(StoreError::NoStorageAvailable)?;

        let free = CapacityAccountant::node_free_space(&node);
        if (free as i128) < size as i128 {
            warn!(
                "Node {} selected for {} but has {} bytes free, {} needed",
                node.name, object_id, free, size
            );
            return Err(StoreError::CapacityExhausted(format!(
                "master is full and node {} has {} bytes free, {} needed",
                node.name,
                free.max(0),
                size
            )));
        }

        let write = RemoteWrite {
            bucket_id: request.bucket.id.clone(),
            bucket_name: request.bucket.name.clone(),
            object_id: object_id.clone(),
            filename: request.filename.clone(),
            content_type: request.content_type.clone(),
            data: request.data.clone(),
        };
        self.nodes.write_object(&node, &write).await.map_err(|e| {
            error!("Remote write of {} to node {} failed: {}", object_id, node.name, e);
            e
        })?;

        if let Err(e) = self.metadata.adjust_used_storage(&node.id, size as i64) {
            error!("Failed to charge {} bytes to node {}: {}", size, node.name, e);
            self.discard_remote(&node, &request.bucket, &object_id).await;
            return Err(e);
        }

        let location = ObjectLocation::Remote {
            node_id: node.id.clone(),
            bucket_id: request.bucket.id.clone(),
            object_id: object_id.clone(),
        };
        let object = self.record(request, object_id, size, sha256_hex(&request.data), location);

        if let Err(e) = self.metadata.insert_object(&object) {
            error!("Failed to record remote object {}: {}", object.id, e);
            if let Err(rollback) = self.metadata.adjust_used_storage(&node.id, -(size as i64)) {
                warn!("Failed to roll back usage of node {}: {}", node.name, rollback);
            }
            self.discard_remote(&node, &request.bucket, &object.id).await;
            return Err(e);
        }

        info!("Stored {} on node {} ({} bytes)", object.id, node.name, size);
        Ok(object)
    }

    /// Best effort, the write already failed from the caller's point of view
    async fn discard_remote(&self, node: &StorageNode, bucket: &Bucket, object_id: &str) {
        if let Err(e) = self.nodes.delete_object(node, &bucket.name, object_id).await {
            warn!("Failed to remove orphaned {} from node {}: {}", object_id, node.name, e);
        }
    }

    fn record(
        &self,
        request: &UploadRequest,
        object_id: String,
        size: u64,
        checksum: String,
        location: ObjectLocation,
    ) -> StoredObject {
        StoredObject {
            id: object_id,
            bucket_id: request.bucket.id.clone(),
            name: request.filename.clone(),
            size,
            content_type: request.content_type.clone(),
            checksum,
            location,
            auth_policy: request.auth_policy.clone(),
            uploaded_by: request.uploaded_by.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockMetadataStore;
    use crate::metadata::HealthUpdate;
    use crate::proxy::mock_client::MockNodeClient;
    use crate::storage::mock_store::MockBlobStore;

    struct Harness {
        metadata: Arc<MockMetadataStore>,
        blobs: Arc<MockBlobStore>,
        client: Arc<MockNodeClient>,
        engine: PlacementEngine,
        bucket: Bucket,
    }

    fn harness(master_capacity: u64) -> Harness {
        let metadata = Arc::new(MockMetadataStore::new());
        let blobs = Arc::new(MockBlobStore::new());
        let client = Arc::new(MockNodeClient::new());
        let capacity = Arc::new(CapacityAccountant::new(metadata.clone(), master_capacity));
        let engine = PlacementEngine::new(metadata.clone(), blobs.clone(), client.clone(), capacity);
        let bucket = Bucket::new("photos", "alice", false, AuthPolicy::default());
        metadata.create_bucket(&bucket).unwrap();
        Harness { metadata, blobs, client, engine, bucket }
    }

    fn healthy_node(h: &Harness, name: &str, capacity: u64) -> StorageNode {
        let node = StorageNode::new(name, &format!("http://{}:8081", name), "secret", capacity, 1, true);
        h.metadata.insert_node(&node).unwrap();
        h.metadata
            .record_health(&HealthUpdate { node_id: node.id.clone(), healthy: true, at: Utc::now() })
            .unwrap();
        node
    }

    fn upload(h: &Harness, size: usize) -> UploadRequest {
        UploadRequest {
            bucket: h.bucket.clone(),
            filename: "file.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            uploaded_by: "alice".to_string(),
            auth_policy: None,
            data: Bytes::from(vec![1u8; size]),
        }
    }

    fn used(h: &Harness, node: &StorageNode) -> u64 {
        h.metadata.find_node(&node.id).unwrap().unwrap().used_storage
    }

    #[tokio::test]
    async fn test_fits_locally_leaves_nodes_untouched() {
        let h = harness(100);
        let node = healthy_node(&h, "node-a", 1000);

        let object = h.engine.place(upload(&h, 100)).await.unwrap();
        assert!(!object.location.is_remote());
        assert_eq!(object.checksum, sha256_hex(&vec![1u8; 100]));
        assert_eq!(h.blobs.object_count(), 1);
        assert_eq!(h.client.write_count(), 0);
        assert_eq!(used(&h, &node), 0);
    }

    #[tokio::test]
    async fn test_overflow_goes_to_first_eligible_node() {
        let h = harness(50);
        let first = healthy_node(&h, "node-a", 1000);
        let second = healthy_node(&h, "node-b", 1000);

        let object = h.engine.place(upload(&h, 80)).await.unwrap();
        assert_eq!(object.location.node_id(), Some(first.id.as_str()));
        assert_eq!(object.location.to_string(), format!("node://{}/{}/{}", first.id, h.bucket.id, object.id));
        assert_eq!(used(&h, &first), 80);
        assert_eq!(used(&h, &second), 0);
        assert_eq!(h.client.stored_on(&first.url), 1);
        assert_eq!(h.metadata.find_object(&h.bucket.id, &object.id).unwrap().unwrap(), object);
    }

    #[tokio::test]
    async fn test_inactive_and_unhealthy_nodes_are_skipped() {
        let h = harness(0);
        let inactive = healthy_node(&h, "node-a", 1000);
        h.metadata.set_active(&inactive.id, false).unwrap();
        let unhealthy = StorageNode::new("node-b", "http://node-b:8081", "s", 1000, 1, true);
        h.metadata.insert_node(&unhealthy).unwrap();

        let err = h.engine.place(upload(&h, 10)).await.unwrap_err();
        assert!(matches!(err, StoreError::NoStorageAvailable));

        let good = healthy_node(&h, "node-c", 1000);
        let object = h.engine.place(upload(&h, 10)).await.unwrap();
        assert_eq!(object.location.node_id(), Some(good.id.as_str()));
    }

    #[tokio::test]
    async fn test_full_first_node_fails_without_trying_second() {
        let h = harness(0);
        let small = healthy_node(&h, "node-a", 10);
        let big = healthy_node(&h, "node-b", 1000);

        let err = h.engine.place(upload(&h, 20)).await.unwrap_err();
        assert!(matches!(err, StoreError::CapacityExhausted(_)));
        assert_eq!(h.client.write_count(), 0);
        assert_eq!(h.metadata.object_count(), 0);
        assert_eq!(used(&h, &small), 0);
        assert_eq!(used(&h, &big), 0);
    }

    #[tokio::test]
    async fn test_rejected_remote_write_leaves_no_state() {
        let h = harness(0);
        let node = healthy_node(&h, "node-a", 1000);
        h.client.set_reject(&node.url, Some(500));

        let err = h.engine.place(upload(&h, 20)).await.unwrap_err();
        assert!(matches!(err, StoreError::NodeRejected { status: 500 }));
        assert_eq!(h.metadata.object_count(), 0);
        assert_eq!(used(&h, &node), 0);

        h.client.set_reject(&node.url, None);
        h.client.set_unreachable(&node.url, true);
        let err = h.engine.place(upload(&h, 20)).await.unwrap_err();
        assert!(matches!(err, StoreError::NodeUnavailable(_)));
        assert_eq!(h.blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_record_insert_is_compensated() {
        let h = harness(1000);
        h.metadata.fail_object_inserts(true);
        assert!(h.engine.place(upload(&h, 10)).await.is_err());
        assert_eq!(h.blobs.object_count(), 0);

        let h = harness(0);
        let node = healthy_node(&h, "node-a", 1000);
        h.metadata.fail_object_inserts(true);
        assert!(h.engine.place(upload(&h, 10)).await.is_err());
        assert_eq!(used(&h, &node), 0);
        assert_eq!(h.client.stored_on(&node.url), 0);
        assert_eq!(h.client.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let h = harness(1000);
        let mut request = upload(&h, 1);
        request.filename = String::new();
        assert!(matches!(h.engine.place(request).await, Err(StoreError::BadRequest(_))));

        let mut request = upload(&h, 1);
        request.bucket.name = "../escape".to_string();
        assert!(matches!(h.engine.place(request).await, Err(StoreError::BadRequest(_))));
    }
}
