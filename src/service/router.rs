//! Routes reads and deletes to wherever an object was placed

use crate::error::{StoreError, StoreResult};
use crate::metadata::{Bucket, MetadataStorage, NodeRegistry, ObjectCatalog, ObjectLocation, StorageNode, StoredObject};
use crate::proxy::{ByteStream, NodeClient};
use crate::storage::BlobStore;
use bytes::Bytes;
use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;

/// Content of an object ready to be streamed to a client
pub struct ObjectContent {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

pub struct ObjectRouter {
    metadata: Arc<dyn MetadataStorage>,
    blobs: Arc<dyn BlobStore>,
    nodes: Arc<dyn NodeClient>,
}

impl ObjectRouter {
    pub fn new(metadata: Arc<dyn MetadataStorage>, blobs: Arc<dyn BlobStore>, nodes: Arc<dyn NodeClient>) -> Self {
        Self { metadata, blobs, nodes }
    }

    fn owning_node(&self, node_id: &str) -> StoreResult<StorageNode> {
        self.metadata
            .find_node(node_id)?
            .ok_or_else(|| StoreError::NodeUnavailable(format!("node {} is not registered", node_id)))
    }

    /// Open an object for reading. Remote objects are streamed from their node as-is.
    pub async fn open(&self, object: &StoredObject) -> StoreResult<ObjectContent> {
        match &object.location {
            ObjectLocation::Local { path } => {
                if !self.blobs.exists(path) {
                    return Err(StoreError::NotFound(format!("content of object {}", object.id)));
                }
                let data = Bytes::from(self.blobs.read(path)?);
                Ok(ObjectContent {
                    content_type: object.content_type.clone(),
                    content_length: Some(data.len() as u64),
                    body: futures::stream::once(async move { Ok(data) }).boxed(),
                })
            }
            ObjectLocation::Remote { node_id, bucket_id, object_id } => {
                let node = self.owning_node(node_id)?;
                debug!("Proxying read of {} from node {}", object_id, node.name);
                let remote = self.nodes.read_object(&node, bucket_id, object_id, &object.name).await?;
                Ok(ObjectContent {
                    // The catalog is authoritative for the content type
                    content_type: if object.content_type.is_empty() {
                        remote
                            .content_type
                            .unwrap_or_else(|| "application/octet-stream".to_string())
                    } else {
                        object.content_type.clone()
                    },
                    content_length: remote.content_length,
                    body: remote.body,
                })
            }
        }
    }

    /// Remove the bytes from their recorded location, then the record.
    /// Content that is already gone counts as removed. Node usage counters
    /// are left for reconciliation.
    pub async fn delete(&self, bucket: &Bucket, object: &StoredObject) -> StoreResult<()> {
        match &object.location {
            ObjectLocation::Local { path } => {
                if !self.blobs.delete(path)? {
                    warn!("Local content of {} was already missing", object.id);
                }
            }
            ObjectLocation::Remote { node_id, object_id, .. } => {
                let node = self.owning_node(node_id)?;
                self.nodes.delete_object(&node, &bucket.name, object_id).await?;
            }
        }
        self.metadata.delete_object(&object.bucket_id, &object.id)?;
        info!("Deleted object {} from bucket {}", object.id, bucket.name);
        Ok(())
    }
}
