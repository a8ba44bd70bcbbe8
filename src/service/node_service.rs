//! Node registry management on the master, and object handling on a node

use crate::error::{StoreError, StoreResult};
use crate::metadata::{MetadataStorage, NodeObject, NodeObjectIndex, NodeRegistry, StorageNode};
use crate::proxy::{Registration, RegistrationResponse};
use crate::storage::{validate_component, BlobStore};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Secret a node shares with its master, filled in once registration succeeds
pub type SharedSecret = Arc<RwLock<Option<String>>>;

/// Administrator registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRegistration {
    pub name: String,
    pub url: String,
    /// Generated when absent
    #[serde(default)]
    pub secret: Option<String>,
    pub capacity: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// A freshly registered node together with its secret, shown once
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredNode {
    pub node: StorageNode,
    pub secret: String,
}

pub fn generate_secret() -> String {
    format!("nodekey_{}", uuid::Uuid::new_v4().simple())
}

fn validate_registration(name: &str, url: &str, priority: i32) -> StoreResult<()> {
    if name.len() < 3 || name.len() > 100 {
        return Err(StoreError::BadRequest("node name must be 3 to 100 characters".to_string()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(StoreError::BadRequest(format!("invalid node url: {}", url)));
    }
    if !(0..=100).contains(&priority) {
        return Err(StoreError::BadRequest("priority must be between 0 and 100".to_string()));
    }
    Ok(())
}

pub struct NodeService {
    metadata: Arc<dyn MetadataStorage>,
}

impl NodeService {
    pub fn new(metadata: Arc<dyn MetadataStorage>) -> Self {
        Self { metadata }
    }

    pub fn register(&self, request: NodeRegistration) -> StoreResult<RegisteredNode> {
        validate_registration(&request.name, &request.url, request.priority)?;
        let secret = match request.secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => generate_secret(),
        };
        let node = StorageNode::new(
            &request.name,
            &request.url,
            &secret,
            request.capacity,
            request.priority,
            request.active,
        );
        self.metadata.insert_node(&node)?;
        info!("Registered node {} at {}", node.name, node.url);
        Ok(RegisteredNode { node, secret })
    }

    /// Unauthenticated registration by the node itself, always active
    pub fn self_register(&self, registration: &Registration) -> StoreResult<RegistrationResponse> {
        let registered = self.register(NodeRegistration {
            name: registration.name.clone(),
            url: registration.url.clone(),
            secret: None,
            capacity: registration.capacity,
            priority: registration.priority,
            active: true,
        })?;
        Ok(RegistrationResponse { node_id: registered.node.id, secret: registered.secret })
    }

    pub fn list(&self, only_active: bool) -> StoreResult<Vec<StorageNode>> {
        let nodes = self.metadata.list_nodes()?;
        Ok(if only_active { nodes.into_iter().filter(|n| n.active).collect() } else { nodes })
    }

    pub fn get(&self, node_id: &str) -> StoreResult<StorageNode> {
        self.metadata
            .find_node(node_id)?
            .ok_or_else(|| StoreError::NotFound(format!("node {}", node_id)))
    }

    pub fn set_active(&self, node_id: &str, active: bool) -> StoreResult<StorageNode> {
        self.metadata.set_active(node_id, active)?;
        info!("Node {} marked {}", node_id, if active { "active" } else { "inactive" });
        self.get(node_id)
    }
}

/// Object handling on a storage node
pub struct NodeObjectService {
    index: Arc<dyn MetadataStorage>,
    blobs: Arc<dyn BlobStore>,
}

/// Identifying fields sent along with an object by the master
#[derive(Debug, Clone, Default)]
pub struct IncomingObject {
    pub bucket_id: String,
    pub bucket_name: String,
    pub object_id: String,
    pub filename: String,
}

impl NodeObjectService {
    pub fn new(index: Arc<dyn MetadataStorage>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { index, blobs }
    }

    pub fn store(&self, incoming: &IncomingObject, data: &[u8]) -> StoreResult<NodeObject> {
        for (kind, value) in [
            ("bucket_id", &incoming.bucket_id),
            ("bucket_name", &incoming.bucket_name),
            ("file_id", &incoming.object_id),
        ] {
            validate_component(kind, value)?;
        }
        let blob = self.blobs.write(&incoming.bucket_name, &incoming.object_id, data)?;
        let row = NodeObject {
            object_id: incoming.object_id.clone(),
            bucket_id: incoming.bucket_id.clone(),
            bucket_name: incoming.bucket_name.clone(),
            filename: incoming.filename.clone(),
            path: blob.path,
            size: blob.size,
            created_at: Utc::now(),
        };
        if let Err(e) = self.index.put_node_object(&row) {
            let _ = self.blobs.delete(&row.path);
            return Err(e);
        }
        info!("Stored object {} of bucket {} ({} bytes)", row.object_id, row.bucket_name, row.size);
        Ok(row)
    }

    pub fn read(&self, bucket_id: &str, object_id: &str) -> StoreResult<(NodeObject, Vec<u8>)> {
        let row = self
            .index
            .find_node_object(bucket_id, object_id)?
            .ok_or_else(|| StoreError::NotFound(format!("object {}", object_id)))?;
        if !self.blobs.exists(&row.path) {
            warn!("Index entry for {} points at missing file {}", object_id, row.path.display());
            return Err(StoreError::NotFound(format!("object {}", object_id)));
        }
        let data = self.blobs.read(&row.path)?;
        Ok((row, data))
    }

    /// Returns false when the node held no such object
    pub fn delete(&self, bucket_name: &str, object_id: &str) -> StoreResult<bool> {
        match self.index.remove_node_object(bucket_name, object_id)? {
            Some(row) => {
                self.blobs.delete(&row.path)?;
                info!("Deleted object {} of bucket {}", object_id, bucket_name);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::mock_store::MockMetadataStore;
    use crate::storage::mock_store::MockBlobStore;

    fn registration(name: &str, url: &str) -> NodeRegistration {
        NodeRegistration {
            name: name.to_string(),
            url: url.to_string(),
            secret: None,
            capacity: 1000,
            priority: 1,
            active: true,
        }
    }

    #[test]
    fn test_register_generates_secret() {
        let service = NodeService::new(Arc::new(MockMetadataStore::new()));
        let registered = service.register(registration("node-a", "http://a:8081")).unwrap();
        assert!(registered.secret.starts_with("nodekey_"));
        assert_eq!(registered.node.secret, registered.secret);
        assert!(!registered.node.healthy);

        let mut explicit = registration("node-b", "http://b:8081");
        explicit.secret = Some("given".to_string());
        assert_eq!(service.register(explicit).unwrap().secret, "given");

        assert!(matches!(
            service.register(registration("node-c", "http://a:8081")),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_register_validation() {
        let service = NodeService::new(Arc::new(MockMetadataStore::new()));
        assert!(service.register(registration("ab", "http://a:1")).is_err());
        assert!(service.register(registration("node", "ftp://a:1")).is_err());
        let mut bad = registration("node", "http://a:1");
        bad.priority = 101;
        assert!(service.register(bad).is_err());
    }

    #[test]
    fn test_self_register_and_set_active() {
        let service = NodeService::new(Arc::new(MockMetadataStore::new()));
        let response = service
            .self_register(&Registration {
                name: "node-a".to_string(),
                url: "http://a:8081".to_string(),
                capacity: 10,
                priority: 0,
            })
            .unwrap();
        let node = service.get(&response.node_id).unwrap();
        assert!(node.active);
        assert_eq!(node.secret, response.secret);

        let node = service.set_active(&response.node_id, false).unwrap();
        assert!(!node.active);
        assert!(service.list(true).unwrap().is_empty());
        assert_eq!(service.list(false).unwrap().len(), 1);
        assert!(matches!(service.get("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_node_object_lifecycle() {
        let blobs = Arc::new(MockBlobStore::new());
        let service = NodeObjectService::new(Arc::new(MockMetadataStore::new()), blobs.clone());
        let incoming = IncomingObject {
            bucket_id: "b1".to_string(),
            bucket_name: "photos".to_string(),
            object_id: "o1".to_string(),
            filename: "cat.jpg".to_string(),
        };

        let row = service.store(&incoming, b"meow").unwrap();
        assert_eq!(row.size, 4);
        let (found, data) = service.read("b1", "o1").unwrap();
        assert_eq!(found.filename, "cat.jpg");
        assert_eq!(data, b"meow");

        assert!(service.delete("photos", "o1").unwrap());
        assert!(!service.delete("photos", "o1").unwrap());
        assert_eq!(blobs.object_count(), 0);
        assert!(matches!(service.read("b1", "o1"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_node_object_rejects_path_components() {
        let service =
            NodeObjectService::new(Arc::new(MockMetadataStore::new()), Arc::new(MockBlobStore::new()));
        let incoming = IncomingObject {
            bucket_id: "b1".to_string(),
            bucket_name: "photos".to_string(),
            object_id: "../o1".to_string(),
            filename: "x".to_string(),
        };
        assert!(matches!(service.store(&incoming, b"x"), Err(StoreError::BadRequest(_))));
    }
}
