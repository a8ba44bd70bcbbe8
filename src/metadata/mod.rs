//! Metadata Storage Layer Abstraction
//!
//! This module holds the records the master keeps about buckets, objects,
//! storage nodes and capability tokens, plus the small object index a
//! storage node keeps about what it holds. Backends (SQLite, in-memory mock)
//! implement the traits below so services never see the database.

pub mod sqlite_store;
pub mod mock_store;


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};

/// Prefix of location descriptors pointing at a storage node
pub const NODE_LOCATION_SCHEME: &str = "node://";

/// Access policy attached to a bucket, optionally overridden per object.
///
/// Stored as JSON and parsed wherever it is read, so an unknown or malformed
/// policy fails at the boundary instead of deep inside a handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthPolicy {
    /// Requests carrying one of these keys in `X-API-Key` may read
    ApiKey { allowed_keys: Vec<String> },
    /// Signed URLs are the intended access path; issuance is capped
    SignedUrl { max_ttl_secs: i64, allow_single_use: bool },
    /// Session-authenticated access, enforced outside this crate
    Session { max_age_secs: i64 },
}

impl Default for AuthPolicy {
    fn default() -> Self {
        AuthPolicy::Session { max_age_secs: 86400 }
    }
}

impl AuthPolicy {
    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> StoreResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| StoreError::Internal(format!("invalid auth policy {:?}: {}", raw, e)))
    }

    pub fn allows_api_key(&self, key: &str) -> bool {
        match self {
            AuthPolicy::ApiKey { allowed_keys } => allowed_keys.iter().any(|k| k == key),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    /// Objects may be read without any credential
    pub public_read: bool,
    pub auth_policy: AuthPolicy,
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    pub fn new(name: &str, owner_id: &str, public_read: bool, auth_policy: AuthPolicy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            public_read,
            auth_policy,
            created_at: Utc::now(),
        }
    }
}

/// Where the bytes of an object physically live. Set once at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectLocation {
    Local { path: PathBuf },
    Remote { node_id: String, bucket_id: String, object_id: String },
}

impl ObjectLocation {
    /// Parse a stored descriptor: either a filesystem path or
    /// `node://{node_id}/{bucket_id}/{object_id}`
    pub fn parse(descriptor: &str) -> StoreResult<Self> {
        match descriptor.strip_prefix(NODE_LOCATION_SCHEME) {
            Some(rest) => {
                let parts: Vec<&str> = rest.split('/').collect();
                if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
                    return Err(StoreError::Internal(format!(
                        "invalid node location descriptor: {}",
                        descriptor
                    )));
                }
                Ok(ObjectLocation::Remote {
                    node_id: parts[0].to_string(),
                    bucket_id: parts[1].to_string(),
                    object_id: parts[2].to_string(),
                })
            }
            None if descriptor.is_empty() => {
                Err(StoreError::Internal("empty location descriptor".to_string()))
            }
            None => Ok(ObjectLocation::Local { path: PathBuf::from(descriptor) }),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ObjectLocation::Remote { .. })
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            ObjectLocation::Remote { node_id, .. } => Some(node_id),
            ObjectLocation::Local { .. } => None,
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectLocation::Local { path } => write!(f, "{}", path.display()),
            ObjectLocation::Remote { node_id, bucket_id, object_id } => {
                write!(f, "{}{}/{}/{}", NODE_LOCATION_SCHEME, node_id, bucket_id, object_id)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredObject {
    pub id: String,
    pub bucket_id: String,
    /// Original file name, unique lookups by name take the oldest match
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Hex encoded SHA-256 of the content
    pub checksum: String,
    pub location: ObjectLocation,
    /// Overrides the bucket policy when set
    pub auth_policy: Option<AuthPolicy>,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn effective_policy<'a>(&'a self, bucket: &'a Bucket) -> &'a AuthPolicy {
        self.auth_policy.as_ref().unwrap_or(&bucket.auth_policy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageNode {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Shared secret for master/node traffic, never leaves the master
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub capacity: u64,
    pub used_storage: u64,
    pub priority: i32,
    pub active: bool,
    pub healthy: bool,
    pub last_contact: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageNode {
    /// New registrations start unhealthy until the first successful contact
    pub fn new(name: &str, url: &str, secret: &str, capacity: u64, priority: i32, active: bool) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            capacity,
            used_storage: 0,
            priority,
            active,
            healthy: false,
            last_contact: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.active && self.healthy
    }
}

/// The only method a capability token grants
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMethod {
    Get,
}

impl AccessMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethod::Get => "GET",
        }
    }

    pub fn parse(raw: &str) -> StoreResult<Self> {
        match raw {
            "GET" => Ok(AccessMethod::Get),
            other => Err(StoreError::Internal(format!("unknown access method: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityToken {
    /// Primary key, hex encoded HMAC of `bucket_id:object_id`
    pub signature: String,
    pub bucket_name: String,
    pub object_name: String,
    pub method: AccessMethod,
    pub expires_at: DateTime<Utc>,
    pub single_use: bool,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CapabilityToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_consumed(&self) -> bool {
        self.single_use && self.used
    }
}

/// Outcome of inserting a token, a duplicate signature is not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Result of one probe, persisted as part of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct HealthUpdate {
    pub node_id: String,
    pub healthy: bool,
    pub at: DateTime<Utc>,
}

/// Row of the object index kept by a storage node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeObject {
    pub object_id: String,
    pub bucket_id: String,
    pub bucket_name: String,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Buckets and object records
pub trait ObjectCatalog: Send + Sync {
    fn create_bucket(&self, bucket: &Bucket) -> StoreResult<()>;

    fn find_bucket(&self, bucket_id: &str) -> StoreResult<Option<Bucket>>;

    fn find_bucket_by_name(&self, name: &str) -> StoreResult<Option<Bucket>>;

    fn insert_object(&self, object: &StoredObject) -> StoreResult<()>;

    fn find_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<Option<StoredObject>>;

    /// Oldest object with this name in the bucket
    fn find_object_by_name(&self, bucket_id: &str, name: &str) -> StoreResult<Option<StoredObject>>;

    /// Returns false when no such object existed
    fn delete_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<bool>;

    fn rename_object(&self, bucket_id: &str, object_id: &str, new_name: &str) -> StoreResult<()>;

    fn list_objects(&self, bucket_id: &str) -> StoreResult<Vec<StoredObject>>;

    /// Sum of sizes of objects stored on the master's disk
    fn local_usage(&self) -> StoreResult<u64>;

    /// Sum of sizes of objects placed on one node
    fn node_usage(&self, node_id: &str) -> StoreResult<u64>;
}

/// Durable record of storage nodes
pub trait NodeRegistry: Send + Sync {
    /// Fails with `Conflict` when the URL is already registered
    fn insert_node(&self, node: &StorageNode) -> StoreResult<()>;

    fn find_node(&self, node_id: &str) -> StoreResult<Option<StorageNode>>;

    fn find_node_by_url(&self, url: &str) -> StoreResult<Option<StorageNode>>;

    /// All nodes in registration order
    fn list_nodes(&self) -> StoreResult<Vec<StorageNode>>;

    /// First active and healthy node in registration order
    fn first_eligible_node(&self) -> StoreResult<Option<StorageNode>>;

    /// Add `delta` to the used-storage counter in one atomic step, clamped at zero
    fn adjust_used_storage(&self, node_id: &str, delta: i64) -> StoreResult<()>;

    fn set_used_storage(&self, node_id: &str, used: u64) -> StoreResult<()>;

    fn record_health(&self, update: &HealthUpdate) -> StoreResult<()>;

    /// Persist a whole sweep in one write
    fn record_health_batch(&self, updates: &[HealthUpdate]) -> StoreResult<()>;

    fn set_active(&self, node_id: &str, active: bool) -> StoreResult<()>;
}

/// Capability token rows keyed by signature
pub trait TokenStore: Send + Sync {
    fn find_token(&self, signature: &str) -> StoreResult<Option<CapabilityToken>>;

    fn insert_token(&self, token: &CapabilityToken) -> StoreResult<InsertOutcome>;

    fn delete_token(&self, signature: &str) -> StoreResult<()>;

    fn mark_token_used(&self, signature: &str, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Object index on a storage node
pub trait NodeObjectIndex: Send + Sync {
    fn put_node_object(&self, object: &NodeObject) -> StoreResult<()>;

    fn find_node_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<Option<NodeObject>>;

    /// Returns the removed row, if any
    fn remove_node_object(&self, bucket_name: &str, object_id: &str) -> StoreResult<Option<NodeObject>>;
}

/// Everything a metadata backend provides
pub trait MetadataStorage: ObjectCatalog + NodeRegistry + TokenStore + NodeObjectIndex {}

impl<T> MetadataStorage for T where T: ObjectCatalog + NodeRegistry + TokenStore + NodeObjectIndex {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_descriptor_parse() {
        let remote = ObjectLocation::parse("node://n1/b1/o1").unwrap();
        assert_eq!(
            remote,
            ObjectLocation::Remote {
                node_id: "n1".to_string(),
                bucket_id: "b1".to_string(),
                object_id: "o1".to_string(),
            }
        );
        assert_eq!(remote.to_string(), "node://n1/b1/o1");
        assert_eq!(remote.node_id(), Some("n1"));

        let local = ObjectLocation::parse("/data/storage/photos/abc").unwrap();
        assert!(!local.is_remote());
        assert_eq!(local.to_string(), "/data/storage/photos/abc");
    }

    #[test]
    fn test_location_descriptor_rejects_malformed() {
        assert!(ObjectLocation::parse("node://n1/b1").is_err());
        assert!(ObjectLocation::parse("node://n1//o1").is_err());
        assert!(ObjectLocation::parse("node://n1/b1/o1/extra").is_err());
        assert!(ObjectLocation::parse("").is_err());
    }

    #[test]
    fn test_auth_policy_json() {
        let policy = AuthPolicy::ApiKey { allowed_keys: vec!["k1".to_string()] };
        let raw = policy.to_json().unwrap();
        assert!(raw.contains("\"type\":\"api_key\""));
        assert_eq!(AuthPolicy::from_json(&raw).unwrap(), policy);
        assert!(policy.allows_api_key("k1"));
        assert!(!policy.allows_api_key("k2"));

        assert!(AuthPolicy::from_json(r#"{"type":"jwt"}"#).is_err());
        assert!(!AuthPolicy::default().allows_api_key("k1"));
    }

    #[test]
    fn test_node_secret_not_serialized() {
        let node = StorageNode::new("node-1", "http://node-1:8081/", "topsecret", 100, 1, true);
        assert_eq!(node.url, "http://node-1:8081");
        assert!(!node.healthy);
        let json = serde_json::to_string(&node).unwrap();
        assert!(!json.contains("topsecret"));
    }

    #[test]
    fn test_token_state() {
        let now = Utc::now();
        let mut token = CapabilityToken {
            signature: "sig".to_string(),
            bucket_name: "b".to_string(),
            object_name: "o".to_string(),
            method: AccessMethod::Get,
            expires_at: now,
            single_use: true,
            used: false,
            used_at: None,
            created_at: now,
        };
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + chrono::Duration::seconds(1)));
        assert!(!token.is_consumed());
        token.used = true;
        assert!(token.is_consumed());
        token.single_use = false;
        assert!(!token.is_consumed());
    }
}
