//! Transport to storage nodes
//!
//! Every call is a single attempt with a bounded timeout. Failures are
//! reported to the caller as they happen, nothing here retries.

pub mod http_client;
pub mod mock_client;

use crate::error::{StoreError, StoreResult};
use crate::metadata::StorageNode;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Object body streamed back from a node
pub type ByteStream = BoxStream<'static, Result<Bytes, StoreError>>;

pub const INTERNAL_UPLOAD_PATH: &str = "/api/v1/internal/upload";
pub const INTERNAL_FILE_PATH: &str = "/api/v1/internal/file";
pub const INTERNAL_DELETE_PATH: &str = "/api/v1/internal/delete";
pub const HEALTH_PATH: &str = "/api/v1/health";
pub const REGISTER_PATH: &str = "/api/v1/node/register";
pub const PING_PATH: &str = "/api/v1/node/ping";

/// Everything a node needs to store one object
#[derive(Debug, Clone)]
pub struct RemoteWrite {
    pub bucket_id: String,
    pub bucket_name: String,
    pub object_id: String,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

pub struct RemoteObject {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub healthy: bool,
    pub latency_ms: u64,
    pub status: Option<u16>,
    pub error: Option<String>,
}

/// Body a node posts to the master when it registers itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub url: String,
    pub capacity: u64,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub node_id: String,
    pub secret: String,
}

/// Outbound calls from the master to nodes and from nodes to the master
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn write_object(&self, node: &StorageNode, write: &RemoteWrite) -> StoreResult<()>;

    async fn read_object(
        &self,
        node: &StorageNode,
        bucket_id: &str,
        object_id: &str,
        filename: &str,
    ) -> StoreResult<RemoteObject>;

    /// A node answering 404 counts as deleted
    async fn delete_object(&self, node: &StorageNode, bucket_name: &str, object_id: &str) -> StoreResult<()>;

    /// Liveness request against `{url}/api/v1/health`, never fails
    async fn probe_health(&self, url: &str) -> ProbeResult;

    async fn self_register(&self, master_url: &str, registration: &Registration) -> StoreResult<RegistrationResponse>;

    async fn ping_master(&self, master_url: &str, own_url: &str, secret: &str) -> StoreResult<()>;
}

pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(endpoint("http://n:1/", HEALTH_PATH), "http://n:1/api/v1/health");
        assert_eq!(endpoint("http://n:1", PING_PATH), "http://n:1/api/v1/node/ping");
    }

    #[test]
    fn test_registration_priority_defaults() {
        let reg: Registration =
            serde_json::from_str(r#"{"name":"n","url":"http://n:1","capacity":5}"#).unwrap();
        assert_eq!(reg.priority, 0);
    }
}
