//! reqwest implementation of NodeClient

use crate::error::{StoreError, StoreResult};
use crate::metadata::StorageNode;
use crate::proxy::{
    endpoint, NodeClient, ProbeResult, Registration, RegistrationResponse, RemoteObject, RemoteWrite,
    HEALTH_PATH, INTERNAL_DELETE_PATH, INTERNAL_FILE_PATH, INTERNAL_UPLOAD_PATH, PING_PATH,
    REGISTER_PATH,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};

pub struct HttpNodeClient {
    /// Short timeout for liveness probes
    probe: Client,
    /// Timeout for object transfers and registration calls
    proxy: Client,
}

impl HttpNodeClient {
    pub fn new(probe_timeout: Duration, proxy_timeout: Duration) -> StoreResult<Self> {
        let build = |timeout: Duration| {
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| StoreError::Internal(format!("failed to build http client: {}", e)))
        };
        Ok(Self { probe: build(probe_timeout)?, proxy: build(proxy_timeout)? })
    }
}

fn rejected(status: StatusCode) -> StoreError {
    StoreError::NodeRejected { status: status.as_u16() }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn write_object(&self, node: &StorageNode, write: &RemoteWrite) -> StoreResult<()> {
        let file = Part::bytes(write.data.to_vec())
            .file_name(write.filename.clone())
            .mime_str(&write.content_type)
            .map_err(|e| StoreError::BadRequest(format!("invalid content type: {}", e)))?;
        let form = Form::new()
            .text("bucket_id", write.bucket_id.clone())
            .text("bucket_name", write.bucket_name.clone())
            .text("file_id", write.object_id.clone())
            .text("filename", write.filename.clone())
            .text("content_type", write.content_type.clone())
            .part("file", file);

        let response = self
            .proxy
            .post(endpoint(&node.url, INTERNAL_UPLOAD_PATH))
            .bearer_auth(&node.secret)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!("Node {} rejected upload of {}: {}", node.name, write.object_id, response.status());
            return Err(rejected(response.status()));
        }
        debug!("Node {} stored {} ({} bytes)", node.name, write.object_id, write.data.len());
        Ok(())
    }

    async fn read_object(
        &self,
        node: &StorageNode,
        bucket_id: &str,
        object_id: &str,
        filename: &str,
    ) -> StoreResult<RemoteObject> {
        let response = self
            .proxy
            .get(endpoint(&node.url, INTERNAL_FILE_PATH))
            .bearer_auth(&node.secret)
            .query(&[("bucket_id", bucket_id), ("file_id", object_id), ("filename", filename)])
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StoreError::NotFound(format!("object {} on node {}", object_id, node.name)))
            }
            status => return Err(rejected(status)),
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(StoreError::from).boxed();
        Ok(RemoteObject { content_type, content_length, body })
    }

    async fn delete_object(&self, node: &StorageNode, bucket_name: &str, object_id: &str) -> StoreResult<()> {
        let response = self
            .proxy
            .delete(endpoint(&node.url, INTERNAL_DELETE_PATH))
            .bearer_auth(&node.secret)
            .query(&[("bucket_name", bucket_name), ("file_name", object_id)])
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!("Node {} no longer holds {}, treating as deleted", node.name, object_id);
                Ok(())
            }
            status => Err(rejected(status)),
        }
    }

    async fn probe_health(&self, url: &str) -> ProbeResult {
        let started = Instant::now();
        let outcome = self.probe.get(endpoint(url, HEALTH_PATH)).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(response) if response.status().is_success() => ProbeResult {
                healthy: true,
                latency_ms,
                status: Some(response.status().as_u16()),
                error: None,
            },
            Ok(response) => ProbeResult {
                healthy: false,
                latency_ms,
                status: Some(response.status().as_u16()),
                error: Some(format!("health endpoint answered {}", response.status())),
            },
            Err(e) => ProbeResult {
                healthy: false,
                latency_ms,
                status: None,
                error: Some(StoreError::from(e).to_string()),
            },
        }
    }

    async fn self_register(&self, master_url: &str, registration: &Registration) -> StoreResult<RegistrationResponse> {
        let response = self
            .proxy
            .post(endpoint(master_url, REGISTER_PATH))
            .json(registration)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response.status()));
        }
        Ok(response.json::<RegistrationResponse>().await?)
    }

    async fn ping_master(&self, master_url: &str, own_url: &str, secret: &str) -> StoreResult<()> {
        let response = self
            .probe
            .post(endpoint(master_url, PING_PATH))
            .bearer_auth(secret)
            .query(&[("url", own_url)])
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(StoreError::Unauthorized(
                "master rejected the node secret".to_string(),
            )),
            status => Err(rejected(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_unreachable_node_is_unhealthy() {
        let client = HttpNodeClient::new(Duration::from_millis(500), Duration::from_secs(1)).unwrap();
        // Port 9 on localhost is the discard service, normally closed
        let result = client.probe_health("http://127.0.0.1:9").await;
        assert!(!result.healthy);
        assert!(result.status.is_none());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_delete_is_an_error() {
        let client = HttpNodeClient::new(Duration::from_millis(500), Duration::from_secs(1)).unwrap();
        let node = StorageNode::new("n", "http://127.0.0.1:9", "s", 10, 0, true);
        let err = client.delete_object(&node, "b", "o").await.unwrap_err();
        assert!(matches!(err, StoreError::NodeUnavailable(_) | StoreError::Transport(_)));
    }
}
