//! Mock implementation of NodeClient for testing

use crate::error::{StoreError, StoreResult};
use crate::metadata::StorageNode;
use crate::proxy::{NodeClient, ProbeResult, Registration, RegistrationResponse, RemoteObject, RemoteWrite};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct MockObject {
    node_url: String,
    bucket_id: String,
    bucket_name: String,
    object_id: String,
    content_type: String,
    data: Bytes,
}

#[derive(Default)]
struct MockState {
    unreachable: HashSet<String>,
    reject: HashMap<String, u16>,
    objects: Vec<MockObject>,
    writes: usize,
    reads: usize,
    deletes: usize,
    probes: usize,
    registrations: Vec<Registration>,
    pings: Vec<(String, String)>,
    issued_secret: Option<String>,
}

/// In-memory node fleet. Nodes are addressed by URL; unknown URLs are reachable.
#[derive(Default)]
pub struct MockNodeClient {
    state: Mutex<MockState>,
}

impl MockNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Internal("mock node client lock poisoned".to_string()))
    }

    /// Every call to this URL fails as if the connection was refused
    pub fn set_unreachable(&self, url: &str, unreachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            if unreachable {
                state.unreachable.insert(url.to_string());
            } else {
                state.unreachable.remove(url);
            }
        }
    }

    /// Every call to this URL is answered with `status`
    pub fn set_reject(&self, url: &str, status: Option<u16>) {
        if let Ok(mut state) = self.state.lock() {
            match status {
                Some(code) => state.reject.insert(url.to_string(), code),
                None => state.reject.remove(url),
            };
        }
    }

    /// Secret returned by `self_register`
    pub fn set_issued_secret(&self, secret: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.issued_secret = Some(secret.to_string());
        }
    }

    /// Drop an object behind the master's back
    pub fn forget_object(&self, node_url: &str, object_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.objects.retain(|o| !(o.node_url == node_url && o.object_id == object_id));
        }
    }

    pub fn stored_on(&self, node_url: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.objects.iter().filter(|o| o.node_url == node_url).count())
            .unwrap_or(0)
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().map(|s| s.writes).unwrap_or(0)
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().map(|s| s.reads).unwrap_or(0)
    }

    pub fn delete_count(&self) -> usize {
        self.state.lock().map(|s| s.deletes).unwrap_or(0)
    }

    pub fn probe_count(&self) -> usize {
        self.state.lock().map(|s| s.probes).unwrap_or(0)
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.state.lock().map(|s| s.registrations.clone()).unwrap_or_default()
    }

    /// (own_url, secret) of each ping sent to the master
    pub fn pings(&self) -> Vec<(String, String)> {
        self.state.lock().map(|s| s.pings.clone()).unwrap_or_default()
    }

    fn check(state: &MockState, url: &str) -> StoreResult<()> {
        if state.unreachable.contains(url) {
            return Err(StoreError::NodeUnavailable(format!("connection refused: {}", url)));
        }
        if let Some(status) = state.reject.get(url) {
            return Err(StoreError::NodeRejected { status: *status });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for MockNodeClient {
    async fn write_object(&self, node: &StorageNode, write: &RemoteWrite) -> StoreResult<()> {
        let mut state = self.state()?;
        state.writes += 1;
        Self::check(&state, &node.url)?;
        state.objects.push(MockObject {
            node_url: node.url.clone(),
            bucket_id: write.bucket_id.clone(),
            bucket_name: write.bucket_name.clone(),
            object_id: write.object_id.clone(),
            content_type: write.content_type.clone(),
            data: write.data.clone(),
        });
        Ok(())
    }

    async fn read_object(
        &self,
        node: &StorageNode,
        bucket_id: &str,
        object_id: &str,
        _filename: &str,
    ) -> StoreResult<RemoteObject> {
        let mut state = self.state()?;
        state.reads += 1;
        Self::check(&state, &node.url)?;
        let object = state
            .objects
            .iter()
            .find(|o| o.node_url == node.url && o.bucket_id == bucket_id && o.object_id == object_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("object {} on node {}", object_id, node.name)))?;
        let length = object.data.len() as u64;
        Ok(RemoteObject {
            content_type: Some(object.content_type),
            content_length: Some(length),
            body: futures::stream::once(async move { Ok(object.data) }).boxed(),
        })
    }

    async fn delete_object(&self, node: &StorageNode, bucket_name: &str, object_id: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        state.deletes += 1;
        Self::check(&state, &node.url)?;
        state.objects.retain(|o| {
            !(o.node_url == node.url && o.bucket_name == bucket_name && o.object_id == object_id)
        });
        Ok(())
    }

    async fn probe_health(&self, url: &str) -> ProbeResult {
        let mut state = match self.state() {
            Ok(state) => state,
            Err(e) => {
                return ProbeResult { healthy: false, latency_ms: 0, status: None, error: Some(e.to_string()) }
            }
        };
        state.probes += 1;
        if state.unreachable.contains(url) {
            return ProbeResult {
                healthy: false,
                latency_ms: 0,
                status: None,
                error: Some("connection refused".to_string()),
            };
        }
        match state.reject.get(url) {
            Some(status) => ProbeResult {
                healthy: false,
                latency_ms: 1,
                status: Some(*status),
                error: Some(format!("health endpoint answered {}", status)),
            },
            None => ProbeResult { healthy: true, latency_ms: 1, status: Some(200), error: None },
        }
    }

    async fn self_register(&self, master_url: &str, registration: &Registration) -> StoreResult<RegistrationResponse> {
        let mut state = self.state()?;
        Self::check(&state, master_url)?;
        state.registrations.push(registration.clone());
        Ok(RegistrationResponse {
            node_id: format!("node-{}", state.registrations.len()),
            secret: state.issued_secret.clone().unwrap_or_else(|| "mock-secret".to_string()),
        })
    }

    async fn ping_master(&self, master_url: &str, own_url: &str, secret: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        Self::check(&state, master_url)?;
        state.pings.push((own_url.to_string(), secret.to_string()));
        Ok(())
    }
}
