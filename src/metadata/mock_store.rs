//! Mock implementation of the metadata traits for testing

use crate::error::{StoreError, StoreResult};
use crate::metadata::{
    Bucket, CapabilityToken, HealthUpdate, InsertOutcome, NodeObject, NodeObjectIndex, NodeRegistry,
    ObjectCatalog, StorageNode, StoredObject, TokenStore,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MockData {
    buckets: Vec<Bucket>,
    objects: Vec<StoredObject>,
    /// Registration order is the vector order
    nodes: Vec<StorageNode>,
    tokens: HashMap<String, CapabilityToken>,
    node_objects: Vec<NodeObject>,
    /// Number of batch health writes, lets tests check a sweep writes once
    health_batches: usize,
    fail_object_inserts: bool,
    /// Expiry of a row a competing writer lands just before the next token insert
    preempt_token_insert: Option<DateTime<Utc>>,
}

/// Mock implementation of the metadata traits for testing
#[derive(Default)]
pub struct MockMetadataStore {
    data: Mutex<MockData>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> StoreResult<MutexGuard<'_, MockData>> {
        self.data
            .lock()
            .map_err(|_| StoreError::Internal("mock metadata lock poisoned".to_string()))
    }

    /// Clear all data from the store
    pub fn clear(&self) {
        if let Ok(mut data) = self.data.lock() {
            *data = MockData::default();
        }
    }

    pub fn object_count(&self) -> usize {
        self.data.lock().map(|d| d.objects.len()).unwrap_or(0)
    }

    pub fn token_count(&self) -> usize {
        self.data.lock().map(|d| d.tokens.len()).unwrap_or(0)
    }

    pub fn health_batches(&self) -> usize {
        self.data.lock().map(|d| d.health_batches).unwrap_or(0)
    }

    /// Make every following `insert_object` fail, to exercise compensation paths
    pub fn fail_object_inserts(&self, fail: bool) {
        if let Ok(mut data) = self.data.lock() {
            data.fail_object_inserts = fail;
        }
    }

    /// Simulate a concurrent issue: the next `insert_token` finds a row with
    /// this expiry already stored under its signature
    pub fn preempt_next_token_insert(&self, expires_at: DateTime<Utc>) {
        if let Ok(mut data) = self.data.lock() {
            data.preempt_token_insert = Some(expires_at);
        }
    }

    fn node_mut<'a>(data: &'a mut MockData, node_id: &str) -> StoreResult<&'a mut StorageNode> {
        data.nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| StoreError::NotFound(format!("node {}", node_id)))
    }
}

impl ObjectCatalog for MockMetadataStore {
    fn create_bucket(&self, bucket: &Bucket) -> StoreResult<()> {
        let mut data = self.data()?;
        if data.buckets.iter().any(|b| b.name == bucket.name || b.id == bucket.id) {
            return Err(StoreError::Conflict(format!("bucket {} already exists", bucket.name)));
        }
        data.buckets.push(bucket.clone());
        Ok(())
    }

    fn find_bucket(&self, bucket_id: &str) -> StoreResult<Option<Bucket>> {
        Ok(self.data()?.buckets.iter().find(|b| b.id == bucket_id).cloned())
    }

    fn find_bucket_by_name(&self, name: &str) -> StoreResult<Option<Bucket>> {
        Ok(self.data()?.buckets.iter().find(|b| b.name == name).cloned())
    }

    fn insert_object(&self, object: &StoredObject) -> StoreResult<()> {
        let mut data = self.data()?;
        if data.fail_object_inserts {
            return Err(StoreError::Internal("object insert disabled".to_string()));
        }
        if data
            .objects
            .iter()
            .any(|o| o.bucket_id == object.bucket_id && o.id == object.id)
        {
            return Err(StoreError::Conflict(format!("object {} already exists", object.id)));
        }
        data.objects.push(object.clone());
        Ok(())
    }

    fn find_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<Option<StoredObject>> {
        Ok(self
            .data()?
            .objects
            .iter()
            .find(|o| o.bucket_id == bucket_id && o.id == object_id)
            .cloned())
    }

    fn find_object_by_name(&self, bucket_id: &str, name: &str) -> StoreResult<Option<StoredObject>> {
        Ok(self
            .data()?
            .objects
            .iter()
            .filter(|o| o.bucket_id == bucket_id && o.name == name)
            .min_by_key(|o| o.created_at)
            .cloned())
    }

    fn delete_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<bool> {
        let mut data = self.data()?;
        let before = data.objects.len();
        data.objects.retain(|o| !(o.bucket_id == bucket_id && o.id == object_id));
        Ok(data.objects.len() != before)
    }

    fn rename_object(&self, bucket_id: &str, object_id: &str, new_name: &str) -> StoreResult<()> {
        let mut data = self.data()?;
        let object = data
            .objects
            .iter_mut()
            .find(|o| o.bucket_id == bucket_id && o.id == object_id)
            .ok_or_else(|| StoreError::NotFound(format!("object {}", object_id)))?;
        object.name = new_name.to_string();
        Ok(())
    }

    fn list_objects(&self, bucket_id: &str) -> StoreResult<Vec<StoredObject>> {
        Ok(self
            .data()?
            .objects
            .iter()
            .filter(|o| o.bucket_id == bucket_id)
            .cloned()
            .collect())
    }

    fn local_usage(&self) -> StoreResult<u64> {
        Ok(self
            .data()?
            .objects
            .iter()
            .filter(|o| !o.location.is_remote())
            .map(|o| o.size)
            .sum())
    }

    fn node_usage(&self, node_id: &str) -> StoreResult<u64> {
        Ok(self
            .data()?
            .objects
            .iter()
            .filter(|o| o.location.node_id() == Some(node_id))
            .map(|o| o.size)
            .sum())
    }
}

impl NodeRegistry for MockMetadataStore {
    fn insert_node(&self, node: &StorageNode) -> StoreResult<()> {
        let mut data = self.data()?;
        if data.nodes.iter().any(|n| n.url == node.url || n.id == node.id) {
            return Err(StoreError::Conflict(format!(
                "node with url {} already registered",
                node.url
            )));
        }
        data.nodes.push(node.clone());
        Ok(())
    }

    fn find_node(&self, node_id: &str) -> StoreResult<Option<StorageNode>> {
        Ok(self.data()?.nodes.iter().find(|n| n.id == node_id).cloned())
    }

    fn find_node_by_url(&self, url: &str) -> StoreResult<Option<StorageNode>> {
        let url = url.trim_end_matches('/');
        Ok(self.data()?.nodes.iter().find(|n| n.url == url).cloned())
    }

    fn list_nodes(&self) -> StoreResult<Vec<StorageNode>> {
        Ok(self.data()?.nodes.clone())
    }

    fn first_eligible_node(&self) -> StoreResult<Option<StorageNode>> {
        Ok(self.data()?.nodes.iter().find(|n| n.is_eligible()).cloned())
    }

    fn adjust_used_storage(&self, node_id: &str, delta: i64) -> StoreResult<()> {
        let mut data = self.data()?;
        let node = Self::node_mut(&mut data, node_id)?;
        node.used_storage = (node.used_storage as i64).saturating_add(delta).max(0) as u64;
        node.updated_at = Utc::now();
        Ok(())
    }

    fn set_used_storage(&self, node_id: &str, used: u64) -> StoreResult<()> {
        let mut data = self.data()?;
        let node = Self::node_mut(&mut data, node_id)?;
        node.used_storage = used;
        node.updated_at = Utc::now();
        Ok(())
    }

    fn record_health(&self, update: &HealthUpdate) -> StoreResult<()> {
        let mut data = self.data()?;
        let node = Self::node_mut(&mut data, &update.node_id)?;
        node.healthy = update.healthy;
        node.last_contact = Some(update.at);
        node.updated_at = update.at;
        Ok(())
    }

    fn record_health_batch(&self, updates: &[HealthUpdate]) -> StoreResult<()> {
        let mut data = self.data()?;
        for update in updates {
            if let Some(node) = data.nodes.iter_mut().find(|n| n.id == update.node_id) {
                node.healthy = update.healthy;
                node.last_contact = Some(update.at);
                node.updated_at = update.at;
            }
        }
        data.health_batches += 1;
        Ok(())
    }

    fn set_active(&self, node_id: &str, active: bool) -> StoreResult<()> {
        let mut data = self.data()?;
        let node = Self::node_mut(&mut data, node_id)?;
        node.active = active;
        node.updated_at = Utc::now();
        Ok(())
    }
}

impl TokenStore for MockMetadataStore {
    fn find_token(&self, signature: &str) -> StoreResult<Option<CapabilityToken>> {
        Ok(self.data()?.tokens.get(signature).cloned())
    }

    fn insert_token(&self, token: &CapabilityToken) -> StoreResult<InsertOutcome> {
        let mut data = self.data()?;
        if let Some(expires_at) = data.preempt_token_insert.take() {
            let mut winner = token.clone();
            winner.expires_at = expires_at;
            data.tokens.insert(winner.signature.clone(), winner);
        }
        if data.tokens.contains_key(&token.signature) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        data.tokens.insert(token.signature.clone(), token.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn delete_token(&self, signature: &str) -> StoreResult<()> {
        self.data()?.tokens.remove(signature);
        Ok(())
    }

    fn mark_token_used(&self, signature: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut data = self.data()?;
        let token = data.tokens.get_mut(signature).ok_or(StoreError::TokenNotFound)?;
        token.used = true;
        token.used_at = Some(at);
        Ok(())
    }
}

impl NodeObjectIndex for MockMetadataStore {
    fn put_node_object(&self, object: &NodeObject) -> StoreResult<()> {
        let mut data = self.data()?;
        data.node_objects
            .retain(|o| !(o.bucket_id == object.bucket_id && o.object_id == object.object_id));
        data.node_objects.push(object.clone());
        Ok(())
    }

    fn find_node_object(&self, bucket_id: &str, object_id: &str) -> StoreResult<Option<NodeObject>> {
        Ok(self
            .data()?
            .node_objects
            .iter()
            .find(|o| o.bucket_id == bucket_id && o.object_id == object_id)
            .cloned())
    }

    fn remove_node_object(&self, bucket_name: &str, object_id: &str) -> StoreResult<Option<NodeObject>> {
        let mut data = self.data()?;
        let pos = data
            .node_objects
            .iter()
            .position(|o| o.bucket_name == bucket_name && o.object_id == object_id);
        Ok(pos.map(|i| data.node_objects.remove(i)))
    }
}
