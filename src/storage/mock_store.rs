//! Mock implementation of BlobStore for testing

use crate::error::{StoreError, StoreResult};
use crate::storage::{sha256_hex, validate_component, BlobStore, WrittenBlob};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// In-memory blob store keyed by the path it hands out
#[derive(Default)]
pub struct MockBlobStore {
    data: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.data.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut data) = self.data.lock() {
            data.clear();
        }
    }
}

impl BlobStore for MockBlobStore {
    fn write(&self, bucket_name: &str, object_id: &str, data: &[u8]) -> StoreResult<WrittenBlob> {
        validate_component("bucket name", bucket_name)?;
        validate_component("object id", object_id)?;
        let path = PathBuf::from("mock").join(bucket_name).join(object_id);
        let mut store = self
            .data
            .lock()
            .map_err(|_| StoreError::Internal("mock blob lock poisoned".to_string()))?;
        store.insert(path.clone(), data.to_vec());
        Ok(WrittenBlob { path, checksum: sha256_hex(data), size: data.len() as u64 })
    }

    fn read(&self, path: &Path) -> StoreResult<Vec<u8>> {
        let store = self
            .data
            .lock()
            .map_err(|_| StoreError::Internal("mock blob lock poisoned".to_string()))?;
        store
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {}", path.display())))
    }

    fn delete(&self, path: &Path) -> StoreResult<bool> {
        let mut store = self
            .data
            .lock()
            .map_err(|_| StoreError::Internal("mock blob lock poisoned".to_string()))?;
        Ok(store.remove(path).is_some())
    }

    fn exists(&self, path: &Path) -> bool {
        self.data.lock().map(|d| d.contains_key(path)).unwrap_or(false)
    }
}
