//! Binary Storage Layer Abstraction
//!
//! Object bytes are kept one file per object under `base_path/bucket/object_id`.
//! The master uses a store for objects it keeps locally, a storage node uses
//! one for everything it receives from the master.

pub mod local_store;
pub mod mock_store;

#[cfg(test)]
mod comprehensive_test;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a successful blob write
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenBlob {
    pub path: PathBuf,
    /// Hex encoded SHA-256 of the written bytes
    pub checksum: String,
    pub size: u64,
}

/// Trait defining the binary storage interface
pub trait BlobStore: Send + Sync {
    /// Store `data` as `bucket_name/object_id`
    fn write(&self, bucket_name: &str, object_id: &str, data: &[u8]) -> StoreResult<WrittenBlob>;

    fn read(&self, path: &Path) -> StoreResult<Vec<u8>>;

    /// Returns false when nothing was stored at `path`
    fn delete(&self, path: &Path) -> StoreResult<bool>;

    fn exists(&self, path: &Path) -> bool;
}

pub fn create_store(config: &StorageConfig) -> StoreResult<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(local_store::LocalDiskStore::new(&config.base_path)?)),
        StorageBackend::Mock => Ok(Arc::new(mock_store::MockBlobStore::new())),
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Bucket names and object ids become path components, so they must be plain names
pub fn validate_component(kind: &str, value: &str) -> StoreResult<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0')
    {
        return Err(StoreError::BadRequest(format!("invalid {}: {:?}", kind, value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_validate_component() {
        assert!(validate_component("bucket", "photos").is_ok());
        assert!(validate_component("bucket", "my.bucket-1").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "../etc"] {
            assert!(validate_component("bucket", bad).is_err(), "{:?} accepted", bad);
        }
    }
}
