//! Comprehensive tests for the blob storage abstraction

use crate::config::{StorageBackend, StorageConfig};
use crate::storage::{create_store, sha256_hex};
use tempfile::TempDir;

#[test]
fn test_backends_share_contract() {
    let dir = TempDir::new().unwrap();
    for backend in [StorageBackend::Local, StorageBackend::Mock] {
        println!("Testing with backend: {:?}", backend);
        let config = StorageConfig {
            backend,
            base_path: dir.path().join("blobs").to_string_lossy().to_string(),
            ..StorageConfig::default()
        };
        let store = create_store(&config).unwrap();
        let data = b"contract test payload";

        let blob = store.write("docs", "object-1", data).unwrap();
        assert_eq!(blob.checksum, sha256_hex(data));
        assert!(store.exists(&blob.path));
        assert_eq!(store.read(&blob.path).unwrap(), data.to_vec());

        // Overwrite keeps one copy under the same path
        let again = store.write("docs", "object-1", b"v2").unwrap();
        assert_eq!(again.path, blob.path);
        assert_eq!(store.read(&blob.path).unwrap(), b"v2".to_vec());

        assert!(store.delete(&blob.path).unwrap());
        assert!(!store.delete(&blob.path).unwrap());
        assert!(store.read(&blob.path).is_err());
    }
}
