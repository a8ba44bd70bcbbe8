//! Local disk blob storage

use crate::error::StoreResult;
use crate::storage::{validate_component, BlobStore, WrittenBlob};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const WRITE_CHUNK: usize = 64 * 1024;

/// Stores each object as `base_path/bucket_name/object_id`
pub struct LocalDiskStore {
    base_path: PathBuf,
}

impl LocalDiskStore {
    pub fn new(base_path: &str) -> StoreResult<Self> {
        let path = PathBuf::from(base_path);
        fs::create_dir_all(&path)?;
        info!("Using storage directory: {}", path.display());
        Ok(Self { base_path: path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn object_path(&self, bucket_name: &str, object_id: &str) -> PathBuf {
        self.base_path.join(bucket_name).join(object_id)
    }
}

impl BlobStore for LocalDiskStore {
    fn write(&self, bucket_name: &str, object_id: &str, data: &[u8]) -> StoreResult<WrittenBlob> {
        validate_component("bucket name", bucket_name)?;
        validate_component("object id", object_id)?;

        let dir = self.base_path.join(bucket_name);
        fs::create_dir_all(&dir)?;
        let path = dir.join(object_id);
        let partial = dir.join(format!("{}.part", object_id));

        // Hash while writing, then move into place so readers never see half a file
        let mut hasher = Sha256::new();
        let result = (|| -> std::io::Result<()> {
            let mut file = File::create(&partial)?;
            for chunk in data.chunks(WRITE_CHUNK) {
                hasher.update(chunk);
                file.write_all(chunk)?;
            }
            file.sync_all()?;
            fs::rename(&partial, &path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        let checksum = hex::encode(hasher.finalize());
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(WrittenBlob { path, checksum, size: data.len() as u64 })
    }

    fn read(&self, path: &Path) -> StoreResult<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn delete(&self, path: &Path) -> StoreResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Delete of {} skipped, file already absent", path.display());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}
