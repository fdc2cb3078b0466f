//! src/services/blob_store.rs
//!
//! Key-addressed storage for raw file payloads. `FsBlobStore` keeps each
//! payload on local disk, sharded beneath `base_path/{shard}/{shard}/{key}`.

use crate::{
    models::record::validate_file_id,
    services::store::{StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Storage for file bytes, addressed by file identifier.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create or replace the payload stored under `key`.
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()>;

    /// Read the payload stored under `key`, or `StoreError::NotFound`.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Remove the payload stored under `key`, or `StoreError::NotFound`.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Write, read back and remove a scratch payload to prove the store is usable.
    async fn probe(&self) -> StoreResult<()>;
}

/// Blob store writing one file per key under a base directory.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Two-level shard identifiers: the first two bytes of MD5(key) as hex.
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Build `base_path/{shard}/{shard}/{key}`. Parent directories may not exist yet.
    fn blob_path(&self, key: &str) -> StoreResult<PathBuf> {
        if validate_file_id(key).is_err() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        Ok(path)
    }

    /// Remove empty shard directories up to (not including) the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    /// Writes to a temporary sibling, fsyncs, then renames into place so a
    /// reader never observes a half-written payload.
    async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
        let file_path = self.blob_path(key)?;
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(())
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        debug!("stored {} bytes at {}", bytes.len(), file_path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let file_path = self.blob_path(key)?;
        match fs::read(&file_path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let file_path = self.blob_path(key)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn probe(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;

        let read_back = fs::read(&tmp_path).await;
        let removed = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        removed?;
        Ok(())
    }
}
