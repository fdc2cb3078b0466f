//! src/services/file_service.rs
//!
//! FileService is the only component that mutates state. Every operation
//! validates its input before touching storage, runs inside a per-`file_id`
//! critical section, checks ownership against the stored record and keeps the
//! blob and its record in step (rolling back the blob when the record write
//! fails).

use crate::{
    models::{
        record::{FileRecord, validate_file_id},
        upload::{FileContent, FileUpdate, NewFile},
    },
    services::{
        blob_store::BlobStore,
        key_lock::KeyLocks,
        query::{QueryError, SortSpec, group_by_owners},
        record_store::RecordStore,
        store::{StoreError, StoreResult},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONTENT_TYPES: [&str; 4] =
    ["image/jpeg", "image/jpg", "video/mp4", "application/pdf"];
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Stable error categories callers can branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Conflict,
    NotFound,
    Forbidden,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Storage => "storage_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("file `{0}` already exists")]
    Conflict(String),
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("`{owner}` does not own file `{file_id}`")]
    Forbidden { file_id: String, owner: String },
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("file `{file_id}` may be inconsistent: {detail}")]
    Inconsistent { file_id: String, detail: String },
}

impl FileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FileError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FileError::Conflict(_) => ErrorKind::Conflict,
            FileError::NotFound(_) => ErrorKind::NotFound,
            FileError::Forbidden { .. } => ErrorKind::Forbidden,
            FileError::Storage(_) | FileError::Inconsistent { .. } => ErrorKind::Storage,
        }
    }
}

impl From<QueryError> for FileError {
    fn from(err: QueryError) -> Self {
        FileError::InvalidArgument(err.to_string())
    }
}

pub type FileResult<T> = Result<T, FileError>;

/// Tunables injected at startup.
#[derive(Clone, Debug)]
pub struct FileServiceConfig {
    /// Media types accepted for uploaded content, compared case-insensitively.
    pub allowed_content_types: Vec<String>,
    /// Upper bound for any single blob or record store call.
    pub io_timeout: Duration,
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// Outcome of the readiness probes, one per store.
#[derive(Debug)]
pub struct Readiness {
    pub record_store: StoreResult<()>,
    pub blob_store: StoreResult<()>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.record_store.is_ok() && self.blob_store.is_ok()
    }
}

/// File lifecycle manager over an injected blob store and record store.
#[derive(Clone)]
pub struct FileService {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    config: Arc<FileServiceConfig>,
    locks: KeyLocks,
}

impl FileService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        config: FileServiceConfig,
    ) -> Self {
        Self {
            blobs,
            records,
            config: Arc::new(config),
            locks: KeyLocks::new(),
        }
    }

    /// Store a new file and its record.
    ///
    /// Fails with `Conflict` if a record already exists for the id. If the
    /// record cannot be written the blob is removed again. A write that timed
    /// out may still land, so it is undone as well.
    pub async fn create(&self, new: NewFile) -> FileResult<FileRecord> {
        check_file_id(&new.file_id)?;
        require("owner", &new.owner)?;
        require("description", &new.description)?;
        self.check_content(&new.content)?;

        let file_id = new.file_id.as_str();
        let _guard = self.locks.lock(file_id).await;

        if self
            .io("record get", self.records.get(file_id))
            .await?
            .is_some()
        {
            return Err(FileError::Conflict(file_id.to_string()));
        }

        let record = FileRecord::new(file_id, &new.owner, &new.description, Utc::now());
        if let Err(err) = self
            .io("blob put", self.blobs.put(file_id, new.content.bytes))
            .await
        {
            if err.is_timeout() {
                warn!("blob write for {} timed out, removing it: {}", file_id, err);
                if let Err(rollback) = self.discard_blob(file_id).await {
                    return Err(rollback_failed(
                        file_id,
                        &err,
                        vec![format!("blob could not be removed ({})", rollback)],
                    ));
                }
            }
            return Err(err.into());
        }

        if let Err(err) = self.io("record put", self.records.put(&record)).await {
            warn!("record write for {} failed, removing blob: {}", file_id, err);
            let mut failures = Vec::new();
            if err.is_timeout() {
                if let Err(rollback) = self.discard_record(file_id).await {
                    failures.push(format!("record could not be removed ({})", rollback));
                }
            }
            if let Err(rollback) = self.discard_blob(file_id).await {
                failures.push(format!("orphan blob could not be removed ({})", rollback));
            }
            if failures.is_empty() {
                return Err(FileError::Storage(err));
            }
            return Err(rollback_failed(file_id, &err, failures));
        }

        info!("created file {} for {}", file_id, record.owner);
        Ok(record)
    }

    /// Replace the description, the content, or both, and refresh
    /// `modification_date`. An empty description counts as not supplied.
    /// On failure the previous content and, after a timeout, the previous
    /// record are written back.
    pub async fn update(&self, update: FileUpdate) -> FileResult<FileRecord> {
        check_file_id(&update.file_id)?;
        require("owner", &update.owner)?;
        if let Some(content) = &update.content {
            self.check_content(content)?;
        }
        let description = update.description.filter(|d| !d.is_empty());

        let file_id = update.file_id.as_str();
        let _guard = self.locks.lock(file_id).await;
        let mut record = self.load_owned(file_id, &update.owner).await?;
        let original = record.clone();

        // Outer `Some` means the blob was overwritten; inner holds the old bytes.
        let replaced = match update.content {
            Some(content) => {
                let previous = match self.io("blob get", self.blobs.get(file_id)).await {
                    Ok(bytes) => Some(bytes),
                    Err(StoreError::NotFound(_)) => None,
                    Err(err) => return Err(err.into()),
                };
                if let Err(err) = self
                    .io("blob put", self.blobs.put(file_id, content.bytes))
                    .await
                {
                    if err.is_timeout() {
                        warn!("blob write for {} timed out, restoring it: {}", file_id, err);
                        if let Err(rollback) = self.restore_blob(file_id, previous).await {
                            return Err(rollback_failed(
                                file_id,
                                &err,
                                vec![format!(
                                    "previous content could not be restored ({})",
                                    rollback
                                )],
                            ));
                        }
                    }
                    return Err(err.into());
                }
                Some(previous)
            }
            None => None,
        };

        if let Some(description) = description {
            record.description = description;
        }
        record.touch(Utc::now());

        if let Err(err) = self.io("record put", self.records.put(&record)).await {
            warn!("record write for {} failed, rolling back: {}", file_id, err);
            let mut failures = Vec::new();
            if err.is_timeout() {
                let restored = self.io("record put", self.records.put(&original)).await;
                if let Err(rollback) = restored {
                    failures.push(format!(
                        "previous record could not be restored ({})",
                        rollback
                    ));
                }
            }
            if let Some(previous) = replaced {
                if let Err(rollback) = self.restore_blob(file_id, previous).await {
                    failures.push(format!(
                        "previous content could not be restored ({})",
                        rollback
                    ));
                }
            }
            if failures.is_empty() {
                return Err(err.into());
            }
            return Err(rollback_failed(file_id, &err, failures));
        }

        info!("updated file {} for {}", file_id, record.owner);
        Ok(record)
    }

    /// Remove a file and its record. Both halves are removed even if one is
    /// already gone; that case is reported as `NotFound`.
    pub async fn delete(&self, file_id: &str, owner: &str) -> FileResult<FileRecord> {
        check_file_id(file_id)?;
        require("owner", owner)?;

        let _guard = self.locks.lock(file_id).await;
        let record = self.load_owned(file_id, owner).await?;

        let blob = self.io("blob delete", self.blobs.delete(file_id)).await;
        let meta = self.io("record delete", self.records.delete(file_id)).await;

        let gone = |r: &StoreResult<()>| matches!(r, Ok(()) | Err(StoreError::NotFound(_)));
        if blob.is_ok() && meta.is_ok() {
            info!("deleted file {} for {}", file_id, owner);
            Ok(record)
        } else if gone(&blob) && gone(&meta) {
            warn!("file {} was only partially present when deleted", file_id);
            Err(FileError::NotFound(file_id.to_string()))
        } else {
            let detail = format!(
                "blob delete: {}; record delete: {}",
                describe(&blob),
                describe(&meta)
            );
            error!("delete of {} failed: {}", file_id, detail);
            Err(FileError::Inconsistent {
                file_id: file_id.to_string(),
                detail,
            })
        }
    }

    /// Read a file's record and content after checking ownership against the
    /// stored record.
    pub async fn retrieve(&self, file_id: &str, owner: &str) -> FileResult<(FileRecord, Bytes)> {
        check_file_id(file_id)?;
        require("owner", owner)?;

        let _guard = self.locks.lock(file_id).await;
        let record = self.load_owned(file_id, owner).await?;
        let content = match self.io("blob get", self.blobs.get(file_id)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                warn!("record {} has no blob", file_id);
                return Err(FileError::NotFound(file_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        debug!("retrieved file {} ({} bytes)", file_id, content.len());
        Ok((record, content))
    }

    /// All records, sorted or filtered by `spec`.
    pub async fn list_files(&self, spec: &SortSpec) -> FileResult<Vec<FileRecord>> {
        let records = self.io("record list", self.records.list_all()).await?;
        Ok(spec.apply(records))
    }

    /// Records of the given owners, grouped by owner with `spec` applied per group.
    pub async fn list_files_by_owners(
        &self,
        owners: &[String],
        spec: &SortSpec,
    ) -> FileResult<Vec<FileRecord>> {
        let records = self.io("record list", self.records.list_all()).await?;
        Ok(group_by_owners(records, owners, spec))
    }

    /// Probe both stores concurrently.
    pub async fn readiness(&self) -> Readiness {
        let (record_store, blob_store) = futures::join!(
            self.io("record ping", self.records.ping()),
            self.io("blob probe", self.blobs.probe()),
        );
        Readiness {
            record_store,
            blob_store,
        }
    }

    /// Fetch the stored record and apply the ownership predicate.
    async fn load_owned(&self, file_id: &str, owner: &str) -> FileResult<FileRecord> {
        let record = self
            .io("record get", self.records.get(file_id))
            .await?
            .ok_or_else(|| FileError::NotFound(file_id.to_string()))?;

        if !record.is_owned_by(owner) {
            warn!("{} attempted to access file {} owned by someone else", owner, file_id);
            return Err(FileError::Forbidden {
                file_id: file_id.to_string(),
                owner: owner.to_string(),
            });
        }
        Ok(record)
    }

    async fn restore_blob(&self, file_id: &str, previous: Option<Bytes>) -> StoreResult<()> {
        match previous {
            Some(bytes) => self.io("blob put", self.blobs.put(file_id, bytes)).await,
            None => self.discard_blob(file_id).await,
        }
    }

    /// Remove a blob that may or may not have been written.
    async fn discard_blob(&self, file_id: &str) -> StoreResult<()> {
        match self.io("blob delete", self.blobs.delete(file_id)).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Remove a record that may or may not have been written.
    async fn discard_record(&self, file_id: &str) -> StoreResult<()> {
        match self.io("record delete", self.records.delete(file_id)).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn check_content(&self, content: &FileContent) -> FileResult<()> {
        if content.bytes.is_empty() {
            return Err(FileError::InvalidArgument("file content is required".into()));
        }
        let media_type = content
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        if self
            .config
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(media_type))
        {
            Ok(())
        } else {
            Err(FileError::InvalidArgument(format!(
                "content type `{}` is not supported; supported types: {}",
                content.content_type,
                self.config.allowed_content_types.join(", ")
            )))
        }
    }

    /// Bound a store call by the configured timeout.
    async fn io<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        let after = self.config.io_timeout;
        match timeout(after, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout { op, after }),
        }
    }
}

fn require(field: &str, value: &str) -> FileResult<()> {
    if value.is_empty() {
        return Err(FileError::InvalidArgument(format!("{} is required", field)));
    }
    Ok(())
}

fn check_file_id(file_id: &str) -> FileResult<()> {
    validate_file_id(file_id).map_err(|reason| FileError::InvalidArgument(reason.into()))
}

fn rollback_failed(file_id: &str, cause: &StoreError, failures: Vec<String>) -> FileError {
    let detail = format!("write failed ({}); {}", cause, failures.join("; "));
    error!("rollback of {} failed: {}", file_id, detail);
    FileError::Inconsistent {
        file_id: file_id.to_string(),
        detail,
    }
}

fn describe(result: &StoreResult<()>) -> String {
    match result {
        Ok(()) => "ok".into(),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        blob_store::FsBlobStore,
        record_store::{SqliteRecordStore, memory_store},
    };
    use async_trait::async_trait;
    use std::{
        collections::HashMap,
        io,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
    };
    use tempfile::TempDir;

    /// In-memory blobs with switchable failures.
    #[derive(Default)]
    struct MemoryBlobs {
        data: Mutex<HashMap<String, Bytes>>,
        fail_put: AtomicBool,
        fail_delete: AtomicBool,
        /// Next `put` stores the bytes, then answers too late.
        late_put: AtomicBool,
    }

    impl MemoryBlobs {
        fn contains(&self, key: &str) -> bool {
            self.data.lock().unwrap().contains_key(key)
        }
    }

    fn broken() -> StoreError {
        StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk on fire"))
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn put(&self, key: &str, bytes: Bytes) -> StoreResult<()> {
            if self.fail_put.load(Ordering::SeqCst) {
                return Err(broken());
            }
            self.data.lock().unwrap().insert(key.to_string(), bytes);
            if self.late_put.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> StoreResult<Bytes> {
            self.data
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        }

        async fn delete(&self, key: &str) -> StoreResult<()> {
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(broken());
            }
            self.data
                .lock()
                .unwrap()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(key.to_string()))
        }

        async fn probe(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    /// SQLite records whose writes can be made to fail or stall.
    struct FlakyRecords {
        inner: SqliteRecordStore,
        fail_put: AtomicBool,
        stall: AtomicBool,
        /// Next `put` commits, then answers too late.
        late_put: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for FlakyRecords {
        async fn put(&self, record: &FileRecord) -> StoreResult<()> {
            if self.fail_put.load(Ordering::SeqCst) {
                return Err(broken());
            }
            self.inner.put(record).await?;
            if self.late_put.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(())
        }

        async fn get(&self, file_id: &str) -> StoreResult<Option<FileRecord>> {
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.inner.get(file_id).await
        }

        async fn delete(&self, file_id: &str) -> StoreResult<()> {
            self.inner.delete(file_id).await
        }

        async fn list_all(&self) -> StoreResult<Vec<FileRecord>> {
            self.inner.list_all().await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
    }

    struct Harness {
        service: FileService,
        blobs: Arc<MemoryBlobs>,
        records: Arc<FlakyRecords>,
    }

    async fn harness() -> Harness {
        let blobs = Arc::new(MemoryBlobs::default());
        let records = Arc::new(FlakyRecords {
            inner: memory_store().await,
            fail_put: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            late_put: AtomicBool::new(false),
        });
        let config = FileServiceConfig {
            io_timeout: Duration::from_millis(200),
            ..FileServiceConfig::default()
        };
        let service = FileService::new(blobs.clone(), records.clone(), config);
        Harness {
            service,
            blobs,
            records,
        }
    }

    fn new_file(id: &str, owner: &str, description: &str, bytes: &'static [u8]) -> NewFile {
        NewFile {
            file_id: id.into(),
            owner: owner.into(),
            description: description.into(),
            content: FileContent::new(Bytes::from_static(bytes), "image/jpeg"),
        }
    }

    #[tokio::test]
    async fn create_update_delete_scenario() {
        let dir = TempDir::new().unwrap();
        let service = FileService::new(
            Arc::new(FsBlobStore::new(dir.path())),
            Arc::new(memory_store().await),
            FileServiceConfig::default(),
        );

        service
            .create(new_file("a", "alice", "d1", &[0x01, 0x02]))
            .await
            .unwrap();
        let (record, content) = service.retrieve("a", "alice").await.unwrap();
        assert_eq!(record.description, "d1");
        assert_eq!(content, Bytes::from_static(&[0x01, 0x02]));

        service
            .update(FileUpdate {
                file_id: "a".into(),
                owner: "alice".into(),
                description: Some("d2".into()),
                content: None,
            })
            .await
            .unwrap();
        let (record, content) = service.retrieve("a", "alice").await.unwrap();
        assert_eq!(record.description, "d2");
        assert_eq!(content, Bytes::from_static(&[0x01, 0x02]));

        service.delete("a", "alice").await.unwrap();
        let err = service.retrieve("a", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_round_trips_metadata() {
        let h = harness().await;
        let created = h
            .service
            .create(new_file("scan", "bob", "tax return", b"%PDF-1.7"))
            .await
            .unwrap();
        assert_eq!(created.creation_date, created.modification_date);

        let (record, content) = h.service.retrieve("scan", "bob").await.unwrap();
        assert_eq!(record, created);
        assert_eq!(content, Bytes::from_static(b"%PDF-1.7"));
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_and_keeps_original() {
        let h = harness().await;
        h.service
            .create(new_file("a", "alice", "first", b"one"))
            .await
            .unwrap();

        let err = h
            .service
            .create(new_file("a", "mallory", "second", b"two"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let (record, content) = h.service.retrieve("a", "alice").await.unwrap();
        assert_eq!(record.description, "first");
        assert_eq!(content, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_write() {
        let h = harness().await;
        let cases = [
            new_file("a", "alice", "d", b""),
            new_file("", "alice", "d", b"x"),
            new_file("../a", "alice", "d", b"x"),
            new_file("a", "", "d", b"x"),
            new_file("a", "alice", "", b"x"),
            NewFile {
                content: FileContent::new(Bytes::from_static(b"x"), "text/plain"),
                ..new_file("a", "alice", "d", b"x")
            },
        ];
        for case in cases {
            let err = h.service.create(case).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{err}");
        }
        assert!(!h.blobs.contains("a"));
        assert!(h.records.inner.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn content_type_matching_ignores_case_and_parameters() {
        let h = harness().await;
        let mut file = new_file("clip", "alice", "d", b"mp4");
        file.content.content_type = "Video/MP4; codecs=avc1".into();
        h.service.create(file).await.unwrap();
    }

    #[tokio::test]
    async fn allow_list_comes_from_config() {
        let service = FileService::new(
            Arc::new(MemoryBlobs::default()),
            Arc::new(memory_store().await),
            FileServiceConfig {
                allowed_content_types: vec!["text/plain".into()],
                ..FileServiceConfig::default()
            },
        );
        let jpeg = service.create(new_file("a", "alice", "d", b"x")).await;
        assert_eq!(jpeg.unwrap_err().kind(), ErrorKind::InvalidArgument);

        let mut text = new_file("b", "alice", "d", b"x");
        text.content.content_type = "text/plain".into();
        service.create(text).await.unwrap();
    }

    #[tokio::test]
    async fn content_only_update_keeps_description() {
        let h = harness().await;
        let created = h
            .service
            .create(new_file("a", "alice", "d1", b"old"))
            .await
            .unwrap();

        let updated = h
            .service
            .update(FileUpdate {
                file_id: "a".into(),
                owner: "alice".into(),
                description: Some(String::new()),
                content: Some(FileContent::new(Bytes::from_static(b"new"), "image/jpeg")),
            })
            .await
            .unwrap();

        assert_eq!(updated.description, "d1");
        assert_eq!(updated.creation_date, created.creation_date);
        assert!(updated.modification_date >= created.creation_date);
        let (_, content) = h.service.retrieve("a", "alice").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn update_rejects_unsupported_content() {
        let h = harness().await;
        h.service
            .create(new_file("a", "alice", "d1", b"old"))
            .await
            .unwrap();
        let err = h
            .service
            .update(FileUpdate {
                file_id: "a".into(),
                owner: "alice".into(),
                content: Some(FileContent::new(Bytes::from_static(b"x"), "text/html")),
                ..FileUpdate::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn non_owner_is_forbidden_everywhere() {
        let h = harness().await;
        h.service
            .create(new_file("a", "alice", "d1", b"secret"))
            .await
            .unwrap();

        let update = h
            .service
            .update(FileUpdate {
                file_id: "a".into(),
                owner: "mallory".into(),
                description: Some("pwned".into()),
                content: Some(FileContent::new(Bytes::from_static(b"evil"), "image/jpeg")),
            })
            .await;
        assert_eq!(update.unwrap_err().kind(), ErrorKind::Forbidden);

        let delete = h.service.delete("a", "mallory").await;
        assert_eq!(delete.unwrap_err().kind(), ErrorKind::Forbidden);

        let retrieve = h.service.retrieve("a", "mallory").await;
        assert_eq!(retrieve.unwrap_err().kind(), ErrorKind::Forbidden);

        let (record, content) = h.service.retrieve("a", "alice").await.unwrap();
        assert_eq!(record.description, "d1");
        assert_eq!(record.creation_date, record.modification_date);
        assert_eq!(content, Bytes::from_static(b"secret"));
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let h = harness().await;
        let update = h
            .service
            .update(FileUpdate {
                file_id: "ghost".into(),
                owner: "alice".into(),
                ..FileUpdate::default()
            })
            .await;
        assert_eq!(update.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            h.service.delete("ghost", "alice").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            h.service.retrieve("ghost", "alice").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn failed_record_write_rolls_back_blob() {
        let h = harness().await;
        h.records.fail_put.store(true, Ordering::SeqCst);

        let err = h
            .service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Storage(_)));
        assert!(!h.blobs.contains("a"));
        assert!(h.records.inner.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_rollback_is_reported() {
        let h = harness().await;
        h.records.fail_put.store(true, Ordering::SeqCst);
        h.blobs.fail_delete.store(true, Ordering::SeqCst);

        let err = h
            .service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Inconsistent { .. }));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn late_record_write_is_undone() {
        let h = harness().await;
        h.records.late_put.store(true, Ordering::SeqCst);

        let err = h
            .service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Storage(StoreError::Timeout { .. })));
        assert!(h.records.inner.get("a").await.unwrap().is_none());
        assert!(!h.blobs.contains("a"));

        h.service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap();
        let (_, content) = h.service.retrieve("a", "alice").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn late_blob_write_is_undone() {
        let h = harness().await;
        h.blobs.late_put.store(true, Ordering::SeqCst);

        let err = h
            .service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileError::Storage(StoreError::Timeout { .. })));
        assert!(!h.blobs.contains("a"));
        assert!(h.records.inner.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_update_writes_are_rolled_back() {
        let h = harness().await;
        h.service
            .create(new_file("a", "alice", "d1", b"old"))
            .await
            .unwrap();
        let update = || FileUpdate {
            file_id: "a".into(),
            owner: "alice".into(),
            description: Some("d2".into()),
            content: Some(FileContent::new(Bytes::from_static(b"new"), "image/jpeg")),
        };

        h.blobs.late_put.store(true, Ordering::SeqCst);
        let err = h.service.update(update()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        let (record, content) = h.service.retrieve("a", "alice").await.unwrap();
        assert_eq!(record.description, "d1");
        assert_eq!(content, Bytes::from_static(b"old"));

        h.records.late_put.store(true, Ordering::SeqCst);
        let err = h.service.update(update()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        let (after, content) = h.service.retrieve("a", "alice").await.unwrap();
        assert_eq!(after, record);
        assert_eq!(content, Bytes::from_static(b"old"));
    }

    #[tokio::test]
    async fn failed_blob_write_leaves_no_record() {
        let h = harness().await;
        h.blobs.fail_put.store(true, Ordering::SeqCst);

        let err = h
            .service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(h.records.inner.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_update_restores_previous_content() {
        let h = harness().await;
        h.service
            .create(new_file("a", "alice", "d1", b"old"))
            .await
            .unwrap();
        h.records.fail_put.store(true, Ordering::SeqCst);

        let err = h
            .service
            .update(FileUpdate {
                file_id: "a".into(),
                owner: "alice".into(),
                description: Some("d2".into()),
                content: Some(FileContent::new(Bytes::from_static(b"new"), "image/jpeg")),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        h.records.fail_put.store(false, Ordering::SeqCst);
        let (record, content) = h.service.retrieve("a", "alice").await.unwrap();
        assert_eq!(record.description, "d1");
        assert_eq!(content, Bytes::from_static(b"old"));
    }

    #[tokio::test]
    async fn delete_cleans_orphaned_record() {
        let h = harness().await;
        h.service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap();
        h.blobs.data.lock().unwrap().clear();

        let err = h.service.delete("a", "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.records.inner.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_blob_delete_is_storage_error() {
        let h = harness().await;
        h.service
            .create(new_file("a", "alice", "d", b"x"))
            .await
            .unwrap();
        h.blobs.fail_delete.store(true, Ordering::SeqCst);

        let err = h.service.delete("a", "alice").await.unwrap_err();
        assert!(matches!(err, FileError::Inconsistent { .. }));
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let h = harness().await;
        h.records.stall.store(true, Ordering::SeqCst);

        let err = h.service.retrieve("a", "alice").await.unwrap_err();
        assert!(matches!(
            err,
            FileError::Storage(StoreError::Timeout { op: "record get", .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_creates_of_one_id_admit_one_winner() {
        let h = harness().await;
        let tasks = (0..8).map(|i| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .create(new_file("same", &format!("owner{i}"), "d", b"x"))
                    .await
            })
        });

        let results = futures::future::join_all(tasks).await;
        let winners = results
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn listings_read_through_record_store() {
        let h = harness().await;
        for (id, owner) in [("a", "alice"), ("b", "bob"), ("c", "alice")] {
            h.service
                .create(new_file(id, owner, "d", b"x"))
                .await
                .unwrap();
        }

        let all = h.service.list_files(&SortSpec::CreationDateDesc).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].creation_date >= w[1].creation_date));

        let owners = vec!["bob".to_string(), "alice".to_string()];
        let grouped = h
            .service
            .list_files_by_owners(&owners, &SortSpec::CreationDateAsc)
            .await
            .unwrap();
        let ids: Vec<_> = grouped.iter().map(|r| r.file_id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "b"]);
    }

    #[tokio::test]
    async fn readiness_reports_each_store() {
        let h = harness().await;
        let report = h.service.readiness().await;
        assert!(report.is_ready());
    }
}
