//! Represents the metadata record stored beside every uploaded file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

const MAX_FILE_ID_LEN: usize = 255;

/// Metadata describing one uploaded file.
///
/// The payload bytes are not part of the record; they live in the blob store
/// under the same `file_id`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Caller-chosen identifier. Primary key of the record store and key of the blob store.
    pub file_id: String,

    /// Name of the caller that uploaded the file.
    pub owner: String,

    /// Free-form description supplied at upload time.
    pub description: String,

    /// When the file was first stored. Never changes afterwards.
    pub creation_date: DateTime<Utc>,

    /// When the file or its description was last written.
    pub modification_date: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh record whose creation and modification dates are both `now`.
    pub fn new(
        file_id: impl Into<String>,
        owner: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            owner: owner.into(),
            description: description.into(),
            creation_date: now,
            modification_date: now,
        }
    }

    /// Ownership predicate used before every mutation or content read.
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }

    /// Refresh `modification_date`, never moving it before `creation_date`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.modification_date = now.max(self.creation_date);
    }
}

/// Check that a file identifier is usable as a storage key.
///
/// Rejects empty or oversized ids, path separators, `..`, a leading dot and
/// control characters.
pub fn validate_file_id(file_id: &str) -> Result<(), &'static str> {
    if file_id.is_empty() {
        return Err("file_id is required");
    }
    if file_id.len() > MAX_FILE_ID_LEN {
        return Err("file_id must be at most 255 bytes");
    }
    if file_id.starts_with('.') || file_id.contains("..") {
        return Err("file_id must not start with a dot or contain `..`");
    }
    if file_id
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\')
    {
        return Err("file_id must not contain path separators or control characters");
    }
    Ok(())
}
