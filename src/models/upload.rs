//! Inputs accepted by the file lifecycle operations.

use bytes::Bytes;
use std::str::FromStr;

/// Raw uploaded bytes together with the media type the client declared.
#[derive(Clone, Debug)]
pub struct FileContent {
    pub bytes: Bytes,
    pub content_type: String,
}

impl FileContent {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

/// Everything needed to store a new file.
#[derive(Clone, Debug)]
pub struct NewFile {
    pub file_id: String,
    pub owner: String,
    pub description: String,
    pub content: FileContent,
}

/// A partial update. Fields left as `None` keep their stored value.
#[derive(Clone, Debug, Default)]
pub struct FileUpdate {
    pub file_id: String,
    pub owner: String,
    pub description: Option<String>,
    pub content: Option<FileContent>,
}

/// Operation selector of the single-endpoint upload form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryType {
    Create,
    Update,
    Delete,
    Retrieve,
}

impl FromStr for QueryType {
    type Err = String;

    /// Accepts the operation name (any case) or its ordinal `0..=3`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" | "0" => Ok(Self::Create),
            "update" | "1" => Ok(Self::Update),
            "delete" | "2" => Ok(Self::Delete),
            "retrieve" | "3" => Ok(Self::Retrieve),
            other => Err(format!("unknown query type `{}`", other)),
        }
    }
}
