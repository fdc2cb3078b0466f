//! Error type shared by the blob and record stores.

use std::{io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key `{0}` not found")]
    NotFound(String),
    #[error("key `{0}` is not a valid storage key")]
    InvalidKey(String),
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// A timed-out call was abandoned, not cancelled: the write may still land.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
