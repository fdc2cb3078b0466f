//! Storage and lifecycle services.
//!
//! `FileService` orchestrates a `BlobStore` and a `RecordStore`; `query` holds
//! the pure listing logic it applies to record enumerations.

pub mod blob_store;
pub mod file_service;
pub mod key_lock;
pub mod query;
pub mod record_store;
pub mod store;
