//! File upload and metadata service.
//!
//! Uploaded payloads live in a [`BlobStore`](services::blob_store::BlobStore),
//! their metadata in a [`RecordStore`](services::record_store::RecordStore);
//! [`FileService`](services::file_service::FileService) keeps the two in step
//! and the `query` module sorts, filters and groups record listings.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
