//! Core data models for the file receiver.
//!
//! `FileRecord` maps onto the `files` table via `sqlx::FromRow` and serializes
//! as JSON via `serde`; the upload types carry lifecycle inputs from the
//! transport layer into `FileService`.

pub mod record;
pub mod upload;
