//! Defines routes for file upload and metadata operations.
//!
//! ## Structure
//! - **Listing endpoints**
//!   - `GET    /api/files`                  : list records (`sort_type`, `start_date`, `end_date`)
//!   - `POST   /api/files/filter-by-date`   : same, form-encoded
//!   - `POST   /api/files/filter-by-user`   : records of `users`, grouped by owner
//!
//! - **File endpoints**
//!   - `POST   /api/files`                  : upload a new file (multipart)
//!   - `GET    /api/files/{file_id}?owner=` : record + base64 content
//!   - `PUT    /api/files/{file_id}`        : replace description and/or content (multipart)
//!   - `DELETE /api/files/{file_id}?owner=` : remove file and record
//!   - `POST   /api/files/upload`           : multipart dispatcher on `query_type`

use crate::{
    handlers::{
        file_handlers::{
            create_file, delete_file, filter_by_date, filter_by_user, list_files, retrieve_file,
            update_file, upload,
        },
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for all file routes.
///
/// Request bodies are capped at `max_upload_bytes`. The router carries the
/// shared `FileService` to all handlers.
pub fn routes(max_upload_bytes: usize) -> Router<FileService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Listing routes
        .route("/api/files", get(list_files).post(create_file))
        .route("/api/files/filter-by-date", post(filter_by_date))
        .route("/api/files/filter-by-user", post(filter_by_user))
        .route("/api/files/upload", post(upload))
        // Single-file routes
        .route(
            "/api/files/{file_id}",
            get(retrieve_file).put(update_file).delete(delete_file),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
