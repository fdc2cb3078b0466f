//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the record store and blob store

use crate::services::{file_service::FileService, store::StoreResult};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe. Always 200 and never touches storage.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs `SELECT 1` against the record store and a write/read/delete probe
/// against the blob store. HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let report = service.readiness().await;
    let ready = report.is_ready();

    let mut checks = HashMap::new();
    checks.insert("record_store", CheckStatus::from(&report.record_store));
    checks.insert("blob_store", CheckStatus::from(&report.blob_store));

    let body = ReadyResponse {
        status: if ready { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!("readiness check failed: {:?}", report);
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<&StoreResult<()>> for CheckStatus {
    fn from(result: &StoreResult<()>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        }
    }
}
