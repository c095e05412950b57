//! Liveness and readiness.
//!
//! `/readyz` answers 503 until the metadata store responds and the storage
//! directory accepts a scratch write.

use crate::{errors::GatewayResult, services::gateway_service::GatewayService};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, io, path::Path};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

const SCRATCH_CONTENT: &[u8] = b"object-gateway";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(err) => Self {
                ok: false,
                error: Some(err.to_string()),
            },
        }
    }
}

/// `GET /healthz`. Never touches storage.
pub async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// `GET /readyz`
pub async fn readyz(State(service): State<GatewayService>) -> impl IntoResponse {
    let checks = BTreeMap::from([
        ("metadata", CheckStatus::from_result(check_metadata(&service).await)),
        (
            "storage",
            CheckStatus::from_result(check_storage_dir(&service.settings.storage_dir).await),
        ),
    ]);

    let ready = checks.values().all(|check| check.ok);
    if !ready {
        for (name, check) in &checks {
            if let Some(error) = &check.error {
                warn!(check = *name, error = %error, "readiness check failed");
            }
        }
    }

    let (status, label) = if ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (status, Json(ReadyResponse { status: label, checks }))
}

async fn check_metadata(service: &GatewayService) -> GatewayResult<()> {
    service.store.ping().await
}

/// Write, read back and remove a scratch file under `dir`.
async fn check_storage_dir(dir: &Path) -> io::Result<()> {
    let scratch = dir.join(format!(".ready-{}", Uuid::new_v4().simple()));
    fs::write(&scratch, SCRATCH_CONTENT).await?;

    let read_back = fs::read(&scratch).await;
    let removed = fs::remove_file(&scratch).await;

    if read_back? != SCRATCH_CONTENT {
        return Err(io::Error::other("scratch file read back differently"));
    }
    removed
}
