use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use flux_webhooks::events::EVENT_BACKUP_COMPLETED;

use crate::auth_ctx::{authenticate, require_role};
use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BackupResponse {
    archive_path: String,
}

pub async fn backup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BackupResponse>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;
    require_role(&ctx, "admin")?;

    let data_dir = state.data_dir.clone();
    let dest_dir = state.backup_dest_dir.clone();
    let archive = tokio::task::spawn_blocking(move || flux_backup::create_backup(&data_dir, &dest_dir))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))??;

    state.webhook_dispatcher.dispatch(
        EVENT_BACKUP_COMPLETED,
        json!({ "archive_path": archive.display().to_string(), "user_id": ctx.user_id }),
    );

    Ok(Json(BackupResponse { archive_path: archive.display().to_string() }))
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    archive_path: String,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    status: &'static str,
}

pub async fn restore_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<RestoreResponse>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;
    require_role(&ctx, "admin")?;

    let archive_path = PathBuf::from(req.archive_path);
    tokio::task::spawn_blocking(move || flux_backup::restore_backup(&archive_path, &PathBuf::from(".")))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))??;

    Ok(Json(RestoreResponse { status: "restored" }))
}
