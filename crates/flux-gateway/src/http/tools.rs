use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use flux_tools::{InstallOutcome, MarketplaceEntry};

use crate::auth_ctx::{authenticate, require_role};
use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<MarketplaceEntry>>, GatewayError> {
    authenticate(&state, &headers, "http")?;
    let marketplace = state.marketplace.lock().unwrap();
    Ok(Json(marketplace.search(&params.q, params.category.as_deref(), &params.tags)))
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    name: String,
}

pub async fn install_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InstallRequest>,
) -> Result<Json<InstallOutcome>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;
    require_role(&ctx, "admin")?;

    let outcome = {
        let marketplace = state.marketplace.lock().unwrap();
        marketplace.install(&req.name)
    };
    if outcome.status == "error" {
        return Err(GatewayError::BadRequest(outcome.message));
    }
    let _ = state.tools.reload_if_changed().await;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct UninstallParams {
    name: String,
}

#[derive(Debug, Serialize)]
pub struct UninstallResponse {
    status: String,
    message: String,
}

pub async fn uninstall_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<UninstallParams>,
) -> Result<Json<UninstallResponse>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;
    require_role(&ctx, "admin")?;

    let outcome = {
        let marketplace = state.marketplace.lock().unwrap();
        marketplace.uninstall(&params.name)
    };
    if outcome.status == "error" {
        return Err(GatewayError::BadRequest(outcome.message));
    }
    let _ = state.tools.reload_if_changed().await;
    Ok(Json(UninstallResponse { status: outcome.status, message: outcome.message }))
}
