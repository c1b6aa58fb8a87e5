use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use flux_webhooks::Webhook;

use crate::auth_ctx::authenticate;
use crate::error::GatewayError;
use crate::state::AppState;

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Webhook>>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;
    Ok(Json(state.webhooks.list_webhooks(&ctx.user_id)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    url: String,
    events: Vec<String>,
    secret: Option<String>,
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<Json<Webhook>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;
    if req.url.trim().is_empty() {
        return Err(GatewayError::BadRequest("url is required".to_string()));
    }
    let webhook = state.webhooks.create_webhook(&ctx.user_id, &req.url, req.events, req.secret)?;
    Ok(Json(webhook))
}

#[derive(serde::Serialize)]
pub struct DeleteWebhookResponse {
    status: &'static str,
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteWebhookResponse>, GatewayError> {
    let ctx = authenticate(&state, &headers, "http")?;
    let deleted = state.webhooks.delete_webhook(&id, &ctx.user_id)?;
    if !deleted {
        return Err(GatewayError::NotFound);
    }
    Ok(Json(DeleteWebhookResponse { status: "deleted" }))
}
