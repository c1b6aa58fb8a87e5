use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::state::AppState;

const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    api_key: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    expires_in: i64,
}

pub async fn token_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, GatewayError> {
    if req.api_key.trim().is_empty() {
        return Err(GatewayError::BadRequest("api_key is required".to_string()));
    }
    let jwt = state.jwt.as_ref().ok_or(GatewayError::NotImplemented)?;

    let user = state
        .auth
        .store()
        .authenticate_api_key(&req.api_key)?
        .filter(|u| u.is_active)
        .ok_or(GatewayError::Unauthorized)?;

    let access_token = jwt.create_access_token(&user.id, &user.username, &user.role, ACCESS_TOKEN_TTL_SECS);
    let refresh_token = jwt.create_refresh_token();
    let expires_at = (Utc::now() + Duration::days(REFRESH_TOKEN_TTL_DAYS)).to_rfc3339();
    state
        .auth
        .store()
        .store_refresh_token(&user.id, &hash_refresh_token(&refresh_token), &expires_at)?;

    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: ACCESS_TOKEN_TTL_SECS,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
}

pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, GatewayError> {
    let jwt = state.jwt.as_ref().ok_or(GatewayError::Unauthorized)?;
    let info = state
        .auth
        .store()
        .validate_refresh_token(&hash_refresh_token(&req.refresh_token))?
        .ok_or(GatewayError::Unauthorized)?;

    let access_token = jwt.create_access_token(&info.user_id, &info.username, &info.role, ACCESS_TOKEN_TTL_SECS);

    Ok(Json(RefreshResponse {
        access_token,
        token_type: "Bearer",
        expires_in: ACCESS_TOKEN_TTL_SECS,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    status: &'static str,
}

pub async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, GatewayError> {
    let hash = hash_refresh_token(&req.refresh_token);
    let info = state.auth.store().validate_refresh_token(&hash)?.ok_or(GatewayError::NotFound)?;

    let revoked = state.auth.store().revoke_refresh_token(&hash, &info.user_id)?;
    if !revoked {
        return Err(GatewayError::NotFound);
    }

    Ok(Json(RevokeResponse { status: "revoked" }))
}
