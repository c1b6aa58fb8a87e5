pub mod admin;
pub mod auth;
pub mod chat;
pub mod health;
pub mod metrics;
pub mod tools;
pub mod webhooks;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

fn build_cors(allow_origin: &Option<String>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(86400));

    match allow_origin {
        Some(origin) if origin != "*" => layer.allow_origin(origin.parse::<axum::http::HeaderValue>().unwrap()),
        _ => layer.allow_origin(Any),
    }
}

/// Builds the full router: the `/api` and `/api/v1` aliases share one
/// route table, since every endpoint is reachable under both prefixes
/// (an axum `Router` has no single `merge`-under-two-prefixes
/// primitive, so the same handlers are nested twice under a `.clone()`d
/// sub-router instead).
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = build_cors(&state.config.gateway.cors_allow_origin);

    let api = Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/chat/stream", post(chat::chat_stream_handler))
        .route("/auth/token", post(auth::token_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/revoke", post(auth::revoke_handler))
        .route("/webhooks", get(webhooks::list_handler).post(webhooks::create_handler))
        .route("/webhooks/:id", delete(webhooks::delete_handler))
        .route("/admin/backup", post(admin::backup_handler))
        .route("/admin/restore", post(admin::restore_handler))
        .route(
            "/tools",
            get(tools::search_handler).post(tools::install_handler).delete(tools::uninstall_handler),
        );

    Router::new()
        .nest("/api", api.clone())
        .nest("/api/v1", api)
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
