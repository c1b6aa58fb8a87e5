use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Maps the internal error taxonomy onto the HTTP contract. Handlers
/// return `Result<_, GatewayError>` and let this `IntoResponse`
/// impl pick the status code; it never leaks internal error detail for
/// the 500 branch.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("not implemented")]
    NotImplemented,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<flux_core::FluxError> for GatewayError {
    fn from(e: flux_core::FluxError) -> Self {
        match e {
            flux_core::FluxError::AuthFailure => GatewayError::Unauthorized,
            flux_core::FluxError::AuthzDenied { .. } => GatewayError::Forbidden,
            flux_core::FluxError::RateLimited { retry_after_secs } => {
                GatewayError::RateLimited { retry_after_secs }
            }
            flux_core::FluxError::NotFound(_) => GatewayError::NotFound,
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<flux_storage::StorageError> for GatewayError {
    fn from(e: flux_storage::StorageError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

impl From<flux_auth::AuthError> for GatewayError {
    fn from(e: flux_auth::AuthError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

impl From<flux_webhooks::WebhookError> for GatewayError {
    fn from(e: flux_webhooks::WebhookError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

impl From<flux_backup::BackupError> for GatewayError {
    fn from(e: flux_backup::BackupError) -> Self {
        match e {
            flux_backup::BackupError::ArchiveInvalid(msg) => GatewayError::BadRequest(msg),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<flux_scheduler::SchedulerError> for GatewayError {
    fn from(e: flux_scheduler::SchedulerError) -> Self {
        match e {
            flux_scheduler::SchedulerError::JobNotFound { .. } => GatewayError::NotFound,
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            GatewayError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let GatewayError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = GatewayError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "42");
    }

    #[test]
    fn internal_errors_never_leak_detail() {
        let response = GatewayError::Internal("connection string: secret".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn auth_failure_maps_to_unauthorized() {
        let err: GatewayError = flux_core::FluxError::AuthFailure.into();
        assert!(matches!(err, GatewayError::Unauthorized));
    }
}
