use axum::http::{header, HeaderMap};

use flux_auth::{resolve_unified, Credential, UserContext};
use flux_core::config::AuthMode;

use crate::error::GatewayError;
use crate::state::AppState;

pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn dashboard_token_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-flux-dashboard-token").and_then(|v| v.to_str().ok())
}

/// Resolves the caller's identity following a fixed precedence chain:
/// disabled auth short-circuits, then JWT, then API key, then the
/// shared dashboard secret.
pub fn authenticate(state: &AppState, headers: &HeaderMap, interface: &str) -> Result<UserContext, GatewayError> {
    let auth_enabled = state.config.gateway.auth.mode != AuthMode::None;
    let source_ip = client_ip(headers);

    let credential = match bearer_token(headers) {
        Some(token) => Some(Credential::Bearer(token)),
        None => dashboard_token_header(headers).map(Credential::DashboardToken),
    };

    resolve_unified(
        &state.auth,
        state.jwt.as_ref(),
        state.dashboard_token.as_deref(),
        auth_enabled,
        credential,
        interface,
        &source_ip,
    )
    .ok_or(GatewayError::Unauthorized)
}

pub fn require_role(ctx: &UserContext, role: &str) -> Result<(), GatewayError> {
    if ctx.meets_role(role) {
        Ok(())
    } else {
        Err(GatewayError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn client_ip_takes_first_forwarded_hop() {
        let headers = headers_with(&[("x-forwarded-for", "203.0.113.4, 10.0.0.1")]);
        assert_eq!(client_ip(&headers), "203.0.113.4");
    }

    #[test]
    fn client_ip_defaults_when_absent() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn bearer_token_strips_prefix() {
        let headers = headers_with(&[("authorization", "Bearer abc.def")]);
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn bearer_token_absent_without_prefix() {
        let headers = headers_with(&[("authorization", "Basic xyz")]);
        assert_eq!(bearer_token(&headers), None);
    }
}
