use std::sync::Arc;

use flux_audit::{AuditLog, Severity};
use flux_auth::{AuthAuditSink, AuthEvent};
use serde_json::json;

/// Bridges `flux_auth`'s audit callback trait into `flux_audit`'s store,
/// the one-directional notification the trait's own doc comment calls
/// for rather than a direct crate dependency from `flux-auth`.
pub struct GatewayAuditSink {
    pub log: Arc<AuditLog>,
}

impl AuthAuditSink for GatewayAuditSink {
    fn record(&self, event: AuthEvent<'_>, interface: &str, source_ip: &str) {
        let (event_type, user_id, details, severity) = match event {
            AuthEvent::Success { user_id, username, role } => (
                "auth_success",
                Some(user_id),
                json!({ "username": username, "role": role }),
                Severity::Info,
            ),
            AuthEvent::Failure { reason, user_id, username } => (
                "auth_failure",
                user_id,
                json!({ "reason": reason.as_str(), "username": username }),
                Severity::Warning,
            ),
        };

        if let Err(err) = self
            .log
            .record(event_type, user_id, Some(source_ip), Some(interface), &details, severity)
        {
            tracing::warn!(error = %err, "failed to record auth audit event");
        }
    }
}
