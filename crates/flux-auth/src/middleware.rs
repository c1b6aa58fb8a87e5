use crate::jwt::JwtManager;
use crate::user_store::{User, UserContext, UserStore};

/// Reasons an authentication attempt was rejected, surfaced to the
/// audit log rather than to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    EmptyToken,
    InvalidKey,
    Deactivated,
}

impl AuthFailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyToken => "empty_token",
            Self::InvalidKey => "invalid_key",
            Self::Deactivated => "deactivated",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AuthEvent<'a> {
    Success { user_id: &'a str, username: &'a str, role: &'a str },
    Failure { reason: AuthFailureReason, user_id: Option<&'a str>, username: Option<&'a str> },
}

/// Callback invoked for every authentication attempt so the caller can
/// forward it into `flux-audit`. Kept as a trait rather than a concrete
/// `AuditLog` dependency so `flux-auth` doesn't need to depend on
/// `flux-audit` for a one-directional notification.
pub trait AuthAuditSink {
    fn record(&self, event: AuthEvent<'_>, interface: &str, source_ip: &str);
}

impl<F: Fn(AuthEvent<'_>, &str, &str)> AuthAuditSink for F {
    fn record(&self, event: AuthEvent<'_>, interface: &str, source_ip: &str) {
        self(event, interface, source_ip)
    }
}

pub struct NullAuditSink;
impl AuthAuditSink for NullAuditSink {
    fn record(&self, _event: AuthEvent<'_>, _interface: &str, _source_ip: &str) {}
}

/// Resolves a raw API key (or, via `authenticate_unified`, any of the
/// precedence chain's bearer forms) into a `UserContext`. Grounded on
/// `original_source/openclaw/auth.py`'s `AuthMiddleware`.
pub struct AuthMiddleware<A: AuthAuditSink> {
    store: UserStore,
    audit: A,
}

impl<A: AuthAuditSink> AuthMiddleware<A> {
    pub fn new(store: UserStore, audit: A) -> Self {
        Self { store, audit }
    }

    pub fn authenticate(&self, token_or_api_key: &str, interface: &str, source_ip: &str) -> Option<UserContext> {
        if token_or_api_key.is_empty() {
            self.audit.record(
                AuthEvent::Failure { reason: AuthFailureReason::EmptyToken, user_id: None, username: None },
                interface,
                source_ip,
            );
            return None;
        }

        let user = match self.store.authenticate_api_key(token_or_api_key) {
            Ok(Some(user)) => user,
            Ok(None) => {
                self.audit.record(
                    AuthEvent::Failure { reason: AuthFailureReason::InvalidKey, user_id: None, username: None },
                    interface,
                    source_ip,
                );
                return None;
            }
            Err(_) => {
                self.audit.record(
                    AuthEvent::Failure { reason: AuthFailureReason::InvalidKey, user_id: None, username: None },
                    interface,
                    source_ip,
                );
                return None;
            }
        };

        if !user.is_active {
            self.audit.record(
                AuthEvent::Failure {
                    reason: AuthFailureReason::Deactivated,
                    user_id: Some(&user.id),
                    username: Some(&user.username),
                },
                interface,
                source_ip,
            );
            return None;
        }

        self.audit.record(
            AuthEvent::Success { user_id: &user.id, username: &user.username, role: &user.role },
            interface,
            source_ip,
        );

        Some(to_context(&user))
    }

    pub fn require_role(&self, ctx: &UserContext, required_role: &str) -> bool {
        ctx.meets_role(required_role)
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }
}

fn to_context(user: &User) -> UserContext {
    UserContext {
        user_id: user.id.clone(),
        username: user.username.clone(),
        role: user.role.clone(),
        max_daily_calls: user.max_daily_calls,
    }
}

/// Input to the unified precedence resolver: whatever showed up on
/// the wire, in whatever form the interface received it.
pub enum Credential<'a> {
    Bearer(&'a str),
    DashboardToken(&'a str),
}

/// Implements the precedence chain exactly: disabled auth short-circuits
/// before any token is even inspected; otherwise JWT is tried first
/// (since a JWT needs no store round-trip), then API key, then the
/// shared dashboard secret. First success wins.
pub fn resolve_unified<A: AuthAuditSink>(
    middleware: &AuthMiddleware<A>,
    jwt: Option<&JwtManager>,
    dashboard_token: Option<&str>,
    auth_enabled: bool,
    credential: Option<Credential<'_>>,
    interface: &str,
    source_ip: &str,
) -> Option<UserContext> {
    if !auth_enabled {
        return Some(UserContext::default_user());
    }

    match credential {
        Some(Credential::Bearer(token)) => {
            if let Some(jwt) = jwt {
                if let Some(claims) = jwt.verify(token) {
                    return Some(UserContext {
                        user_id: claims.sub,
                        username: claims.username,
                        role: claims.role,
                        max_daily_calls: 100,
                    });
                }
            }
            if token.starts_with("flux_") {
                return middleware.authenticate(token, interface, source_ip);
            }
            None
        }
        Some(Credential::DashboardToken(provided)) => {
            let expected = dashboard_token?;
            if provided == expected {
                Some(UserContext {
                    user_id: "dashboard".to_string(),
                    username: "dashboard".to_string(),
                    role: "admin".to_string(),
                    max_daily_calls: i64::MAX,
                })
            } else {
                None
            }
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl AuthAuditSink for RecordingSink {
        fn record(&self, event: AuthEvent<'_>, _interface: &str, _source_ip: &str) {
            let label = match event {
                AuthEvent::Success { .. } => "auth_success".to_string(),
                AuthEvent::Failure { reason, .. } => format!("auth_failure:{}", reason.as_str()),
            };
            self.events.lock().unwrap().push(label);
        }
    }

    #[test]
    fn empty_token_is_rejected_and_audited() {
        let store = UserStore::in_memory().unwrap();
        let sink = RecordingSink { events: Mutex::new(Vec::new()) };
        let mw = AuthMiddleware::new(store, sink);

        assert!(mw.authenticate("", "cli", "127.0.0.1").is_none());
        assert_eq!(mw.audit.events.lock().unwrap().as_slice(), ["auth_failure:empty_token"]);
    }

    #[test]
    fn valid_key_authenticates_and_audits_success() {
        let store = UserStore::in_memory().unwrap();
        let (_, raw_key) = store.create_user("alice", "user", "", 100).unwrap();
        let sink = RecordingSink { events: Mutex::new(Vec::new()) };
        let mw = AuthMiddleware::new(store, sink);

        let ctx = mw.authenticate(&raw_key, "cli", "127.0.0.1").unwrap();
        assert_eq!(ctx.username, "alice");
        assert_eq!(mw.audit.events.lock().unwrap().as_slice(), ["auth_success"]);
    }

    #[test]
    fn disabled_auth_yields_default_user_without_lookup() {
        let store = UserStore::in_memory().unwrap();
        let mw = AuthMiddleware::new(store, NullAuditSink);
        let ctx = resolve_unified(&mw, None, None, false, None, "cli", "127.0.0.1").unwrap();
        assert_eq!(ctx.user_id, "default");
    }

    #[test]
    fn dashboard_token_matches_shared_secret() {
        let store = UserStore::in_memory().unwrap();
        let mw = AuthMiddleware::new(store, NullAuditSink);
        let ctx = resolve_unified(
            &mw,
            None,
            Some("shared-secret"),
            true,
            Some(Credential::DashboardToken("shared-secret")),
            "dashboard",
            "127.0.0.1",
        )
        .unwrap();
        assert_eq!(ctx.role, "admin");
    }
}
