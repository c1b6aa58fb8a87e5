use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque principal identifier. Time-sortable (UUIDv7) so newest users
/// sort last in an index scan without a separate `created_at` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fixed id used when authentication is disabled.
    pub fn default_user() -> Self {
        Self("default".to_string())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ephemeral per-connection identifier (WebSocket, SSE stream, etc).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// `readonly < user < admin`, a strict linear order. The numeric rank
/// is what `require_role` compares; never reorder these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Readonly,
    User,
    Admin,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Readonly => 0,
            Role::User => 1,
            Role::Admin => 2,
        }
    }

    /// Compares ranks; satisfies §4.9's `require_role(ctx, needed)`.
    pub fn satisfies(self, needed: Role) -> bool {
        self.rank() >= needed.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Readonly => "readonly",
            Role::User => "user",
            Role::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(Role::Readonly),
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The request-scoped identity produced by `AuthMiddleware::authenticate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub max_daily_calls: u32,
}

impl UserContext {
    /// Used whenever `auth_enabled = false`.
    pub fn default_user() -> Self {
        Self {
            user_id: "default".to_string(),
            username: "default".to_string(),
            role: Role::Admin,
            max_daily_calls: 100,
        }
    }
}

/// The origin interface a request arrived through; carried on
/// `Conversation` and `AuditEvent` rows, otherwise opaque to the core.
pub type Interface = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_is_linear() {
        assert!(Role::Admin.satisfies(Role::User));
        assert!(Role::Admin.satisfies(Role::Readonly));
        assert!(Role::User.satisfies(Role::User));
        assert!(!Role::User.satisfies(Role::Admin));
        assert!(!Role::Readonly.satisfies(Role::User));
    }

    #[test]
    fn role_roundtrips_through_display_and_fromstr() {
        for r in [Role::Readonly, Role::User, Role::Admin] {
            assert_eq!(r.to_string().parse::<Role>().unwrap(), r);
        }
    }
}
