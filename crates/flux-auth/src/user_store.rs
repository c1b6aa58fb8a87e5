use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AuthError, Result};

const API_KEY_PREFIX: &str = "flux_";
const API_KEY_TOTAL_LENGTH: usize = 69; // "flux_" + 64 hex chars

const ROLES: &[&str] = &["readonly", "user", "admin"];

fn role_rank(role: &str) -> i32 {
    match role {
        "readonly" => 0,
        "user" => 1,
        "admin" => 2,
        _ => -1,
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub api_key_prefix: String,
    pub max_daily_calls: i64,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub max_daily_calls: i64,
}

impl UserContext {
    pub fn default_user() -> Self {
        Self {
            user_id: "default".to_string(),
            username: "default".to_string(),
            role: "admin".to_string(),
            max_daily_calls: 100,
        }
    }

    pub fn meets_role(&self, required: &str) -> bool {
        role_rank(&self.role) >= role_rank(required)
    }
}

pub struct RefreshTokenInfo {
    pub user_id: String,
    pub username: String,
    pub role: String,
}

fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

fn generate_api_key() -> (String, String, String) {
    let bytes: [u8; 32] = rand::random();
    let hex_token = hex::encode(bytes);
    let raw_key = format!("{API_KEY_PREFIX}{hex_token}");
    let key_hash = hash_api_key(&raw_key);
    let key_prefix = format!("{API_KEY_PREFIX}{}", &hex_token[..8]);
    (raw_key, key_hash, key_prefix)
}

/// SQLite-backed user store, grounded on
/// `original_source/openclaw/auth.py`'s `UserStore`. Key material is
/// never persisted raw — only its SHA-256 digest, with a short
/// display prefix kept alongside for UI purposes.
pub struct UserStore {
    conn: Mutex<rusqlite::Connection>,
}

impl UserStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id              TEXT PRIMARY KEY,
                username        TEXT UNIQUE NOT NULL,
                display_name    TEXT NOT NULL DEFAULT '',
                role            TEXT NOT NULL DEFAULT 'user',
                api_key_hash    TEXT NOT NULL,
                api_key_prefix  TEXT NOT NULL,
                max_daily_calls INTEGER NOT NULL DEFAULT 100,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_api_key_hash ON users(api_key_hash);
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

            CREATE TABLE IF NOT EXISTS refresh_tokens (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token_hash  TEXT NOT NULL UNIQUE,
                expires_at  TEXT NOT NULL,
                revoked     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_refresh_tokens_hash ON refresh_tokens(token_hash);
            CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id);",
        )?;
        Ok(())
    }

    pub fn create_user(&self, username: &str, role: &str, display_name: &str, max_daily_calls: i64) -> Result<(User, String)> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        if !ROLES.contains(&role) {
            return Err(AuthError::InvalidRole(role.to_string()));
        }

        let user_id = Uuid::new_v4().to_string();
        let (raw_key, key_hash, key_prefix) = generate_api_key();
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, username, display_name, role, api_key_hash, api_key_prefix,
                                 max_daily_calls, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)",
            params![user_id, username, display_name, role, key_hash, key_prefix, max_daily_calls, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref sqlite_err, _)
                if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AuthError::DuplicateUsername(username.to_string())
            }
            other => AuthError::Db(other),
        })?;

        Ok((
            User {
                id: user_id,
                username: username.to_string(),
                display_name: display_name.to_string(),
                role: role.to_string(),
                api_key_prefix: key_prefix,
                max_daily_calls,
                is_active: true,
                created_at: now.clone(),
                updated_at: now,
            },
            raw_key,
        ))
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![user_id], row_to_user)
            .optional()
            .map_err(AuthError::from)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE username = ?1", params![username], row_to_user)
            .optional()
            .map_err(AuthError::from)
    }

    /// Constant-time hash comparison is unnecessary here since we're
    /// comparing SHA-256 digests via an equality query against an
    /// indexed column, not branching on a raw secret byte-by-byte.
    pub fn authenticate_api_key(&self, api_key: &str) -> Result<Option<User>> {
        if api_key.is_empty() || !api_key.starts_with(API_KEY_PREFIX) || api_key.len() != API_KEY_TOTAL_LENGTH {
            return Ok(None);
        }
        let provided_hash = hash_api_key(api_key);
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM users WHERE api_key_hash = ?1 AND is_active = 1",
            params![provided_hash],
            row_to_user,
        )
        .optional()
        .map_err(AuthError::from)
    }

    pub fn list_users(&self, limit: i64) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM users WHERE is_active = 1 ORDER BY created_at DESC LIMIT ?1")?;
        let users = stmt
            .query_map(params![limit], row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn deactivate_user(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let affected = conn.execute(
            "UPDATE users SET is_active = 0, updated_at = ?1 WHERE id = ?2 AND is_active = 1",
            params![now, user_id],
        )?;
        Ok(affected > 0)
    }

    /// Rotates atomically: the old hash is replaced by a single UPDATE, so
    /// in-flight requests authenticated before this call keep succeeding
    /// only until their already-resolved `UserContext` is discarded —
    /// there is no re-check mid-request.
    pub fn rotate_api_key(&self, user_id: &str) -> Result<Option<(User, String)>> {
        let (raw_key, key_hash, key_prefix) = generate_api_key();
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE users SET api_key_hash = ?1, api_key_prefix = ?2, updated_at = ?3 WHERE id = ?4 AND is_active = 1",
            params![key_hash, key_prefix, now, user_id],
        )?;
        if affected == 0 {
            return Ok(None);
        }
        drop(conn);
        let user = self.get_user(user_id)?;
        Ok(user.map(|u| (u, raw_key)))
    }

    pub fn store_refresh_token(&self, user_id: &str, token_hash: &str, expires_at: &str) -> Result<String> {
        let token_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![token_id, user_id, token_hash, expires_at, now],
        )?;
        Ok(token_id)
    }

    pub fn validate_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenInfo>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT rt.user_id, rt.expires_at, u.username, u.role
                 FROM refresh_tokens rt JOIN users u ON rt.user_id = u.id
                 WHERE rt.token_hash = ?1 AND rt.revoked = 0 AND u.is_active = 1",
                params![token_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((user_id, expires_at, username, role)) = row else {
            return Ok(None);
        };
        if expires_at < Utc::now().to_rfc3339() {
            return Ok(None);
        }
        Ok(Some(RefreshTokenInfo { user_id, username, role }))
    }

    pub fn revoke_refresh_token(&self, token_hash: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1 AND user_id = ?2",
            params![token_hash, user_id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        role: row.get("role")?,
        api_key_prefix: row.get("api_key_prefix")?,
        max_daily_calls: row.get("max_daily_calls")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_authenticate_round_trips() {
        let store = UserStore::in_memory().unwrap();
        let (user, raw_key) = store.create_user("alice", "admin", "Alice", 200).unwrap();
        assert!(raw_key.starts_with(API_KEY_PREFIX));
        assert_eq!(raw_key.len(), API_KEY_TOTAL_LENGTH);

        let authed = store.authenticate_api_key(&raw_key).unwrap().unwrap();
        assert_eq!(authed.id, user.id);
    }

    #[test]
    fn deactivated_user_fails_authentication() {
        let store = UserStore::in_memory().unwrap();
        let (user, raw_key) = store.create_user("bob", "user", "", 100).unwrap();
        store.deactivate_user(&user.id).unwrap();
        assert!(store.authenticate_api_key(&raw_key).unwrap().is_none());
    }

    #[test]
    fn rotate_api_key_invalidates_old_key() {
        let store = UserStore::in_memory().unwrap();
        let (user, old_key) = store.create_user("carol", "user", "", 100).unwrap();
        let (_, new_key) = store.rotate_api_key(&user.id).unwrap().unwrap();

        assert!(store.authenticate_api_key(&old_key).unwrap().is_none());
        assert!(store.authenticate_api_key(&new_key).unwrap().is_some());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = UserStore::in_memory().unwrap();
        store.create_user("dupe", "user", "", 100).unwrap();
        let err = store.create_user("dupe", "user", "", 100).unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUsername(_)));
    }

    #[test]
    fn refresh_token_round_trips_and_revokes() {
        let store = UserStore::in_memory().unwrap();
        let (user, _) = store.create_user("dave", "user", "", 100).unwrap();
        let expires = (Utc::now() + chrono::Duration::days(7)).to_rfc3339();
        store.store_refresh_token(&user.id, "hash123", &expires).unwrap();

        let info = store.validate_refresh_token("hash123").unwrap().unwrap();
        assert_eq!(info.user_id, user.id);

        assert!(store.revoke_refresh_token("hash123", &user.id).unwrap());
        assert!(store.validate_refresh_token("hash123").unwrap().is_none());
    }
}
