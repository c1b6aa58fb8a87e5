use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub user_id: String,
    pub url: String,
    pub events: Vec<String>,
    pub secret: String,
    pub is_active: bool,
    pub failure_count: i64,
    pub max_retries: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Webhook {
    /// An empty `events` list means "subscribe to all event types"
    /// (teacher's `WebhookStore.get_active_webhooks` semantics).
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event_type)
    }
}

/// SQLite-backed webhook registration + delivery log, grounded on
/// `original_source/openclaw/webhook.py`'s `WebhookStore`.
pub struct WebhookStore {
    conn: Mutex<rusqlite::Connection>,
}

impl WebhookStore {
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
            "CREATE TABLE IF NOT EXISTS webhooks (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                url             TEXT NOT NULL,
                events          TEXT NOT NULL DEFAULT '[]',
                secret          TEXT NOT NULL,
                is_active       INTEGER NOT NULL DEFAULT 1,
                failure_count   INTEGER NOT NULL DEFAULT 0,
                max_retries     INTEGER NOT NULL DEFAULT 3,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhooks_user ON webhooks(user_id);
            CREATE INDEX IF NOT EXISTS idx_webhooks_active ON webhooks(is_active);

            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                webhook_id      TEXT NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
                event_type      TEXT NOT NULL,
                payload_json    TEXT NOT NULL,
                response_status INTEGER,
                response_body   TEXT NOT NULL DEFAULT '',
                attempt         INTEGER NOT NULL DEFAULT 1,
                delivered_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_deliveries_webhook ON webhook_deliveries(webhook_id, delivered_at DESC);",
        )?;
        Ok(())
    }

    pub fn create_webhook(&self, user_id: &str, url: &str, events: Vec<String>, secret: Option<String>) -> Result<Webhook> {
        let webhook_id = Uuid::new_v4().to_string();
        let secret = secret.unwrap_or_else(|| hex::encode(rand::random::<[u8; 32]>()));
        let now = Utc::now().to_rfc3339();
        let events_json = serde_json::to_string(&events)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO webhooks (id, user_id, url, events, secret, is_active, failure_count, max_retries, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, 3, ?6, ?6)",
            params![webhook_id, user_id, url, events_json, secret, now],
        )?;

        Ok(Webhook {
            id: webhook_id,
            user_id: user_id.to_string(),
            url: url.to_string(),
            events,
            secret,
            is_active: true,
            failure_count: 0,
            max_retries: 3,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn list_webhooks(&self, user_id: &str) -> Result<Vec<Webhook>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM webhooks WHERE user_id = ?1 AND is_active = 1 ORDER BY created_at DESC",
        )?;
        let webhooks = stmt
            .query_map(params![user_id], row_to_webhook)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(webhooks)
    }

    pub fn get_webhook(&self, webhook_id: &str) -> Result<Option<Webhook>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM webhooks WHERE id = ?1", params![webhook_id], row_to_webhook)
            .optional()
            .map_err(crate::error::WebhookError::from)
    }

    pub fn delete_webhook(&self, webhook_id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let affected = conn.execute(
            "UPDATE webhooks SET is_active = 0, updated_at = ?1 WHERE id = ?2 AND user_id = ?3 AND is_active = 1",
            params![now, webhook_id, user_id],
        )?;
        Ok(affected > 0)
    }

    pub fn get_active_webhooks(&self, event_type: &str) -> Result<Vec<Webhook>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM webhooks WHERE is_active = 1")?;
        let webhooks = stmt
            .query_map([], row_to_webhook)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(webhooks.into_iter().filter(|w| w.subscribes_to(event_type)).collect())
    }

    pub fn record_delivery(
        &self,
        webhook_id: &str,
        event_type: &str,
        payload_json: &str,
        response_status: i64,
        response_body: &str,
        attempt: i64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let truncated: String = response_body.chars().take(4096).collect();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO webhook_deliveries (webhook_id, event_type, payload_json, response_status, response_body, attempt, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![webhook_id, event_type, payload_json, response_status, truncated, attempt, now],
        )?;
        Ok(())
    }

    pub fn increment_failure(&self, webhook_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE webhooks SET failure_count = failure_count + 1, updated_at = ?1 WHERE id = ?2",
            params![now, webhook_id],
        )?;
        conn.execute(
            "UPDATE webhooks SET is_active = 0, updated_at = ?1 WHERE id = ?2 AND failure_count > max_retries",
            params![now, webhook_id],
        )?;
        Ok(())
    }

    pub fn reset_failure(&self, webhook_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE webhooks SET failure_count = 0, updated_at = ?1 WHERE id = ?2",
            params![now, webhook_id],
        )?;
        Ok(())
    }
}

fn row_to_webhook(row: &rusqlite::Row) -> rusqlite::Result<Webhook> {
    let events_json: String = row.get("events")?;
    Ok(Webhook {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        url: row.get("url")?,
        events: serde_json::from_str(&events_json).unwrap_or_default(),
        secret: row.get("secret")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        failure_count: row.get("failure_count")?,
        max_retries: row.get("max_retries")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_list_webhooks() {
        let store = WebhookStore::in_memory().unwrap();
        store.create_webhook("u1", "https://example.com/hook", vec!["chat.completed".to_string()], None).unwrap();
        let listed = store.list_webhooks("u1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].secret.len(), 64);
    }

    #[test]
    fn empty_events_subscribes_to_everything() {
        let store = WebhookStore::in_memory().unwrap();
        let hook = store.create_webhook("u1", "https://example.com", vec![], None).unwrap();
        assert!(hook.subscribes_to("anything.at.all"));
    }

    #[test]
    fn failure_count_deactivates_past_max_retries() {
        let store = WebhookStore::in_memory().unwrap();
        let hook = store.create_webhook("u1", "https://example.com", vec![], None).unwrap();
        for _ in 0..4 {
            store.increment_failure(&hook.id).unwrap();
        }
        let refreshed = store.get_webhook(&hook.id).unwrap().unwrap();
        assert!(!refreshed.is_active);
        assert_eq!(refreshed.failure_count, 4);
    }

    #[test]
    fn delete_requires_ownership() {
        let store = WebhookStore::in_memory().unwrap();
        let hook = store.create_webhook("u1", "https://example.com", vec![], None).unwrap();
        assert!(!store.delete_webhook(&hook.id, "someone-else").unwrap());
        assert!(store.delete_webhook(&hook.id, "u1").unwrap());
    }
}
