use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub interface: String,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: Value,
    pub token_count: i64,
    pub created_at: String,
}

/// Relational conversation/message store over a shared SQLite handle.
/// Grounded on `skynet-memory::MemoryManager`'s
/// `Mutex<Connection>` thread-safety pattern.
pub struct ConversationStore {
    conn: Mutex<rusqlite::Connection>,
}

impl ConversationStore {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Creates the conversation if `id` is `None` (lazy creation on
    /// first message) or if the given id doesn't exist yet.
    pub fn create_conversation(&self, id: Option<&str>, interface: &str, user_id: &str) -> Result<ConversationRecord> {
        let conn = self.conn.lock().unwrap();
        let id = id.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, interface, user_id, created_at, updated_at, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?4, '{}')",
            params![id, interface, user_id, now],
        )?;

        conn.query_row(
            "SELECT id, interface, user_id, created_at, updated_at, metadata_json FROM conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .map_err(StorageError::from)
    }

    pub fn add_message(&self, conversation_id: &str, role: &str, content: &Value, token_count: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let content_json = serialize_content(content);

        conn.execute(
            "INSERT INTO messages (conversation_id, role, content_json, token_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![conversation_id, role, content_json, token_count, now],
        )?;
        let message_id = conn.last_insert_rowid();

        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now, conversation_id],
        )?;

        Ok(message_id)
    }

    pub fn get_messages(&self, conversation_id: &str, limit: i64, offset: i64) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content_json, token_count, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![conversation_id, limit, offset], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_conversations(&self, interface: Option<&str>, user_id: Option<&str>, limit: i64) -> Result<Vec<ConversationRecord>> {
        let conn = self.conn.lock().unwrap();

        let rows = match (interface, user_id) {
            (Some(i), Some(u)) => {
                let mut stmt = conn.prepare(
                    "SELECT id, interface, user_id, created_at, updated_at, metadata_json FROM conversations
                     WHERE interface = ?1 AND user_id = ?2 ORDER BY updated_at DESC LIMIT ?3",
                )?;
                stmt.query_map(params![i, u, limit], row_to_conversation)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            (Some(i), None) => {
                let mut stmt = conn.prepare(
                    "SELECT id, interface, user_id, created_at, updated_at, metadata_json FROM conversations
                     WHERE interface = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )?;
                stmt.query_map(params![i, limit], row_to_conversation)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            (None, Some(u)) => {
                let mut stmt = conn.prepare(
                    "SELECT id, interface, user_id, created_at, updated_at, metadata_json FROM conversations
                     WHERE user_id = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )?;
                stmt.query_map(params![u, limit], row_to_conversation)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            (None, None) => {
                let mut stmt = conn.prepare(
                    "SELECT id, interface, user_id, created_at, updated_at, metadata_json FROM conversations
                     ORDER BY updated_at DESC LIMIT ?1",
                )?;
                stmt.query_map(params![limit], row_to_conversation)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    pub fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM conversations WHERE id = ?1", params![conversation_id])?;
        if affected == 0 {
            return Err(StorageError::ConversationNotFound(conversation_id.to_string()));
        }
        Ok(())
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, interface, user_id, created_at, updated_at, metadata_json FROM conversations WHERE id = ?1",
            params![conversation_id],
            row_to_conversation,
        )
        .optional()
        .map_err(StorageError::from)
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}

/// Strings are JSON-encoded strings; lists/maps encode as-is; anything
/// else is stringified.
fn serialize_content(content: &Value) -> String {
    content.to_string()
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<ConversationRecord> {
    let metadata_json: String = row.get(5)?;
    Ok(ConversationRecord {
        id: row.get(0)?,
        interface: row.get(1)?,
        user_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
    let content_json: String = row.get(3)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: serde_json::from_str(&content_json).unwrap_or(Value::Null),
        token_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn create_add_and_list_round_trips() {
        let dir = tempdir().unwrap();
        let conn = db::open(dir.path().join("conversations.db")).unwrap();
        let store = ConversationStore::new(conn);

        let conv = store.create_conversation(None, "cli", "u1").unwrap();
        store.add_message(&conv.id, "user", &json!("hello"), 2).unwrap();
        store.add_message(&conv.id, "assistant", &json!("hi there"), 3).unwrap();

        let messages = store.get_messages(&conv.id, 10, 0).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");

        let listed = store.list_conversations(Some("cli"), None, 10).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn delete_conversation_cascades_messages() {
        let dir = tempdir().unwrap();
        let conn = db::open(dir.path().join("conversations.db")).unwrap();
        let store = ConversationStore::new(conn);

        let conv = store.create_conversation(None, "cli", "u1").unwrap();
        store.add_message(&conv.id, "user", &json!("hi"), 1).unwrap();
        store.delete_conversation(&conv.id).unwrap();

        assert!(store.get_conversation(&conv.id).unwrap().is_none());
    }
}
