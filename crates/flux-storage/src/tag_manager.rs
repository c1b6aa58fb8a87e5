use std::sync::Mutex;

use chrono::Utc;
use rusqlite::params;

use crate::error::Result;

pub enum TagOutcome {
    Added,
    AlreadyTagged,
}

/// Tag CRUD over `conversation_tags`. Tags are normalized
/// to lowercase + trimmed before storage so `"Work"` and `" work "`
/// collide on the same tag.
pub struct TagManager {
    conn: Mutex<rusqlite::Connection>,
}

impl TagManager {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn add_tag(&self, conversation_id: &str, tag: &str) -> Result<TagOutcome> {
        let tag = normalize(tag);
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            "INSERT OR IGNORE INTO conversation_tags (conversation_id, tag, created_at) VALUES (?1, ?2, ?3)",
            params![conversation_id, tag, now],
        )?;

        Ok(if affected > 0 {
            TagOutcome::Added
        } else {
            TagOutcome::AlreadyTagged
        })
    }

    pub fn remove_tag(&self, conversation_id: &str, tag: &str) -> Result<bool> {
        let tag = normalize(tag);
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "DELETE FROM conversation_tags WHERE conversation_id = ?1 AND tag = ?2",
            params![conversation_id, tag],
        )?;
        Ok(affected > 0)
    }

    pub fn get_tags(&self, conversation_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tag FROM conversation_tags WHERE conversation_id = ?1 ORDER BY tag ASC",
        )?;
        let tags = stmt
            .query_map(params![conversation_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    pub fn list_all_tags(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT tag FROM conversation_tags ORDER BY tag ASC")?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    pub fn find_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let tag = normalize(tag);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT conversation_id FROM conversation_tags WHERE tag = ?1 ORDER BY created_at DESC",
        )?;
        let ids = stmt
            .query_map(params![tag], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

fn normalize(tag: &str) -> String {
    tag.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    fn conn_with_conversation(dir: &tempfile::TempDir) -> rusqlite::Connection {
        let conn = db::open(dir.path().join("tags.db")).unwrap();
        conn.execute(
            "INSERT INTO conversations (id, interface, user_id, created_at, updated_at, metadata_json)
             VALUES ('c1', 'cli', 'u1', '2026-01-01', '2026-01-01', '{}')",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn add_tag_normalizes_and_dedupes() {
        let dir = tempdir().unwrap();
        let mgr = TagManager::new(conn_with_conversation(&dir));

        assert!(matches!(mgr.add_tag("c1", " Work ").unwrap(), TagOutcome::Added));
        assert!(matches!(mgr.add_tag("c1", "work").unwrap(), TagOutcome::AlreadyTagged));
        assert_eq!(mgr.get_tags("c1").unwrap(), vec!["work".to_string()]);
    }

    #[test]
    fn find_by_tag_returns_matching_conversations() {
        let dir = tempdir().unwrap();
        let mgr = TagManager::new(conn_with_conversation(&dir));
        mgr.add_tag("c1", "urgent").unwrap();
        assert_eq!(mgr.find_by_tag("URGENT").unwrap(), vec!["c1".to_string()]);
        assert!(mgr.find_by_tag("nope").unwrap().is_empty());
    }
}
