use std::sync::Mutex;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub message_id: i64,
    pub conversation_id: String,
    pub role: String,
    pub snippet: String,
    pub rank: f64,
    pub created_at: String,
}

/// Full-text search over message content. Uses `messages_fts`/`bm25()`
/// when FTS5 is available, otherwise falls back to a `LIKE` scan (spec
/// §4.8). The fallback can't rank by relevance so it orders by recency
/// and reports `rank = 0.0`.
pub struct SearchIndex {
    conn: Mutex<rusqlite::Connection>,
    fts_available: bool,
}

impl SearchIndex {
    pub fn new(conn: rusqlite::Connection, fts_available: bool) -> Self {
        Self {
            conn: Mutex::new(conn),
            fts_available,
        }
    }

    pub fn search(&self, query: &str, conversation_id: Option<&str>, limit: i64) -> Result<Vec<SearchHit>> {
        if self.fts_available {
            self.search_fts(query, conversation_id, limit)
        } else {
            self.search_like(query, conversation_id, limit)
        }
    }

    fn search_fts(&self, query: &str, conversation_id: Option<&str>, limit: i64) -> Result<Vec<SearchHit>> {
        let conn = self.conn.lock().unwrap();
        let sql = match conversation_id {
            Some(_) => {
                "SELECT m.id, m.conversation_id, m.role, m.content_json, m.created_at, bm25(messages_fts) AS score
                 FROM messages_fts
                 JOIN messages m ON m.id = messages_fts.rowid
                 WHERE messages_fts MATCH ?1 AND m.conversation_id = ?2
                 ORDER BY score LIMIT ?3"
            }
            None => {
                "SELECT m.id, m.conversation_id, m.role, m.content_json, m.created_at, bm25(messages_fts) AS score
                 FROM messages_fts
                 JOIN messages m ON m.id = messages_fts.rowid
                 WHERE messages_fts MATCH ?1
                 ORDER BY score LIMIT ?2"
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<SearchHit> {
            let content_json: String = row.get(3)?;
            let score: f64 = row.get(5)?;
            Ok(SearchHit {
                message_id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: row.get(2)?,
                snippet: extract_snippet(&content_json, query),
                rank: score.abs(),
                created_at: row.get(4)?,
            })
        };

        let hits = match conversation_id {
            Some(cid) => stmt
                .query_map(params![query, cid, limit], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![query, limit], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(hits)
    }

    fn search_like(&self, query: &str, conversation_id: Option<&str>, limit: i64) -> Result<Vec<SearchHit>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));

        let sql = match conversation_id {
            Some(_) => {
                "SELECT id, conversation_id, role, content_json, created_at FROM messages
                 WHERE content_json LIKE ?1 ESCAPE '\\' AND conversation_id = ?2
                 ORDER BY created_at DESC LIMIT ?3"
            }
            None => {
                "SELECT id, conversation_id, role, content_json, created_at FROM messages
                 WHERE content_json LIKE ?1 ESCAPE '\\'
                 ORDER BY created_at DESC LIMIT ?2"
            }
        };

        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<SearchHit> {
            let content_json: String = row.get(3)?;
            Ok(SearchHit {
                message_id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: row.get(2)?,
                snippet: extract_snippet(&content_json, query),
                rank: 0.0,
                created_at: row.get(4)?,
            })
        };

        let hits = match conversation_id {
            Some(cid) => stmt
                .query_map(params![pattern, cid, limit], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![pattern, limit], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(hits)
    }
}

/// Extracts a ±100 char window around the first case-insensitive hit,
/// ellipsised at truncation boundaries. Falls back to the first 200
/// chars if the term isn't present in the raw content (e.g. JSON
/// structural noise matched it).
fn extract_snippet(content_json: &str, query: &str) -> String {
    const WINDOW: usize = 100;
    let lower_content = content_json.to_lowercase();
    let lower_query = query.to_lowercase();

    match lower_content.find(&lower_query) {
        Some(byte_pos) => {
            let start = byte_pos.saturating_sub(WINDOW);
            let end = (byte_pos + lower_query.len() + WINDOW).min(content_json.len());

            let start = floor_char_boundary(content_json, start);
            let end = ceil_char_boundary(content_json, end);

            let mut snippet = String::new();
            if start > 0 {
                snippet.push_str("...");
            }
            snippet.push_str(&content_json[start..end]);
            if end < content_json.len() {
                snippet.push_str("...");
            }
            snippet
        }
        None => {
            let end = ceil_char_boundary(content_json, content_json.len().min(200));
            content_json[..end].to_string()
        }
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    #[test]
    fn like_fallback_finds_substring() {
        let dir = tempdir().unwrap();
        let conn = db::open(dir.path().join("search.db")).unwrap();
        conn.execute(
            "INSERT INTO conversations (id, interface, user_id, created_at, updated_at, metadata_json)
             VALUES ('c1', 'cli', 'u1', '2026-01-01', '2026-01-01', '{}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content_json, token_count, created_at)
             VALUES ('c1', 'user', '\"the quick brown fox jumps\"', 5, '2026-01-01')",
            [],
        )
        .unwrap();

        let index = SearchIndex::new(conn, false);
        let hits = index.search("quick brown", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("quick brown"));
        assert_eq!(hits[0].rank, 0.0);
    }

    #[test]
    fn snippet_falls_back_to_prefix_when_term_not_in_raw_json() {
        let snippet = extract_snippet("[\"segment one\", \"segment two\"]", "notfound");
        assert!(snippet.starts_with("[\"segment"));
    }
}
