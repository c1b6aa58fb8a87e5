pub mod conversation_store;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod retention;
pub mod search_index;
pub mod tag_manager;

pub use conversation_store::{ConversationRecord, ConversationStore, MessageRecord};
pub use error::{Result, StorageError};
pub use knowledge::{DocumentSummary, KnowledgeBase, KnowledgeStats, SearchResult as KnowledgeSearchResult};
pub use retention::{CleanupReport, RetentionCategory, RetentionManager, RetentionPolicy};
pub use search_index::{SearchHit, SearchIndex};
pub use tag_manager::{TagManager, TagOutcome};

use std::path::Path;

/// Brings up a conversation database and the stores layered over it:
/// the `ConversationStore`/`TagManager` always share the connection;
/// `SearchIndex` gets its own handle since `rusqlite::Connection` isn't
/// `Sync`-shareable across the `Mutex`-guarded stores without one.
pub struct ConversationBackend {
    pub conversations: ConversationStore,
    pub tags: TagManager,
    pub search: SearchIndex,
}

impl ConversationBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let conn = db::open(path)?;
        let fts_available = db::try_init_fts(&conn);
        let tag_conn = db::open(path)?;
        let search_conn = db::open(path)?;

        Ok(Self {
            conversations: ConversationStore::new(conn),
            tags: TagManager::new(tag_conn),
            search: SearchIndex::new(search_conn, fts_available),
        })
    }
}

/// Migrates JSON history files from a legacy directory into the
/// conversation store. Idempotent: records completion in
/// `migration_markers` keyed by `marker_name` so re-running a startup
/// that already migrated is a no-op.
pub fn migrate_from_history_dir(
    conn: &rusqlite::Connection,
    store: &ConversationStore,
    history_dir: impl AsRef<Path>,
    marker_name: &str,
) -> Result<usize> {
    let already_done: Option<String> = conn
        .query_row(
            "SELECT completed_at FROM migration_markers WHERE name = ?1",
            [marker_name],
            |row| row.get(0),
        )
        .ok();
    if already_done.is_some() {
        return Ok(0);
    }

    let history_dir = history_dir.as_ref();
    if !history_dir.is_dir() {
        mark_migration_done(conn, marker_name)?;
        return Ok(0);
    }

    let mut migrated = 0usize;
    for entry in std::fs::read_dir(history_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let raw = std::fs::read_to_string(&path)?;
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };

        let interface = parsed
            .get("interface")
            .and_then(|v| v.as_str())
            .unwrap_or("legacy")
            .to_string();
        let user_id = parsed.get("user_id").and_then(|v| v.as_str()).unwrap_or("default");
        let file_stem = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);

        let conversation = store.create_conversation(file_stem.as_deref(), &interface, user_id)?;

        if let Some(messages) = parsed.get("messages").and_then(|v| v.as_array()) {
            for message in messages {
                let role = message.get("role").and_then(|v| v.as_str()).unwrap_or("user");
                let content = message.get("content").cloned().unwrap_or(serde_json::Value::Null);
                store.add_message(&conversation.id, role, &content, 0)?;
            }
        }

        migrated += 1;
    }

    mark_migration_done(conn, marker_name)?;
    Ok(migrated)
}

fn mark_migration_done(conn: &rusqlite::Connection, marker_name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO migration_markers (name, completed_at) VALUES (?1, ?2)",
        rusqlite::params![marker_name, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
