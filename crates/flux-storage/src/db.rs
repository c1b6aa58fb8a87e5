use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

/// Opens the conversation database with WAL journaling, FK enforcement,
/// and a busy timeout so concurrent writers block briefly rather than
/// erroring immediately. Grounded on `skynet-gateway`'s connection setup.
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates every table this workspace's crates rely on. Safe to call on every startup.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            interface   TEXT NOT NULL,
            user_id     TEXT NOT NULL DEFAULT 'default',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_interface
            ON conversations(interface, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations(updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role            TEXT NOT NULL,
            content_json    TEXT NOT NULL,
            token_count     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS conversation_tags (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            tag             TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE(conversation_id, tag)
        );

        CREATE TABLE IF NOT EXISTS migration_markers (
            name        TEXT PRIMARY KEY,
            completed_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Probes whether FTS5 is compiled into this SQLite build. If so,
/// creates `messages_fts` plus sync triggers; otherwise the
/// caller falls back to `LIKE` search.
pub fn try_init_fts(conn: &Connection) -> bool {
    let available = conn
        .query_row("PRAGMA compile_options", [], |_| Ok(()))
        .is_ok()
        && probe_fts5(conn);

    if !available {
        return false;
    }

    let result = conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
            USING fts5(content, content=messages, content_rowid=id);

        CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content_json);
        END;
        CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', old.id, old.content_json);
        END;
        CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
            INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', old.id, old.content_json);
            INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content_json);
        END;",
    );

    result.is_ok()
}

fn probe_fts5(conn: &Connection) -> bool {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS __fts5_probe USING fts5(x);
         DROP TABLE __fts5_probe;",
    )
    .is_ok()
}
