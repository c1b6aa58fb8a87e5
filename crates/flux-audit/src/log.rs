use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "warning" => Self::Warning,
            "error" => Self::Error,
            "critical" => Self::Critical,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub timestamp: String,
    pub event_type: String,
    pub user_id: Option<String>,
    pub source_ip: Option<String>,
    pub interface: Option<String>,
    pub details: Value,
    pub severity: Severity,
}

#[derive(Debug, Default)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub min_severity: Option<Severity>,
    pub since: Option<String>,
    pub limit: i64,
}

/// Append-only event log, append-and-query only — no update/delete
/// surface beyond `flux-storage::RetentionManager`'s age/count
/// cleanup. Same `Mutex<Connection>` + WAL pragma idiom used
/// throughout the other SQLite-backed stores in this workspace.
pub struct AuditLog {
    conn: Mutex<rusqlite::Connection>,
}

impl AuditLog {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                event_type  TEXT NOT NULL,
                user_id     TEXT,
                source_ip   TEXT,
                interface   TEXT,
                details_json TEXT NOT NULL DEFAULT '{}',
                severity    TEXT NOT NULL DEFAULT 'info'
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_events(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_events(event_type, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_events(user_id, timestamp DESC);",
        )?;
        Ok(())
    }

    pub fn record(
        &self,
        event_type: &str,
        user_id: Option<&str>,
        source_ip: Option<&str>,
        interface: Option<&str>,
        details: &Value,
        severity: Severity,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let details_json = details.to_string();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, user_id, source_ip, interface, details_json, severity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![now, event_type, user_id, source_ip, interface, details_json, severity.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        if severity >= Severity::Error {
            tracing::warn!(event_type, severity = severity.as_str(), "audit event recorded");
        }
        Ok(id)
    }

    pub fn query(&self, q: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let conn = self.conn.lock().unwrap();

        // Severity is filtered in Rust after the query rather than in SQL,
        // since ordering by the enum's rank would need a CASE expression.
        let mut sql = String::from("SELECT * FROM audit_events WHERE 1=1");
        if q.event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if q.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if q.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut stmt = conn.prepare(&sql)?;
        let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(et) = &q.event_type {
            param_values.push(Box::new(et.clone()));
        }
        if let Some(uid) = &q.user_id {
            param_values.push(Box::new(uid.clone()));
        }
        if let Some(since) = &q.since {
            param_values.push(Box::new(since.clone()));
        }
        param_values.push(Box::new(if q.limit > 0 { q.limit } else { 100 }));

        let params_ref: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(params_ref.as_slice(), row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let filtered = match q.min_severity {
            Some(min) => rows.into_iter().filter(|e| e.severity >= min).collect(),
            None => rows,
        };

        Ok(filtered)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<AuditEvent>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM audit_events WHERE id = ?1", params![id], row_to_event)
            .optional()
            .map_err(crate::error::AuditError::from)
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<AuditEvent> {
    let details_json: String = row.get("details_json")?;
    let severity: String = row.get("severity")?;
    Ok(AuditEvent {
        id: row.get("id")?,
        timestamp: row.get("timestamp")?,
        event_type: row.get("event_type")?,
        user_id: row.get("user_id")?,
        source_ip: row.get("source_ip")?,
        interface: row.get("interface")?,
        details: serde_json::from_str(&details_json).unwrap_or(Value::Null),
        severity: Severity::from_str(&severity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_and_query_round_trips() {
        let log = AuditLog::in_memory().unwrap();
        log.record("auth_success", Some("u1"), Some("127.0.0.1"), Some("cli"), &json!({}), Severity::Info)
            .unwrap();
        log.record("auth_failure", None, Some("10.0.0.1"), Some("web"), &json!({"reason": "invalid_key"}), Severity::Warning)
            .unwrap();

        let all = log.query(&AuditQuery { limit: 10, ..Default::default() }).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn query_filters_by_event_type_and_severity() {
        let log = AuditLog::in_memory().unwrap();
        log.record("auth_success", Some("u1"), None, None, &json!({}), Severity::Info).unwrap();
        log.record("backup.failed", None, None, None, &json!({}), Severity::Critical).unwrap();

        let critical_only = log
            .query(&AuditQuery { min_severity: Some(Severity::Error), limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(critical_only.len(), 1);
        assert_eq!(critical_only[0].event_type, "backup.failed");
    }
}
