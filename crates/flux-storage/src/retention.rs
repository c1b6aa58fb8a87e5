use std::sync::Mutex;

use chrono::{Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionCategory {
    Conversations,
    AuditLogs,
    WebhookDeliveries,
}

impl RetentionCategory {
    fn table(self) -> &'static str {
        match self {
            Self::Conversations => "conversations",
            Self::AuditLogs => "audit_events",
            Self::WebhookDeliveries => "webhook_deliveries",
        }
    }

    fn timestamp_column(self) -> &'static str {
        match self {
            Self::Conversations => "updated_at",
            Self::AuditLogs => "timestamp",
            Self::WebhookDeliveries => "delivered_at",
        }
    }

    fn id_column(self) -> &'static str {
        match self {
            Self::Conversations => "id",
            Self::AuditLogs => "id",
            Self::WebhookDeliveries => "id",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub category: RetentionCategory,
    pub max_age_days: i64,
    pub max_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub category: RetentionCategory,
    pub deleted_by_age: usize,
    pub deleted_by_count: usize,
}

/// Policy-driven deletion of aged-out or overflowing rows.
/// Table/column names come only from the fixed `RetentionCategory`
/// enum, never from configuration text, so there's no injectable SQL
/// identifier surface.
///
/// Each category's table may live in a different database file
/// (conversations in `flux-storage`'s db, audit events and webhook
/// deliveries in their own). `run_cleanup` is handed the connection
/// that owns whichever categories are passed to it; the caller (the
/// component that owns all three connections) is responsible for
/// invoking it once per database with the matching policy subset.
pub struct RetentionManager {
    conn: Mutex<rusqlite::Connection>,
    policies: Vec<RetentionPolicy>,
}

impl RetentionManager {
    pub fn new(conn: rusqlite::Connection, policies: Vec<RetentionPolicy>) -> Self {
        Self {
            conn: Mutex::new(conn),
            policies,
        }
    }

    pub fn run_cleanup(&self) -> Result<Vec<CleanupReport>> {
        let conn = self.conn.lock().unwrap();
        let mut reports = Vec::new();

        for policy in &self.policies {
            let mut deleted_by_age = 0usize;
            let mut deleted_by_count = 0usize;

            if policy.max_age_days > 0 {
                let cutoff = (Utc::now() - Duration::days(policy.max_age_days)).to_rfc3339();
                let sql = format!(
                    "DELETE FROM {} WHERE {} < ?1",
                    policy.category.table(),
                    policy.category.timestamp_column()
                );
                deleted_by_age = conn.execute(&sql, params![cutoff])?;
            }

            if policy.max_count > 0 {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", policy.category.table()),
                    [],
                    |row| row.get(0),
                )?;

                if count > policy.max_count {
                    let excess = count - policy.max_count;
                    let sql = format!(
                        "DELETE FROM {} WHERE {} IN (
                            SELECT {} FROM {} ORDER BY {} ASC LIMIT ?1
                        )",
                        policy.category.table(),
                        policy.category.id_column(),
                        policy.category.id_column(),
                        policy.category.table(),
                        policy.category.timestamp_column(),
                    );
                    deleted_by_count = conn.execute(&sql, params![excess])?;
                }
            }

            reports.push(CleanupReport {
                category: policy.category,
                deleted_by_age,
                deleted_by_count,
            });
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    #[test]
    fn cleanup_deletes_aged_out_conversations() {
        let dir = tempdir().unwrap();
        let conn = db::open(dir.path().join("retention.db")).unwrap();

        let old = (Utc::now() - Duration::days(400)).to_rfc3339();
        conn.execute(
            "INSERT INTO conversations (id, interface, user_id, created_at, updated_at, metadata_json)
             VALUES ('old', 'cli', 'u1', ?1, ?1, '{}')",
            params![old],
        )
        .unwrap();
        let fresh = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversations (id, interface, user_id, created_at, updated_at, metadata_json)
             VALUES ('fresh', 'cli', 'u1', ?1, ?1, '{}')",
            params![fresh],
        )
        .unwrap();

        let mgr = RetentionManager::new(
            conn,
            vec![RetentionPolicy {
                category: RetentionCategory::Conversations,
                max_age_days: 30,
                max_count: 0,
            }],
        );

        let reports = mgr.run_cleanup().unwrap();
        assert_eq!(reports[0].deleted_by_age, 1);
    }

    #[test]
    fn cleanup_enforces_max_count_oldest_first() {
        let dir = tempdir().unwrap();
        let conn = db::open(dir.path().join("retention_count.db")).unwrap();

        for i in 0..5 {
            let ts = (Utc::now() - Duration::days(5 - i)).to_rfc3339();
            conn.execute(
                "INSERT INTO conversations (id, interface, user_id, created_at, updated_at, metadata_json)
                 VALUES (?1, 'cli', 'u1', ?2, ?2, '{}')",
                params![format!("c{i}"), ts],
            )
            .unwrap();
        }

        let mgr = RetentionManager::new(
            conn,
            vec![RetentionPolicy {
                category: RetentionCategory::Conversations,
                max_age_days: 0,
                max_count: 2,
            }],
        );

        let reports = mgr.run_cleanup().unwrap();
        assert_eq!(reports[0].deleted_by_count, 3);
    }
}
