use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::job::{require_valid_schedule, ExecutionRecord, ExecutionStatus, Job, JobTask, Schedule};

/// Shared handle for job CRUD while the engine's tick loop runs elsewhere.
/// Owns its own `Connection` so callers (e.g. HTTP handlers) never contend
/// with the engine's polling query.
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn add_job(&self, description: &str, schedule: Schedule, task: JobTask) -> Result<Job> {
        require_valid_schedule(&schedule)?;
        let now = Utc::now();
        let next_run = schedule.compute_next_run(now);
        let job = Job {
            id: Uuid::new_v4().to_string(),
            description: description.to_string(),
            schedule,
            task,
            enabled: true,
            next_run,
            last_run: None,
            run_count: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        insert_job(&self.conn.lock().unwrap(), &job)?;
        info!(job_id = %job.id, "job added");
        Ok(job)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE jobs SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled as i64, now, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM jobs WHERE id = ?1", [id], row_to_job)
            .optional()
            .map_err(SchedulerError::from)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at")?;
        let jobs = stmt.query_map([], row_to_job)?.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

fn insert_job(conn: &Connection, job: &Job) -> Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, description, schedule, task, enabled, next_run, last_run, run_count, history, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            job.id,
            job.description,
            serde_json::to_string(&job.schedule)?,
            serde_json::to_string(&job.task)?,
            job.enabled as i64,
            job.next_run.map(|d| d.to_rfc3339()),
            job.last_run.map(|d| d.to_rfc3339()),
            job.run_count,
            serde_json::to_string(&job.history)?,
            job.created_at.to_rfc3339(),
            job.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let schedule_json: String = row.get("schedule")?;
    let task_json: String = row.get("task")?;
    let history_json: String = row.get("history")?;
    let next_run: Option<String> = row.get("next_run")?;
    let last_run: Option<String> = row.get("last_run")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Job {
        id: row.get("id")?,
        description: row.get("description")?,
        schedule: serde_json::from_str(&schedule_json).unwrap_or(Schedule::Once { run_at: Utc::now() }),
        task: serde_json::from_str(&task_json).unwrap_or_default(),
        enabled: row.get::<_, i64>("enabled")? != 0,
        next_run: next_run.and_then(|s| parse_rfc3339(&s)),
        last_run: last_run.and_then(|s| parse_rfc3339(&s)),
        run_count: row.get("run_count")?,
        history: serde_json::from_str(&history_json).unwrap_or_default(),
        created_at: parse_rfc3339(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_rfc3339(&updated_at).unwrap_or_else(Utc::now),
    })
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// Drives execution: persists jobs to SQLite and polls once per minute.
pub struct SchedulerEngine {
    conn: Connection,
    fired_tx: Option<mpsc::Sender<Job>>,
}

impl SchedulerEngine {
    pub fn new(conn: Connection, fired_tx: Option<mpsc::Sender<Job>>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn, fired_tx })
    }

    /// On startup, any enabled job whose `next_run` has already passed is
    /// left untouched here (its next tick will fire it immediately) but is
    /// recorded in its history as missed, so callers can see the gap.
    pub fn mark_missed_on_startup(&mut self) -> Result<()> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let overdue: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare(
                "SELECT id, history FROM jobs WHERE enabled = 1 AND next_run IS NOT NULL AND next_run < ?1",
            )?;
            stmt.query_map([&now_str], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        if overdue.is_empty() {
            return Ok(());
        }
        warn!(count = overdue.len(), "jobs missed while scheduler was offline");

        for (id, history_json) in overdue {
            let mut history: Vec<ExecutionRecord> = serde_json::from_str(&history_json).unwrap_or_default();
            history.push(ExecutionRecord { ran_at: now, status: ExecutionStatus::Failed, detail: "missed: scheduler offline".to_string() });
            if history.len() > crate::job::MAX_EXECUTION_HISTORY {
                let excess = history.len() - crate::job::MAX_EXECUTION_HISTORY;
                history.drain(0..excess);
            }
            self.conn.execute(
                "UPDATE jobs SET history = ?1, updated_at = ?2 WHERE id = ?3",
                params![serde_json::to_string(&history)?, now_str, id],
            )?;
        }
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        if let Err(e) = self.mark_missed_on_startup() {
            error!("mark-missed-on-startup failed: {e}");
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub fn tick_once(&mut self) -> Result<()> {
        self.tick()
    }

    fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let due_ids: Vec<String> = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT id FROM jobs WHERE enabled = 1 AND next_run IS NOT NULL AND next_run <= ?1",
            )?;
            stmt.query_map([&now_str], |row| row.get::<_, String>(0))?.collect::<std::result::Result<Vec<_>, _>>()?
        };

        for id in due_ids {
            let mut job = match self.conn.query_row("SELECT * FROM jobs WHERE id = ?1", [&id], row_to_job).optional()? {
                Some(j) => j,
                None => continue,
            };

            job.run_count += 1;
            job.last_run = Some(now);
            job.next_run = job.schedule.compute_next_run(now);
            job.updated_at = now;
            job.push_history(ExecutionRecord { ran_at: now, status: ExecutionStatus::Success, detail: "fired".to_string() });
            info!(job_id = %job.id, run = job.run_count, next_run = ?job.next_run, "job fired");

            self.conn.execute(
                "UPDATE jobs SET next_run=?1, last_run=?2, run_count=?3, history=?4, updated_at=?5 WHERE id=?6",
                params![
                    job.next_run.map(|d| d.to_rfc3339()),
                    job.last_run.map(|d| d.to_rfc3339()),
                    job.run_count,
                    serde_json::to_string(&job.history)?,
                    job.updated_at.to_rfc3339(),
                    job.id,
                ],
            )?;

            if let Some(ref tx) = self.fired_tx {
                if tx.try_send(job.clone()).is_err() {
                    warn!(job_id = %job.id, "delivery channel full or closed — job dropped");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn task() -> JobTask {
        JobTask { action: "send_message".to_string(), content: Some("hi".to_string()), tool_name: None, tool_args: None }
    }

    #[test]
    fn add_list_and_remove_job() {
        let handle = SchedulerHandle::new(Connection::open_in_memory().unwrap()).unwrap();
        let job = handle.add_job("greet", Schedule::Once { run_at: Utc::now() + ChronoDuration::hours(1) }, task()).unwrap();
        assert_eq!(handle.list_jobs().unwrap().len(), 1);
        handle.remove_job(&job.id).unwrap();
        assert!(handle.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_cron_on_add() {
        let handle = SchedulerHandle::new(Connection::open_in_memory().unwrap()).unwrap();
        let result = handle.add_job("bad", Schedule::Recurring { cron: "not a cron".to_string() }, task());
        assert!(result.is_err());
    }

    #[test]
    fn disabled_job_is_not_ticked() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let past = Utc::now() - ChronoDuration::minutes(1);
        let job = Job {
            id: "j1".to_string(),
            description: "test".to_string(),
            schedule: Schedule::Once { run_at: past },
            task: task(),
            enabled: false,
            next_run: Some(past),
            last_run: None,
            run_count: 0,
            history: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        insert_job(&conn, &job).unwrap();

        let mut engine = SchedulerEngine::new(conn, None).unwrap();
        engine.tick_once().unwrap();

        let stored = engine.conn.query_row("SELECT run_count FROM jobs WHERE id = 'j1'", [], |r| r.get::<_, i64>(0)).unwrap();
        assert_eq!(stored, 0);
    }

    #[test]
    fn due_job_fires_and_reschedules() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let past = Utc::now() - ChronoDuration::minutes(1);
        let job = Job {
            id: "j2".to_string(),
            description: "test".to_string(),
            schedule: Schedule::Once { run_at: past },
            task: task(),
            enabled: true,
            next_run: Some(past),
            last_run: None,
            run_count: 0,
            history: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        insert_job(&conn, &job).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = SchedulerEngine::new(conn, Some(tx)).unwrap();
        engine.tick_once().unwrap();

        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.run_count, 1);
        assert!(fired.next_run.is_none()); // Once jobs don't recur
    }
}
