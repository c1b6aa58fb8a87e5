use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron::CronSchedule;
use crate::error::{Result, SchedulerError};

/// When a job runs: either a single future instant, or a recurring cron
/// expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Once { run_at: DateTime<Utc> },
    Recurring { cron: String },
}

impl Schedule {
    /// Validates the schedule's shape (cron expressions must parse).
    pub fn validate(&self) -> Result<()> {
        match self {
            Schedule::Once { .. } => Ok(()),
            Schedule::Recurring { cron } => CronSchedule::parse(cron).map(|_| ()),
        }
    }

    pub fn compute_next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Once { run_at } => (*run_at > from).then_some(*run_at),
            Schedule::Recurring { cron } => CronSchedule::parse(cron).ok()?.next_after(from),
        }
    }
}

/// The opaque payload a fired job carries to its executor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobTask {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One bounded entry in a job's execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub ran_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub detail: String,
}

/// Maximum execution-history entries kept per job; oldest dropped first.
pub const MAX_EXECUTION_HISTORY: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub description: String,
    pub schedule: Schedule,
    pub task: JobTask,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub history: Vec<ExecutionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn push_history(&mut self, record: ExecutionRecord) {
        self.history.push(record);
        if self.history.len() > MAX_EXECUTION_HISTORY {
            let excess = self.history.len() - MAX_EXECUTION_HISTORY;
            self.history.drain(0..excess);
        }
    }
}

pub(crate) fn require_valid_schedule(schedule: &Schedule) -> Result<()> {
    schedule.validate().map_err(|e| match e {
        SchedulerError::InvalidCron { expr, reason } => SchedulerError::InvalidSchedule(format!("{expr}: {reason}")),
        other => other,
    })
}
