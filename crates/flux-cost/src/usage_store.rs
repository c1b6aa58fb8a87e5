use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DailyUsage {
    pub date: String,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct UsageFile {
    /// user_id -> today's accumulated usage
    #[serde(default)]
    users: HashMap<String, DailyUsage>,
}

/// Process-wide per-user-per-day usage accumulator, file-backed. A
/// single process assumption is explicit in scope here, so an
/// in-process `Mutex` spanning the read-modify-write cycle stands in
/// for the source's exclusive file lock — grounded on the same
/// Mutex-guarded-shared-state idiom used by the other SQLite stores in
/// this workspace, just over a JSON file instead of a connection.
pub struct UsageStore {
    path: PathBuf,
    state: Mutex<UsageFile>,
}

impl UsageStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn persist(&self, file: &UsageFile) {
        if let Ok(json) = serde_json::to_string_pretty(file) {
            let _ = std::fs::write(&self.path, json);
        }
    }

    pub fn increment(&self, user_id: &str, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut file = self.state.lock().unwrap();
        let entry = file.users.entry(user_id.to_string()).or_default();
        if entry.date != today {
            *entry = DailyUsage {
                date: today,
                ..Default::default()
            };
        }
        entry.calls += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.cost_usd += cost_usd;
        self.persist(&file);
    }

    pub fn today_usage(&self, user_id: &str) -> DailyUsage {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let file = self.state.lock().unwrap();
        match file.users.get(user_id) {
            Some(usage) if usage.date == today => usage.clone(),
            _ => DailyUsage {
                date: today,
                ..Default::default()
            },
        }
    }

    pub fn check_daily_limit(&self, user_id: &str, max_calls: u64) -> bool {
        self.today_usage(user_id).calls < max_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn increment_accumulates_same_day() {
        let dir = tempdir().unwrap();
        let store = UsageStore::load(dir.path().join("usage_data.json"));
        store.increment("u1", 100, 50, 0.01);
        store.increment("u1", 100, 50, 0.01);
        let usage = store.today_usage("u1");
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.input_tokens, 200);
    }

    #[test]
    fn check_daily_limit_respects_max_calls() {
        let dir = tempdir().unwrap();
        let store = UsageStore::load(dir.path().join("usage_data.json"));
        assert!(store.check_daily_limit("u1", 1));
        store.increment("u1", 1, 1, 0.0);
        assert!(!store.check_daily_limit("u1", 1));
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usage_data.json");
        {
            let store = UsageStore::load(&path);
            store.increment("u1", 10, 10, 0.1);
        }
        let reloaded = UsageStore::load(&path);
        assert_eq!(reloaded.today_usage("u1").calls, 1);
    }
}
