use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,
    pub retry_after: Option<u64>,
}

/// Sliding-window request counter, grounded on
/// `original_source/rate_limiter.py`'s `HTTPRateLimiter`. In-memory,
/// resets on restart, keyed by user id or client IP —
/// hand-rolled rather than `tower_governor` since the window is keyed
/// per-identity rather than per-route (see DESIGN.md).
pub struct RateLimiter {
    max_requests: u32,
    window_seconds: u64,
    windows: Mutex<HashMap<String, Vec<u64>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> (bool, RateLimitHeaders) {
        let now = now_secs();
        let cutoff = now.saturating_sub(self.window_seconds);

        let mut windows = self.windows.lock().unwrap();
        let timestamps = windows.entry(key.to_string()).or_default();
        timestamps.retain(|&t| t > cutoff);

        let current_count = timestamps.len() as u32;
        let remaining = self.max_requests.saturating_sub(current_count);
        let reset_at = now + self.window_seconds;

        if current_count >= self.max_requests {
            return (
                false,
                RateLimitHeaders {
                    limit: self.max_requests,
                    remaining: 0,
                    reset: reset_at,
                    retry_after: Some(self.window_seconds),
                },
            );
        }

        timestamps.push(now);
        (
            true,
            RateLimitHeaders {
                limit: self.max_requests,
                remaining: remaining.saturating_sub(1),
                reset: reset_at,
                retry_after: None,
            },
        )
    }

    pub fn cleanup_stale(&self, max_age_seconds: u64) -> usize {
        let now = now_secs();
        let cutoff = now.saturating_sub(max_age_seconds);

        let mut windows = self.windows.lock().unwrap();
        let stale_keys: Vec<String> = windows
            .iter()
            .filter(|(_, v)| v.last().map(|&t| t < cutoff).unwrap_or(true))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &stale_keys {
            windows.remove(key);
        }
        stale_keys.len()
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_under_the_limit() {
        let limiter = RateLimiter::new(3, 60);
        for _ in 0..3 {
            let (allowed, _) = limiter.check("user1");
            assert!(allowed);
        }
        let (allowed, headers) = limiter.check("user1");
        assert!(!allowed);
        assert_eq!(headers.retry_after, Some(60));
    }

    #[test]
    fn separate_keys_have_independent_windows() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.check("a").0);
        assert!(limiter.check("b").0);
        assert!(!limiter.check("a").0);
    }

    #[test]
    fn cleanup_stale_removes_old_entries() {
        let limiter = RateLimiter::new(5, 60);
        limiter.check("stale-key");
        std::thread::sleep(std::time::Duration::from_secs(1));
        let removed = limiter.cleanup_stale(0);
        assert_eq!(removed, 1);
    }
}
