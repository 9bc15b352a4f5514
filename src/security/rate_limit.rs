//! Per-client sliding-window rate limiter, shared by the WebSocket
//! dispatch pipeline.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A client's current window: request count and window start, bounded
/// by a configured max request count over a configured window
/// duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateState {
    pub request_count: u32,
    pub window_start: DateTime<Utc>,
    pub limit: u32,
    pub window_secs: u64,
}

/// In-memory per-client rate-limit table. A request inside the
/// current window increments the counter; once the window has
/// elapsed the counter resets rather than sliding continuously —
/// exactly `N` requests inside a window succeed, and request `N+1`
/// is rejected with `-32002`.
pub struct RateLimiter {
    table: RwLock<HashMap<String, RateState>>,
    default_limit: u32,
    default_window: Duration,
}

impl RateLimiter {
    pub fn new(default_limit: u32, default_window: Duration) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            default_limit,
            default_window,
        }
    }

    /// Records one request for `client_id` against its current
    /// window. Returns `RateLimited` once the window's request count
    /// would exceed its limit; otherwise records the request and
    /// returns `Ok(())`.
    pub fn check_rate_limit(&self, client_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut table = self.table.write();
        let entry = table.entry(client_id.to_string()).or_insert_with(|| RateState {
            request_count: 0,
            window_start: now,
            limit: self.default_limit,
            window_secs: self.default_window.as_secs(),
        });

        let elapsed = (now - entry.window_start).num_seconds().max(0) as u64;
        if elapsed >= entry.window_secs {
            entry.window_start = now;
            entry.request_count = 0;
        }

        if entry.request_count >= entry.limit {
            return Err(AppError::RateLimited);
        }
        entry.request_count += 1;
        Ok(())
    }

    /// `setRateLimit` — overrides the limit/window for one client,
    /// resetting its window.
    pub fn set_rate_limit(&self, client_id: &str, limit: u32, window: Duration) {
        self.table.write().insert(
            client_id.to_string(),
            RateState {
                request_count: 0,
                window_start: Utc::now(),
                limit,
                window_secs: window.as_secs(),
            },
        );
    }

    /// `getClientRateInfo` — current window snapshot for a client, if
    /// it has made any request yet.
    pub fn get_client_rate_info(&self, client_id: &str) -> Option<RateState> {
        self.table.read().get(client_id).cloned()
    }

    pub fn remove_client(&self, client_id: &str) {
        self.table.write().remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_n_requests_succeed_then_n_plus_one_is_rate_limited() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        for _ in 0..100 {
            assert!(limiter.check_rate_limit("client-a").is_ok());
        }
        assert!(matches!(
            limiter.check_rate_limit("client-a"),
            Err(AppError::RateLimited)
        ));
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_rate_limit("a").is_ok());
        assert!(limiter.check_rate_limit("b").is_ok());
        assert!(limiter.check_rate_limit("a").is_err());
    }

    #[test]
    fn set_rate_limit_overrides_default_and_resets_window() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        limiter.check_rate_limit("a").unwrap();
        limiter.set_rate_limit("a", 1, Duration::from_secs(60));
        assert!(limiter.check_rate_limit("a").is_ok());
        assert!(limiter.check_rate_limit("a").is_err());
    }

    #[test]
    fn rate_info_reports_current_window() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        assert!(limiter.get_client_rate_info("a").is_none());
        limiter.check_rate_limit("a").unwrap();
        let info = limiter.get_client_rate_info("a").unwrap();
        assert_eq!(info.request_count, 1);
        assert_eq!(info.limit, 100);
    }
}
