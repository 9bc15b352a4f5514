//! Per-method performance metrics: request/error counters and
//! per-method response-time samples, recorded once per dispatched
//! request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Running counters plus per-method response-time samples. Owned
/// exclusively by the WebSocket server.
pub struct Metrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    active_connections: AtomicU64,
    response_times_ms: RwLock<HashMap<String, Vec<f64>>>,
    start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub active_connections: u64,
    pub response_times_ms: HashMap<String, Vec<f64>>,
    pub start_time: DateTime<Utc>,
    pub uptime_secs: i64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            response_times_ms: RwLock::new(HashMap::new()),
            start_time: Utc::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Records one dispatched request. Every error response — including
    /// a permission or rate-limit rejection — bumps `error_count`; only
    /// a successful response does not.
    pub fn record(&self, method: &str, elapsed: Duration, counts_as_error: bool) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        if counts_as_error {
            self.error_count.fetch_add(1, Ordering::SeqCst);
        }
        self.response_times_ms
            .write()
            .entry(method.to_string())
            .or_default()
            .push(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            request_count: self.request_count(),
            error_count: self.error_count(),
            active_connections: self.active_connections(),
            response_times_ms: self.response_times_ms.read().clone(),
            start_time: self.start_time,
            uptime_secs: (Utc::now() - self.start_time).num_seconds(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_request_and_error_counts_independently() {
        let metrics = Metrics::new();
        metrics.record("ping", Duration::from_millis(5), false);
        metrics.record("get_server_info", Duration::from_millis(2), true);
        assert_eq!(metrics.request_count(), 2);
        assert_eq!(metrics.error_count(), 1);
    }

    #[test]
    fn connection_count_tracks_open_and_close() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections(), 2);
        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn snapshot_groups_response_times_by_method() {
        let metrics = Metrics::new();
        metrics.record("ping", Duration::from_millis(1), false);
        metrics.record("ping", Duration::from_millis(2), false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.response_times_ms["ping"].len(), 2);
        assert_eq!(snapshot.request_count, 2);
    }
}
