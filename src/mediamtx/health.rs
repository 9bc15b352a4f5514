//! Health supervision & circuit breaker (spec.md §4.2).
//!
//! A three-state machine (Closed/Open/Half-open) that suppresses calls
//! to a failing MediaMTX backend and backs off exponentially on
//! transient HTTP failures.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MediaMtxConfig;
use crate::error::{AppError, Result};

use super::client::MediaMtxClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: parking_lot::RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    opened_at_millis: AtomicU64,
    start: Instant,
}

/// Shared circuit breaker consulted before every stream/path operation
/// and driven by the background health-check task.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
    config: MediaMtxConfig,
}

impl CircuitBreaker {
    pub fn new(config: MediaMtxConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: parking_lot::RwLock::new(CircuitState::Closed),
                consecutive_failures: AtomicU32::new(0),
                consecutive_successes: AtomicU32::new(0),
                opened_at_millis: AtomicU64::new(0),
                start: Instant::now(),
            }),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        let current = *self.inner.state.read();
        if current == CircuitState::Open {
            let elapsed = self.inner.start.elapsed().as_millis() as u64
                - self.inner.opened_at_millis.load(Ordering::SeqCst);
            if elapsed >= self.config.health_circuit_breaker_timeout_secs * 1000 {
                *self.inner.state.write() = CircuitState::HalfOpen;
                self.inner.consecutive_successes.store(0, Ordering::SeqCst);
                return CircuitState::HalfOpen;
            }
        }
        current
    }

    /// Fail fast with `MediaMtxUnavailable` while the breaker is Open;
    /// otherwise returns `Ok(())` allowing the caller through.
    pub fn check(&self) -> Result<()> {
        match self.state() {
            CircuitState::Open => Err(AppError::MediaMtxUnavailable(
                "mediamtx circuit breaker open".to_string(),
            )),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    pub fn record_success(&self) {
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        let state = self.state();
        match state {
            CircuitState::HalfOpen => {
                let successes = self.inner.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.health_recovery_confirmation_threshold {
                    *self.inner.state.write() = CircuitState::Closed;
                    info!("mediamtx circuit breaker closed after recovery confirmation");
                }
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let state = self.state();
        match state {
            CircuitState::HalfOpen => {
                self.trip();
            }
            CircuitState::Closed => {
                let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.health_failure_threshold {
                    self.trip();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self) {
        *self.inner.state.write() = CircuitState::Open;
        self.inner
            .opened_at_millis
            .store(self.inner.start.elapsed().as_millis() as u64, Ordering::SeqCst);
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        self.inner.consecutive_successes.store(0, Ordering::SeqCst);
        warn!("mediamtx circuit breaker tripped to Open");
    }

    /// Exponential retry backoff for transient HTTP failures, capped
    /// at `health_max_backoff_interval`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_multiplier.max(1.0);
        let secs = base.powi(attempt as i32).min(self.config.health_max_backoff_interval_secs as f64);
        Duration::from_secs_f64(secs)
    }
}

/// Spawns the background task that polls `get_health` every
/// `health_check_interval` and drives the circuit breaker.
pub fn spawn_health_supervisor(
    client: Arc<MediaMtxClient>,
    breaker: CircuitBreaker,
    config: MediaMtxConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.health_check_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            match client.get_health().await {
                Ok(_) => breaker.record_success(),
                Err(e) => {
                    warn!(error = %e, "mediamtx health check failed");
                    breaker.record_failure();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MediaMtxConfig {
        MediaMtxConfig {
            health_failure_threshold: 3,
            health_circuit_breaker_timeout_secs: 0,
            health_recovery_confirmation_threshold: 2,
            ..MediaMtxConfig::default()
        }
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let breaker = CircuitBreaker::new(config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn half_open_closes_after_recovery_confirmation() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        // timeout is 0 secs so the next state() call transitions to HalfOpen
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_reopens_on_any_failure() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
