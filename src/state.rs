//! Application-wide shared state (spec.md §3 "Ownership & lifecycle").
//!
//! One `Arc<AppState>` is cloned into every connection task and
//! background supervisor. Each field is owned by exactly one
//! subsystem; callers outside that subsystem only ever read through
//! its public API, never lock its internals directly.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::camera::CameraMonitor;
use crate::config::ConfigStore;
use crate::events::EventBus;
use crate::mediamtx::MediaMtxController;
use crate::security::SecuritySubsystem;
use crate::server::connection::ConnectionRegistry;
use crate::server::metrics::Metrics;
use crate::server::methods::RetentionPolicy;

pub struct AppState {
    /// Configuration store (spec.md §6, §9 "Hot reload").
    pub config: ConfigStore,
    /// Camera discovery & capability probing engine (spec.md §4.1).
    pub cameras: Arc<CameraMonitor>,
    /// MediaMTX controller: streams, recordings, snapshots (spec.md §4.2).
    pub mediamtx: Arc<MediaMtxController>,
    /// JWT, permissions, sessions, and the per-client rate limiter (spec.md §4.4).
    pub security: SecuritySubsystem,
    /// Live WebSocket connections (spec.md §4.3 "Connection lifecycle").
    pub connections: ConnectionRegistry,
    /// Per-method request/error/latency counters (spec.md §3 `MonitorMetrics`).
    pub metrics: Metrics,
    /// Topic-tagged notification bus (spec.md §4.3 "Event broadcasting").
    pub events: EventBus,
    /// Caller-configured retention policy for `cleanup_old_files`.
    pub retention_policy: RwLock<RetentionPolicy>,
}

impl AppState {
    /// Stops the background tasks this state owns directly. The
    /// camera monitor and MediaMTX health supervisor are stopped by
    /// their own shutdown calls from `main`, since those return
    /// `Result`/need `&self` access the caller already holds.
    pub fn shutdown_ambient_tasks(&self) {
        self.security.sessions.stop();
    }
}
