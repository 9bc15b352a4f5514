//! The JSON-RPC dispatch pipeline: method lookup, authentication
//! gate, permission check, rate limit, then handler invocation with
//! metrics recording.
//!
//! Envelope validation (step 1) happens in [`super::connection`]
//! before a request ever reaches [`dispatch_request`], since a
//! malformed envelope has no `method` to look up.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use crate::state::AppState;

use super::connection::ConnectionHandle;
use super::methods;
use super::protocol::{RpcRequest, RpcResponse, AUTHENTICATION_REQUIRED, INSUFFICIENT_PERMISSIONS, METHOD_NOT_FOUND};

/// Runs one already envelope-valid request through the pipeline and
/// always returns a response frame to send back to the client.
pub async fn dispatch_request(state: &Arc<AppState>, conn: &Arc<ConnectionHandle>, request: RpcRequest) -> RpcResponse {
    let start = Instant::now();
    let method = request.method.clone();
    let id = request.id.clone();

    let response = route(state, conn, &method, id, request.params).await;

    state.metrics.record(&method, start.elapsed(), response.error.is_some());
    response
}

async fn route(state: &Arc<AppState>, conn: &Arc<ConnectionHandle>, method: &str, id: Option<Value>, params: Value) -> RpcResponse {
    if !methods::is_known_method(method) {
        return RpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown method: {method}"));
    }

    if method != "ping" && method != "authenticate" && !conn.is_authenticated() {
        return RpcResponse::error(id, AUTHENTICATION_REQUIRED, "authentication required");
    }

    if !state.security.permissions.has_permission(conn.role(), method) {
        warn!(client_id = %conn.client_id, method, role = ?conn.role(), "permission denied");
        return RpcResponse::error(id, INSUFFICIENT_PERMISSIONS, format!("{method} requires a higher role"));
    }

    if let Err(e) = state.security.rate_limiter.check_rate_limit(&conn.client_id) {
        return RpcResponse::from_app_error(id, &Uuid::new_v4().to_string(), &e);
    }

    match methods::invoke(state, conn, method, params).await {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => {
            let correlation_id = Uuid::new_v4().to_string();
            if e.is_client_error() {
                warn!(correlation_id, method, error = %e, "request rejected");
            } else {
                error!(correlation_id, method, error = %e, "request failed");
            }
            RpcResponse::from_app_error(id, &correlation_id, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraMonitor, FsDeviceChecker, LineInfoParser, V4l2CtlExecutor};
    use crate::config::ConfigStore;
    use crate::events::EventBus;
    use crate::mediamtx::MediaMtxController;
    use crate::security::{JwtHandler, PermissionChecker, RateLimiter, SecuritySubsystem, SessionManager};
    use crate::server::connection::ConnectionRegistry;
    use crate::server::methods::RetentionPolicy;
    use crate::server::metrics::Metrics;
    use parking_lot::RwLock as PlRwLock;
    use std::time::Duration;

    async fn test_state() -> Arc<AppState> {
        let config = ConfigStore::load("/nonexistent/camera-service-test.yaml").await.unwrap();
        let cfg = config.get();
        let cameras = Arc::new(CameraMonitor::new(
            cfg.camera.clone(),
            Arc::new(FsDeviceChecker),
            Arc::new(V4l2CtlExecutor),
            Arc::new(LineInfoParser),
        ));
        let mediamtx = Arc::new(MediaMtxController::new(cfg.mediamtx.clone()).unwrap());
        Arc::new(AppState {
            security: SecuritySubsystem {
                jwt: JwtHandler::new("test-secret-key-0123456789").unwrap(),
                permissions: PermissionChecker::new(),
                sessions: SessionManager::new(Duration::from_secs(3600), Duration::from_secs(60)),
                rate_limiter: RateLimiter::new(cfg.security.rate_limit_requests, Duration::from_secs(cfg.security.rate_limit_window_secs)),
            },
            connections: ConnectionRegistry::new(),
            metrics: Metrics::new(),
            events: EventBus::new(),
            retention_policy: PlRwLock::new(RetentionPolicy::default()),
            cameras,
            mediamtx,
            config,
        })
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let state = test_state().await;
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        let response = route(&state, &handle, "no_such_method", Some(1.into()), serde_json::json!({})).await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unauthenticated_client_is_rejected_before_permission_check() {
        let state = test_state().await;
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        let response = route(&state, &handle, "get_camera_list", Some(1.into()), serde_json::json!({})).await;
        assert_eq!(response.error.unwrap().code, AUTHENTICATION_REQUIRED);
    }

    #[tokio::test]
    async fn ping_requires_no_authentication() {
        let state = test_state().await;
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        let response = route(&state, &handle, "ping", Some(1.into()), serde_json::json!({})).await;
        assert_eq!(response.result.unwrap(), "pong");
    }

    #[tokio::test]
    async fn viewer_cannot_call_admin_only_method() {
        let state = test_state().await;
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        handle.authenticate("alice", crate::security::Role::Viewer, "jwt");
        let response = route(&state, &handle, "get_server_info", Some(1.into()), serde_json::json!({})).await;
        assert_eq!(response.error.unwrap().code, INSUFFICIENT_PERMISSIONS);
    }

    #[tokio::test]
    async fn repeated_pings_eventually_trip_the_rate_limit() {
        let state = test_state().await;
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register();
        state.security.rate_limiter.set_rate_limit(&handle.client_id, 2, Duration::from_secs(60));

        let mut saw_rate_limited = false;
        for _ in 0..5 {
            let response = route(&state, &handle, "ping", Some(1.into()), serde_json::json!({})).await;
            if response.error.as_ref().map(|e| e.code) == Some(crate::server::protocol::RATE_LIMIT_EXCEEDED) {
                saw_rate_limited = true;
            }
        }
        assert!(saw_rate_limited, "expected at least one rate-limited response");
    }
}
