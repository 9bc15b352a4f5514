//! Method catalog handlers, invoked from [`super::dispatch`] once the
//! pipeline has cleared envelope validation, authentication,
//! permission, and rate-limit checks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::{AppError, Result};
use crate::events::Notification;
use crate::mediamtx::{RecordingOptions, RecordingStatus, SnapshotOptions};
use crate::security::{method_catalog, Role};
use crate::state::AppState;

use super::connection::ConnectionHandle;

pub fn is_known_method(method: &str) -> bool {
    method_catalog().iter().any(|(m, _)| *m == method)
}

fn param<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| AppError::InvalidParam(e.to_string()))
}

/// A caller-configured retention policy for `cleanup_old_files`
/// (admin-gated).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", default)]
pub struct RetentionPolicy {
    pub max_age_days: Option<u32>,
    pub max_total_bytes: Option<u64>,
}

pub async fn invoke(state: &Arc<AppState>, conn: &Arc<ConnectionHandle>, method: &str, params: Value) -> Result<Value> {
    match method {
        "ping" => ping(),
        "authenticate" => authenticate(state, conn, params).await,
        "get_camera_list" => get_camera_list(state),
        "get_camera_status" => get_camera_status(state, params),
        "get_camera_capabilities" => get_camera_capabilities(state, params),
        "take_snapshot" => take_snapshot(state, params).await,
        "start_recording" => start_recording(state, params).await,
        "stop_recording" => stop_recording(state, params).await,
        "list_recordings" => list_recordings(state, params).await,
        "list_snapshots" => list_snapshots(state, params).await,
        "get_recording_info" => get_recording_info(state, params).await,
        "get_snapshot_info" => get_snapshot_info(state, params).await,
        "delete_recording" => delete_recording(state, params).await,
        "delete_snapshot" => delete_snapshot(state, params).await,
        "get_streams" => get_streams(state).await,
        "get_metrics" => get_metrics(state),
        "get_status" => get_status(state),
        "get_server_info" => get_server_info(),
        "get_storage_info" => get_storage_info(state),
        "set_retention_policy" => set_retention_policy(state, params),
        "cleanup_old_files" => cleanup_old_files(state).await,
        other => Err(AppError::Internal(format!("no handler registered for {other}"))),
    }
}

fn ping() -> Result<Value> {
    Ok(json!("pong"))
}

#[derive(Deserialize)]
struct AuthenticateParams {
    token: String,
}

async fn authenticate(state: &Arc<AppState>, conn: &Arc<ConnectionHandle>, params: Value) -> Result<Value> {
    let params: AuthenticateParams = param(params)?;
    let claims = state.security.jwt.validate_token(&params.token)?;
    let session = state.security.sessions.create_session(&claims.sub, claims.role)?;
    conn.authenticate(&claims.sub, claims.role, "jwt");
    // No standalone subscribe method exists yet, so a client is
    // subscribed to every broadcast topic as soon as it authenticates.
    conn.subscribe(&["*".to_string()]);
    info!(user_id = %claims.sub, role = ?claims.role, "client authenticated");
    Ok(json!({
        "authenticated": true,
        "user_id": claims.sub,
        "role": claims.role,
        "session_id": session.id,
    }))
}

fn get_camera_list(state: &Arc<AppState>) -> Result<Value> {
    let cameras: Vec<_> = state.cameras.get_connected_cameras().into_values().collect();
    Ok(json!({ "cameras": cameras }))
}

#[derive(Deserialize)]
struct DeviceParam {
    device: String,
}

fn get_camera_status(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: DeviceParam = param(params)?;
    let (device, exists) = state.cameras.get_device(&params.device);
    if !exists {
        return Err(AppError::CameraNotFound(params.device));
    }
    Ok(serde_json::to_value(device.expect("exists implies Some"))?)
}

fn get_camera_capabilities(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: DeviceParam = param(params)?;
    let (device, exists) = state.cameras.get_device(&params.device);
    if !exists {
        return Err(AppError::CameraNotFound(params.device));
    }
    let device = device.expect("exists implies Some");
    Ok(json!({
        "capabilities": device.capabilities,
        "formats": device.formats,
    }))
}

#[derive(Deserialize)]
struct TakeSnapshotParams {
    device: String,
    #[serde(flatten)]
    options: SnapshotOptions,
}

async fn take_snapshot(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: TakeSnapshotParams = param(params)?;
    let record = state
        .mediamtx
        .take_snapshot_with_options(&params.device, None, params.options)
        .await?;
    Ok(json!({
        "snapshot_taken": true,
        "snapshot_id": record.id,
        "filename": record.filename,
        "camera": record.device_path,
        "taken_at": record.taken_at,
    }))
}

#[derive(Deserialize)]
struct StartRecordingParams {
    device: String,
    #[serde(flatten)]
    options: RecordingOptions,
}

async fn start_recording(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: StartRecordingParams = param(params)?;
    let session = state
        .mediamtx
        .start_recording_with_options(&params.device, None, params.options)
        .await?;
    state.events.publish(Notification::RecordingStatusUpdate {
        device: session.device_path.clone(),
        recording_id: session.id.clone(),
        status: session.status,
        filename: session.filename.clone(),
    });
    Ok(json!({
        "recording_started": true,
        "recording_id": session.id,
        "filename": session.filename,
        "camera": session.device_path,
        "status": session.status,
        "start_time": session.start_time,
    }))
}

#[derive(Deserialize)]
struct RecordingIdParam {
    recording_id: String,
}

async fn stop_recording(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: RecordingIdParam = param(params)?;
    let session = state.mediamtx.stop_recording(&params.recording_id).await?;
    state.events.publish(Notification::RecordingStatusUpdate {
        device: session.device_path.clone(),
        recording_id: session.id.clone(),
        status: RecordingStatus::Stopped,
        filename: session.filename.clone(),
    });
    Ok(json!({
        "recording_stopped": true,
        "recording_id": session.id,
        "duration": session.duration_secs.unwrap_or(0),
        "size": session.size_bytes.unwrap_or(0),
        "camera": session.device_path,
        "filename": session.filename,
    }))
}

#[derive(Deserialize)]
#[serde(default)]
struct PageParams {
    limit: usize,
    offset: usize,
}

impl Default for PageParams {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

async fn list_recordings(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: PageParams = param(params)?;
    Ok(serde_json::to_value(
        state.mediamtx.list_recordings(params.limit, params.offset).await?,
    )?)
}

async fn list_snapshots(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: PageParams = param(params)?;
    Ok(serde_json::to_value(
        state.mediamtx.list_snapshots(params.limit, params.offset).await?,
    )?)
}

#[derive(Deserialize)]
struct FilenameParam {
    filename: String,
}

async fn get_recording_info(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: FilenameParam = param(params)?;
    Ok(serde_json::to_value(state.mediamtx.get_recording_info(&params.filename).await?)?)
}

async fn get_snapshot_info(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: FilenameParam = param(params)?;
    Ok(serde_json::to_value(state.mediamtx.get_snapshot_info(&params.filename).await?)?)
}

async fn delete_recording(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: FilenameParam = param(params)?;
    state.mediamtx.delete_recording(&params.filename).await?;
    Ok(json!({ "deleted": true, "filename": params.filename }))
}

async fn delete_snapshot(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let params: FilenameParam = param(params)?;
    state.mediamtx.delete_snapshot(&params.filename).await?;
    Ok(json!({ "deleted": true, "filename": params.filename }))
}

async fn get_streams(state: &Arc<AppState>) -> Result<Value> {
    Ok(json!({ "streams": state.mediamtx.get_streams().await? }))
}

fn get_metrics(state: &Arc<AppState>) -> Result<Value> {
    Ok(serde_json::to_value(state.metrics.snapshot())?)
}

fn get_status(state: &Arc<AppState>) -> Result<Value> {
    let metrics = state.metrics.snapshot();
    Ok(json!({
        "status": if state.cameras.is_running() { "running" } else { "stopped" },
        "uptime_secs": metrics.uptime_secs,
        "camera_count": state.cameras.get_connected_cameras().len(),
        "active_connections": state.connections.count(),
        "circuit_state": format!("{:?}", state.mediamtx.circuit_state()),
    }))
}

fn get_server_info() -> Result<Value> {
    Ok(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn get_storage_info(state: &Arc<AppState>) -> Result<Value> {
    let config = state.config.get();
    let path = std::path::Path::new(&config.mediamtx.recordings_path);
    let stats = nix::sys::statvfs::statvfs(path).map_err(|e| {
        AppError::Internal(format!("statvfs {}: {e}", path.display()))
    })?;
    let block_size = stats.fragment_size().max(1) as u64;
    let total_bytes = stats.blocks() as u64 * block_size;
    let available_bytes = stats.blocks_available() as u64 * block_size;
    let used_bytes = total_bytes.saturating_sub(available_bytes);
    let used_percent = if total_bytes == 0 {
        0.0
    } else {
        (used_bytes as f64 / total_bytes as f64) * 100.0
    };
    Ok(json!({
        "total_bytes": total_bytes,
        "available_bytes": available_bytes,
        "used_bytes": used_bytes,
        "used_percent": used_percent,
        "warn_percent": config.storage.warn_percent,
        "block_percent": config.storage.block_percent,
    }))
}

fn set_retention_policy(state: &Arc<AppState>, params: Value) -> Result<Value> {
    let policy: RetentionPolicy = param(params)?;
    *state.retention_policy.write() = policy.clone();
    Ok(json!({ "updated": true, "policy": policy }))
}

async fn cleanup_old_files(state: &Arc<AppState>) -> Result<Value> {
    let policy = state.retention_policy.read().clone();
    let mut deleted_count = 0u64;
    let mut freed_bytes = 0u64;
    let now = chrono::Utc::now();

    let recordings = state.mediamtx.list_recordings(1000, 0).await?;
    for file in recordings.files {
        let too_old = policy
            .max_age_days
            .map(|days| (now - file.modified_at).num_days() >= days as i64)
            .unwrap_or(false);
        if too_old && state.mediamtx.delete_recording(&file.filename).await.is_ok() {
            deleted_count += 1;
            freed_bytes += file.size_bytes;
        }
    }

    let snapshots = state.mediamtx.list_snapshots(1000, 0).await?;
    for file in snapshots.files {
        let too_old = policy
            .max_age_days
            .map(|days| (now - file.modified_at).num_days() >= days as i64)
            .unwrap_or(false);
        if too_old && state.mediamtx.delete_snapshot(&file.filename).await.is_ok() {
            deleted_count += 1;
            freed_bytes += file.size_bytes;
        }
    }

    Ok(json!({ "deleted_count": deleted_count, "freed_bytes": freed_bytes }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_method_has_a_handler_branch() {
        for (method, _) in method_catalog() {
            assert!(is_known_method(method), "{method} missing from catalog lookup");
        }
        assert!(!is_known_method("no_such_method"));
    }

    #[test]
    fn page_params_default_to_100_and_0() {
        let params: PageParams = serde_json::from_value(json!({})).unwrap();
        assert_eq!(params.limit, 100);
        assert_eq!(params.offset, 0);
    }
}
