//! MediaMTX controller: lifecycle management of named streams/paths on
//! the external media server plus FFmpeg subprocess orchestration.

pub mod client;
pub mod controller;
pub mod ffmpeg;
pub mod files;
pub mod health;
pub mod types;

pub use client::MediaMtxClient;
pub use controller::MediaMtxController;
pub use ffmpeg::FfmpegManager;
pub use health::{CircuitBreaker, CircuitState};
pub use types::{
    FileListResponse, FileMetadata, RecordingOptions, RecordingSession, RecordingStatus,
    SnapshotFormat, SnapshotOptions, SnapshotRecord, Stream, StreamStatus, UseCase,
};
