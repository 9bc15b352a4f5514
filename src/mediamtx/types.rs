//! MediaMTX-facing data model: `Stream`, `RecordingSession`,
//! `FileMetadata`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Use case a stream was created for; selects the name suffix and the
/// FFmpeg argv template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    Recording,
    Viewing,
    Snapshot,
}

impl UseCase {
    /// Derives the deterministic stream name for `/dev/videoN`.
    pub fn stream_name(self, device_num: u32) -> String {
        match self {
            UseCase::Recording => format!("camera{device_num}"),
            UseCase::Viewing => format!("camera{device_num}_viewing"),
            UseCase::Snapshot => format!("camera{device_num}_snapshot"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Starting,
    Ready,
    Stopped,
    Failed,
}

/// A named stream on the media server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Stream {
    pub name: String,
    pub source: String,
    pub status: StreamStatus,
    pub viewer_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Active,
    Stopped,
    Failed,
}

/// A recording session. Invariant: a session in `Stopped`/`Failed`
/// is immutable; `RecordingController` enforces at most one `Active`
/// session per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecordingSession {
    pub id: String,
    pub device_path: String,
    pub filename: String,
    pub start_time: DateTime<Utc>,
    pub status: RecordingStatus,
    /// Filled on stop. 64-bit integer everywhere; no floating-point
    /// sizes.
    pub size_bytes: Option<u64>,
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SnapshotRecord {
    pub id: String,
    pub device_path: String,
    pub filename: String,
    pub taken_at: DateTime<Utc>,
}

/// File metadata returned by file-browsing operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileMetadata {
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub duration_secs: Option<u64>,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileListResponse {
    pub files: Vec<FileMetadata>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Recording/snapshot advanced options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct RecordingOptions {
    pub format: Option<String>,
    pub codec: Option<String>,
    pub segment_duration: Option<u64>,
    pub max_segments: Option<u32>,
    pub max_size_bytes: Option<u64>,
    pub duration_seconds: Option<u64>,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    Jpeg,
    Png,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SnapshotOptions {
    pub format: Option<SnapshotFormat>,
    pub quality: Option<u32>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            format: None,
            quality: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_case_names_follow_the_suffix_rule() {
        assert_eq!(UseCase::Recording.stream_name(0), "camera0");
        assert_eq!(UseCase::Viewing.stream_name(0), "camera0_viewing");
        assert_eq!(UseCase::Snapshot.stream_name(0), "camera0_snapshot");
    }

    #[test]
    fn file_metadata_round_trips_through_json() {
        let meta = FileMetadata {
            filename: "clip.mp4".to_string(),
            size_bytes: 1024,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            duration_secs: Some(30),
            download_url: "/files/recordings/clip.mp4".to_string(),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: FileMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }
}
