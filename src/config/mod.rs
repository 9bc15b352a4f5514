//! Configuration record and loader, including file-watch hot reload.

mod schema;
mod store;

pub use schema::{
    AppConfig, CameraConfig, LoggingConfig, MediaMtxConfig, RecordingConfig, SecurityConfig,
    ServerConfig, SnapshotsConfig, StorageConfig,
};
pub use store::{hot_reload_enabled, ConfigChange, ConfigStore};
