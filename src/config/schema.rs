//! Configuration record consumed by every component.
//!
//! Every section derives `Default` and is decorated with
//! `#[serde(default)]` so a partial YAML document is always legal.

use serde::{Deserialize, Serialize};

/// Top-level configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mediamtx: MediaMtxConfig,
    pub camera: CameraConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub recording: RecordingConfig,
    pub snapshots: SnapshotsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            mediamtx: MediaMtxConfig::default(),
            camera: CameraConfig::default(),
            security: SecurityConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            recording: RecordingConfig::default(),
            snapshots: SnapshotsConfig::default(),
        }
    }
}

/// `server.*` — WebSocket/JSON-RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub websocket_path: String,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub pong_wait_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
            websocket_path: "/ws".to_string(),
            max_connections: 1000,
            max_message_size: 1024 * 1024,
            read_timeout_secs: 5,
            write_timeout_secs: 1,
            ping_interval_secs: 30,
            pong_wait_secs: 60,
        }
    }
}

/// `mediamtx.*` — media server endpoints, health supervision and
/// subprocess timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaMtxConfig {
    pub host: String,
    pub api_port: u16,
    pub rtsp_port: u16,
    pub webrtc_port: u16,
    pub hls_port: u16,
    pub config_path: String,
    pub recordings_path: String,
    pub snapshots_path: String,
    pub health_check_interval_secs: u64,
    pub health_failure_threshold: u32,
    pub health_circuit_breaker_timeout_secs: u64,
    pub health_max_backoff_interval_secs: u64,
    pub health_recovery_confirmation_threshold: u32,
    pub backoff_base_multiplier: f64,
    pub process_termination_timeout_secs: u64,
    pub process_kill_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for MediaMtxConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            api_port: 9997,
            rtsp_port: 8554,
            webrtc_port: 8889,
            hls_port: 8888,
            config_path: "/etc/mediamtx/mediamtx.yml".to_string(),
            recordings_path: "/var/lib/camera-service/recordings".to_string(),
            snapshots_path: "/var/lib/camera-service/snapshots".to_string(),
            health_check_interval_secs: 10,
            health_failure_threshold: 3,
            health_circuit_breaker_timeout_secs: 30,
            health_max_backoff_interval_secs: 60,
            health_recovery_confirmation_threshold: 2,
            backoff_base_multiplier: 2.0,
            process_termination_timeout_secs: 5,
            process_kill_timeout_secs: 2,
            request_timeout_secs: 10,
        }
    }
}

impl MediaMtxConfig {
    pub fn api_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.api_port)
    }
}

/// `camera.*` — device discovery and capability probing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub poll_interval_secs: u64,
    pub max_backoff_interval_secs: u64,
    pub detection_timeout_secs: u64,
    pub device_range: Vec<u32>,
    pub enable_capability_detection: bool,
    pub auto_start_streams: bool,
    pub capability_timeout_secs: u64,
    pub capability_retry_interval_secs: u64,
    pub capability_max_retries: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_backoff_interval_secs: 60,
            detection_timeout_secs: 10,
            device_range: (0..10).collect(),
            enable_capability_detection: true,
            auto_start_streams: false,
            capability_timeout_secs: 5,
            capability_retry_interval_secs: 1,
            capability_max_retries: 2,
        }
    }
}

/// `security.*` — JWT secret and rate-limit defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub jwt_secret_key: String,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub session_timeout_secs: u64,
    pub session_cleanup_interval_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret_key: String::new(),
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            session_timeout_secs: 3600,
            session_cleanup_interval_secs: 60,
        }
    }
}

/// `storage.*` — disk space guard thresholds used by the
/// `InsufficientStorage` error path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub warn_percent: f64,
    pub block_percent: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            warn_percent: 80.0,
            block_percent: 95.0,
        }
    }
}

/// `logging.*` — process-level logging setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    pub file_path: String,
    pub console_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file_enabled: false,
            file_path: "/var/log/camera-service/camera-service.log".to_string(),
            console_enabled: true,
        }
    }
}

/// `recording.*` — default recording options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub format: String,
    pub quality: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: "mp4".to_string(),
            quality: "high".to_string(),
        }
    }
}

/// `snapshots.*` — default snapshot options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotsConfig {
    pub enabled: bool,
    pub format: String,
    pub quality: u32,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: "jpeg".to_string(),
            quality: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let cfg = AppConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = "server:\n  port: 9000\n";
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.camera.device_range.len(), 10);
    }
}
