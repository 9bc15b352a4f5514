//! Camera data model: `CameraDevice`, `CameraEvent`, `MonitorStats`,
//! capability/format records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection status of a probed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Error,
}

/// V4L2 capability flags and identity fields parsed from `--info`
/// output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Capabilities {
    pub driver_name: String,
    pub card_name: String,
    pub bus_info: String,
    pub driver_version: String,
    pub capabilities: Vec<String>,
}

/// One pixel-format × resolution × frame-rate entry parsed from
/// `--list-formats-ext` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Format {
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub frame_rates: Vec<String>,
}

impl Format {
    pub fn as_label(&self) -> String {
        format!(
            "{} {}x{} @ {}",
            self.pixel_format,
            self.width,
            self.height,
            self.frame_rates.join(",")
        )
    }
}

/// A single discovered video-capture device.
///
/// Invariant: the key under which this value is stored in the device
/// map always equals `path`; `device_num` is non-negative (it is a
/// `u32`, so this holds by construction); a `Connected` device has
/// non-empty `capabilities.driver_name` and `capabilities.card_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CameraDevice {
    pub path: String,
    pub device_num: u32,
    pub name: String,
    pub status: DeviceStatus,
    pub capabilities: Capabilities,
    pub formats: Vec<Format>,
    pub last_seen: DateTime<Utc>,
}

impl CameraDevice {
    pub fn device_num_from_path(path: &str) -> Option<u32> {
        path.rsplit("video").next()?.parse().ok()
    }

    pub fn canonical_path(device_num: u32) -> String {
        format!("/dev/video{device_num}")
    }

    /// Invariant check used by tests and debug assertions: a connected
    /// device must carry identifying capability fields.
    pub fn satisfies_connected_invariant(&self) -> bool {
        if self.status != DeviceStatus::Connected {
            return true;
        }
        !self.capabilities.driver_name.is_empty() && !self.capabilities.card_name.is_empty()
    }
}

/// Kind of change carried by a [`CameraEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraEventKind {
    Connected,
    Disconnected,
    StatusChanged,
}

/// A point-in-time record of a device state change, carrying a
/// snapshot of the device at the moment of the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CameraEvent {
    pub device_path: String,
    pub kind: CameraEventKind,
    pub timestamp: DateTime<Utc>,
    pub device: CameraDevice,
}

/// Running counters for the camera monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorStats {
    pub running: bool,
    pub active_probe_tasks: usize,
    pub polling_cycles: u64,
    pub device_state_changes: u64,
    pub capability_probes_attempted: u64,
    pub capability_probes_succeeded: u64,
    pub capability_timeouts: u64,
    pub capability_parse_errors: u64,
    pub polling_failure_count: u64,
    pub current_poll_interval_secs: f64,
    pub known_device_count: usize,
}

/// Default fallback format table used when capability probing fails
/// after exhausting retries.
pub fn default_formats() -> Vec<Format> {
    vec![
        Format {
            pixel_format: "YUYV".to_string(),
            width: 640,
            height: 480,
            frame_rates: vec!["30".to_string(), "25".to_string()],
        },
        Format {
            pixel_format: "MJPG".to_string(),
            width: 1280,
            height: 720,
            frame_rates: vec!["30".to_string(), "25".to_string(), "15".to_string()],
        },
    ]
}

/// Snapshot returned by `getConnectedCameras()`; an owned, independent
/// copy so callers can never observe monitor-internal mutation.
pub type DeviceMap = HashMap<String, CameraDevice>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_num_parses_from_path() {
        assert_eq!(CameraDevice::device_num_from_path("/dev/video0"), Some(0));
        assert_eq!(CameraDevice::device_num_from_path("/dev/video12"), Some(12));
        assert_eq!(CameraDevice::device_num_from_path("/dev/nonsense"), None);
    }

    #[test]
    fn connected_invariant_requires_identity_fields() {
        let mut device = CameraDevice {
            path: "/dev/video0".to_string(),
            device_num: 0,
            name: "cam0".to_string(),
            status: DeviceStatus::Connected,
            capabilities: Capabilities::default(),
            formats: vec![],
            last_seen: Utc::now(),
        };
        assert!(!device.satisfies_connected_invariant());
        device.capabilities.driver_name = "uvcvideo".to_string();
        device.capabilities.card_name = "USB Camera".to_string();
        assert!(device.satisfies_connected_invariant());
    }

    #[test]
    fn json_round_trip_preserves_public_fields() {
        let event = CameraEvent {
            device_path: "/dev/video0".to_string(),
            kind: CameraEventKind::Connected,
            timestamp: Utc::now(),
            device: CameraDevice {
                path: "/dev/video0".to_string(),
                device_num: 0,
                name: "cam0".to_string(),
                status: DeviceStatus::Connected,
                capabilities: Capabilities::default(),
                formats: default_formats(),
                last_seen: Utc::now(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: CameraEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
