//! Notification types broadcast to subscribed WebSocket clients.

use serde::{Deserialize, Serialize};

use crate::camera::CameraEvent;
use crate::mediamtx::RecordingStatus;

/// A notification pushed to every connection subscribed to its topic.
/// Broadcast is best-effort and carries no cross-client ordering
/// guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Notification {
    /// Mirrors a [`CameraEvent`] emitted by the camera monitor.
    CameraEvent { event: CameraEvent },
    /// Recording lifecycle change, pushed when a recording session
    /// starts, stops, or fails.
    RecordingStatusUpdate {
        device: String,
        recording_id: String,
        status: RecordingStatus,
        filename: String,
    },
}

impl Notification {
    /// The topic name a client subscribes to in order to receive this
    /// notification: `recording_status_update` or `camera_event`.
    pub fn topic(&self) -> &'static str {
        match self {
            Notification::CameraEvent { .. } => "camera_event",
            Notification::RecordingStatusUpdate { .. } => "recording_status_update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraDevice, CameraEventKind, Capabilities, DeviceStatus};
    use chrono::Utc;

    #[test]
    fn camera_event_notification_reports_its_topic() {
        let notification = Notification::CameraEvent {
            event: CameraEvent {
                device_path: "/dev/video0".to_string(),
                kind: CameraEventKind::Connected,
                timestamp: Utc::now(),
                device: CameraDevice {
                    path: "/dev/video0".to_string(),
                    device_num: 0,
                    name: "cam0".to_string(),
                    status: DeviceStatus::Connected,
                    capabilities: Capabilities::default(),
                    formats: vec![],
                    last_seen: Utc::now(),
                },
            },
        };
        assert_eq!(notification.topic(), "camera_event");
    }

    #[test]
    fn recording_status_update_reports_its_topic() {
        let notification = Notification::RecordingStatusUpdate {
            device: "/dev/video0".to_string(),
            recording_id: "abc".to_string(),
            status: RecordingStatus::Stopped,
            filename: "video0_20260101T000000.mp4".to_string(),
        };
        assert_eq!(notification.topic(), "recording_status_update");
    }

    #[test]
    fn notification_round_trips_through_json() {
        let notification = Notification::RecordingStatusUpdate {
            device: "/dev/video0".to_string(),
            recording_id: "abc".to_string(),
            status: RecordingStatus::Active,
            filename: "clip.mp4".to_string(),
        };
        let json = serde_json::to_string(&notification).unwrap();
        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(back.topic(), notification.topic());
    }
}
