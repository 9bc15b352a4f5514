//! Notification bus for real-time broadcast to subscribed WebSocket
//! clients.
//!
//! A topic-tagged [`Notification`] channel that the camera monitor
//! and the MediaMTX controller both publish to and the WebSocket
//! server's connection tasks subscribe from.

pub mod types;

pub use types::Notification;

use tokio::sync::broadcast;

/// Ring-buffer capacity; a slow subscriber that falls behind this many
/// notifications observes a `Lagged` error on its next `recv` rather
/// than blocking publishers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Global notification bus. Publishing with no subscribers is a
/// deliberate no-op, not an error.
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediamtx::RecordingStatus;

    fn sample() -> Notification {
        Notification::RecordingStatusUpdate {
            device: "/dev/video0".to_string(),
            recording_id: "abc".to_string(),
            status: RecordingStatus::Active,
            filename: "clip.mp4".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_is_delivered_to_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(sample());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic(), "recording_status_update");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish(sample());
        assert_eq!(rx1.recv().await.unwrap().topic(), "recording_status_update");
        assert_eq!(rx2.recv().await.unwrap().topic(), "recording_status_update");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(sample());
    }
}
