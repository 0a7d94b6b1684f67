//! Event system for state notifications
//!
//! Collaborators (a UI, the command-line driver) subscribe here to render the
//! session state and to prompt the user on permission or device problems.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting system events
///
/// # Example
///
/// ```no_run
/// use moto_intercom::events::{EventBus, SystemEvent};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SystemEvent::EndpointFallback {
///     role: "wired".to_string(),
///     purpose: "capture".to_string(),
/// });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    ///
    /// A subscriber that falls more than the channel capacity behind receives
    /// `Lagged` and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
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

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(SystemEvent::PermissionDenied {
            command: "start".to_string(),
            reason: "denied".to_string(),
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            SystemEvent::PermissionDenied { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SystemEvent::PermissionDenied { .. }
        ));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(SystemEvent::EndpointFallback {
            role: "wired".to_string(),
            purpose: "capture".to_string(),
        });
    }
}
