//! Notification hook for committed messages.
//!
//! After a successful commit the core emits `(conversation_id, message_id)`
//! through a caller-supplied notifier. Delivery to connected clients is the
//! real-time transport's responsibility, so publish is fire and forget.

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Size of the broadcast channel for message events.
const EVENT_BUFFER_SIZE: usize = 256;

/// A message that became visible in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Identifier of the committed message.
    pub message_id: String,
}

/// Sink for committed-message events.
pub trait MessageNotifier: Send + Sync {
    /// Publish an event. Must not block and must not fail the commit.
    fn publish(&self, event: MessageEvent);
}

/// Notifier fanning events out over a tokio broadcast channel.
///
/// Send errors (no receivers connected) are ignored.
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<MessageEvent>,
}

impl BroadcastNotifier {
    /// Create a new broadcast notifier.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { event_tx }
    }

    /// Subscribe to committed-message events.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageNotifier for BroadcastNotifier {
    fn publish(&self, event: MessageEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no subscribers for message event");
        }
    }
}

/// Notifier that drops every event. Useful for batch tooling.
#[derive(Debug, Default, Clone)]
pub struct NullNotifier;

impl MessageNotifier for NullNotifier {
    fn publish(&self, _event: MessageEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(MessageEvent {
            conversation_id: "conv".to_string(),
            message_id: "msg_1".to_string(),
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.message_id, "msg_1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let notifier = BroadcastNotifier::new();
        notifier.publish(MessageEvent {
            conversation_id: "conv".to_string(),
            message_id: "msg_1".to_string(),
        });

        NullNotifier.publish(MessageEvent {
            conversation_id: "conv".to_string(),
            message_id: "msg_2".to_string(),
        });
    }
}
