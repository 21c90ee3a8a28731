//! Delivery event broadcasting.
//!
//! The deliverer reports the outcome of every attempt here so a UI can move
//! a pending message to sent, show it as failed or show a retry.

use sealpost_outbox::FailureKind;
use sealpost_types::{ConversationId, MessageId, OutboxId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeliveryEvent {
    /// The server accepted the message and the record was removed.
    Sent {
        outbox_id: OutboxId,
        conv_id: ConversationId,
        message_id: MessageId,
    },
    /// The record was parked in the error state.
    Failed {
        outbox_id: OutboxId,
        conv_id: ConversationId,
        kind: FailureKind,
        message: String,
    },
    /// The attempt failed and the record stays queued.
    Retrying {
        outbox_id: OutboxId,
        conv_id: ConversationId,
        attempts: u32,
    },
}

impl DeliveryEvent {
    pub fn outbox_id(&self) -> OutboxId {
        match self {
            DeliveryEvent::Sent { outbox_id, .. }
            | DeliveryEvent::Failed { outbox_id, .. }
            | DeliveryEvent::Retrying { outbox_id, .. } => *outbox_id,
        }
    }
}

/// Fans delivery events out to subscribers.
#[derive(Debug, Clone)]
pub struct DeliveryBroadcast {
    tx: broadcast::Sender<DeliveryEvent>,
}

impl DeliveryBroadcast {
    /// Creates a broadcaster that buffers `buffer_size` events for slow
    /// subscribers.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _rx) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Sends an event to all subscribers and returns how many received it.
    ///
    /// Having no subscribers is not an error.
    pub fn send(&self, event: DeliveryEvent) -> usize {
        self.tx.send(event).unwrap_or_default()
    }

    /// Subscribes to future events. A subscriber that falls more than the
    /// buffer size behind sees `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for DeliveryBroadcast {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(n: u8) -> DeliveryEvent {
        DeliveryEvent::Sent {
            outbox_id: OutboxId::from_bytes([n; 8]),
            conv_id: ConversationId::new(1),
            message_id: MessageId::new(u64::from(n)),
        }
    }

    #[test]
    fn subscriber_receives_events() {
        let broadcast = DeliveryBroadcast::new(16);
        let mut rx = broadcast.subscribe();

        broadcast.send(sent(1));

        let received = rx.try_recv().expect("should receive event");
        assert_eq!(received, sent(1));
        assert_eq!(received.outbox_id(), OutboxId::from_bytes([1; 8]));
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let broadcast = DeliveryBroadcast::new(16);
        let mut rx1 = broadcast.subscribe();
        let mut rx2 = broadcast.subscribe();
        assert_eq!(broadcast.receiver_count(), 2);

        assert_eq!(broadcast.send(sent(2)), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn sending_without_subscribers_is_fine() {
        let broadcast = DeliveryBroadcast::default();
        assert_eq!(broadcast.send(sent(3)), 0);
    }

    #[test]
    fn lagging_subscriber_is_told() {
        let broadcast = DeliveryBroadcast::new(2);
        let mut rx = broadcast.subscribe();
        for n in 0..5 {
            broadcast.send(sent(n));
        }

        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lagged error, got {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = DeliveryEvent::Retrying {
            outbox_id: OutboxId::from_bytes([4; 8]),
            conv_id: ConversationId::new(9),
            attempts: 2,
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["type"], "retrying");
        assert_eq!(json["attempts"], 2);
    }
}
