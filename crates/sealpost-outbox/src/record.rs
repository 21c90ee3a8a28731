//! Outbox records and their delivery state.

use serde::{Deserialize, Serialize};

use sealpost_types::{ConversationId, MessageId, MessagePlaintext, OutboxId, Timestamp};

/// Ordinal assigned to the first record of a fresh outbox.
pub const FIRST_ORDINAL: u64 = 100;

/// Why a record was parked in the error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Unclassified failure; retrying may succeed.
    Misc,
    /// The record failed `max_attempts` times in a row.
    TooManyAttempts,
    /// The message can never be delivered as composed.
    Rejected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Misc => f.write_str("misc"),
            FailureKind::TooManyAttempts => f.write_str("too many attempts"),
            FailureKind::Rejected => f.write_str("rejected"),
        }
    }
}

/// Delivery state of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    /// Waiting for the deliverer. `attempts` counts failed sends so far.
    Sending { attempts: u32 },
    /// Parked until the user retries or cancels.
    Error { kind: FailureKind, message: String },
}

impl RecordState {
    pub fn is_sending(&self) -> bool {
        matches!(self, RecordState::Sending { .. })
    }
}

/// A message waiting to be posted.
///
/// The plaintext is never mutated once stored; only `state` is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub outbox_id: OutboxId,
    pub conv_id: ConversationId,
    pub plaintext: MessagePlaintext,
    /// Newest message id the composer had seen, used as a fallback prev.
    pub prev_hint: MessageId,
    pub compose_time: Timestamp,
    pub ordinal: u64,
    pub state: RecordState,
}

impl OutboxRecord {
    /// Sort key for the global drain order.
    pub fn order_key(&self) -> (Timestamp, u64) {
        (self.compose_time, self.ordinal)
    }

    pub fn attempts(&self) -> u32 {
        match self.state {
            RecordState::Sending { attempts } => attempts,
            RecordState::Error { .. } => 0,
        }
    }
}
