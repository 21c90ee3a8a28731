//! The outbox storage contract.

use sealpost_types::{ConversationId, MessageId, MessagePlaintext, OutboxId};

use crate::{FailureKind, OutboxRecord, OutboxResult, RecordState};

/// Durable queue of messages waiting to be posted.
///
/// Every mutating call is durable when it returns: a crash afterwards leaves
/// either the old or the new contents, never a mix. Records come back in drain
/// order (compose time, then ordinal).
pub trait OutboxStore: Send + Sync {
    /// Persists a new record in the [`RecordState::Sending`] state.
    fn push(
        &self,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> OutboxResult<OutboxRecord>;

    /// Every record, in drain order.
    fn pull_all(&self) -> OutboxResult<Vec<OutboxRecord>>;

    fn pull_conversation(&self, conv_id: ConversationId) -> OutboxResult<Vec<OutboxRecord>>;

    /// Removes and returns up to `n` of the oldest records.
    fn pop_oldest(&self, n: usize) -> OutboxResult<Vec<OutboxRecord>>;

    /// Removes a record. Returns `None` when it was already gone.
    fn remove(&self, outbox_id: &OutboxId) -> OutboxResult<Option<OutboxRecord>>;

    fn set_state(&self, outbox_id: &OutboxId, state: RecordState) -> OutboxResult<OutboxRecord>;

    /// See [`crate::RecordSet::record_failed_attempt`].
    fn record_failed_attempt(
        &self,
        outbox_id: &OutboxId,
        max_attempts: u32,
        message: &str,
    ) -> OutboxResult<OutboxRecord>;

    fn mark_conversation_as_error(
        &self,
        conv_id: ConversationId,
        kind: FailureKind,
        message: &str,
    ) -> OutboxResult<Vec<OutboxRecord>>;

    /// Parks one record in the error state.
    fn mark_as_error(
        &self,
        outbox_id: &OutboxId,
        kind: FailureKind,
        message: &str,
    ) -> OutboxResult<OutboxRecord> {
        self.set_state(
            outbox_id,
            RecordState::Error {
                kind,
                message: message.to_string(),
            },
        )
    }

    /// Puts an errored record back in line with a fresh attempt budget.
    fn retry(&self, outbox_id: &OutboxId) -> OutboxResult<OutboxRecord> {
        self.set_state(outbox_id, RecordState::Sending { attempts: 0 })
    }

    /// Number of records still waiting to be sent.
    fn pending(&self) -> OutboxResult<usize> {
        Ok(self
            .pull_all()?
            .iter()
            .filter(|r| r.state.is_sending())
            .count())
    }
}
