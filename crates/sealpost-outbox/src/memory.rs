//! Process-local outbox.

use std::sync::Mutex;

use sealpost_types::{ConversationId, MessageId, MessagePlaintext, OutboxId};

use crate::{
    FailureKind, OutboxError, OutboxRecord, OutboxResult, OutboxStore, RecordSet, RecordState,
};

/// An [`OutboxStore`] that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    records: Mutex<RecordSet>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<R>(&self, f: impl FnOnce(&mut RecordSet) -> R) -> OutboxResult<R> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| OutboxError::LockPoisoned)?;
        Ok(f(&mut records))
    }
}

impl OutboxStore for MemoryOutbox {
    fn push(
        &self,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> OutboxResult<OutboxRecord> {
        self.with_records(|set| set.push(conv_id, plaintext, prev_hint))?
    }

    fn pull_all(&self) -> OutboxResult<Vec<OutboxRecord>> {
        self.with_records(|set| set.records().to_vec())
    }

    fn pull_conversation(&self, conv_id: ConversationId) -> OutboxResult<Vec<OutboxRecord>> {
        self.with_records(|set| set.pull_conversation(conv_id))
    }

    fn pop_oldest(&self, n: usize) -> OutboxResult<Vec<OutboxRecord>> {
        self.with_records(|set| set.pop_oldest(n))
    }

    fn remove(&self, outbox_id: &OutboxId) -> OutboxResult<Option<OutboxRecord>> {
        self.with_records(|set| set.remove(outbox_id))
    }

    fn set_state(&self, outbox_id: &OutboxId, state: RecordState) -> OutboxResult<OutboxRecord> {
        self.with_records(|set| set.set_state(outbox_id, state))?
    }

    fn record_failed_attempt(
        &self,
        outbox_id: &OutboxId,
        max_attempts: u32,
        message: &str,
    ) -> OutboxResult<OutboxRecord> {
        self.with_records(|set| set.record_failed_attempt(outbox_id, max_attempts, message))?
    }

    fn mark_conversation_as_error(
        &self,
        conv_id: ConversationId,
        kind: FailureKind,
        message: &str,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        self.with_records(|set| set.mark_conversation_as_error(conv_id, kind, message))
    }
}
