//! Ordered in-memory record collection shared by every store.

use sealpost_types::{
    ConversationId, MessageId, MessagePlaintext, OutboxId, OutboxInfo, Timestamp,
};

use crate::{FIRST_ORDINAL, FailureKind, OutboxError, OutboxRecord, OutboxResult, RecordState};

/// Records in drain order plus the next ordinal to hand out.
///
/// # Invariants
///
/// - `records` is sorted by [`OutboxRecord::order_key`]
/// - `next_ordinal` is greater than every stored ordinal
#[derive(Debug, Clone)]
pub struct RecordSet {
    records: Vec<OutboxRecord>,
    next_ordinal: u64,
}

impl RecordSet {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_ordinal: FIRST_ORDINAL,
        }
    }

    /// Rebuilds a set from records loaded off disk.
    pub fn from_records(mut records: Vec<OutboxRecord>) -> Self {
        records.sort_by_key(OutboxRecord::order_key);
        let next_ordinal = records
            .iter()
            .map(|r| r.ordinal + 1)
            .max()
            .unwrap_or(FIRST_ORDINAL)
            .max(FIRST_ORDINAL);
        Self {
            records,
            next_ordinal,
        }
    }

    pub fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a new record and stamps the plaintext with its outbox id and
    /// delivery metadata.
    ///
    /// Compose times are monotonic within a set, so drain order equals
    /// enqueue order even when the wall clock stalls. A caller-supplied
    /// outbox id that is already stored is rejected.
    pub fn push(
        &mut self,
        conv_id: ConversationId,
        mut plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> OutboxResult<OutboxRecord> {
        let outbox_id = match plaintext.client_header.outbox_id {
            Some(id) if self.get(&id).is_some() => return Err(OutboxError::DuplicateId(id)),
            Some(id) => id,
            None => self.unused_id(),
        };
        let last = self.records.iter().map(|r| r.compose_time).max();
        let compose_time = Timestamp::now_monotonic(last);

        plaintext.client_header.outbox_id = Some(outbox_id);
        plaintext.client_header.outbox_info = Some(OutboxInfo {
            prev_msg_id: prev_hint,
            compose_time,
        });

        let record = OutboxRecord {
            outbox_id,
            conv_id,
            plaintext,
            prev_hint,
            compose_time,
            ordinal: self.next_ordinal,
            state: RecordState::Sending { attempts: 0 },
        };
        self.next_ordinal += 1;
        self.records.push(record.clone());

        debug_assert!(
            self.records
                .windows(2)
                .all(|w| w[0].order_key() <= w[1].order_key()),
            "records out of order after push"
        );
        Ok(record)
    }

    fn unused_id(&self) -> OutboxId {
        loop {
            let id = OutboxId::generate();
            if self.get(&id).is_none() {
                return id;
            }
        }
    }

    pub fn get(&self, outbox_id: &OutboxId) -> Option<&OutboxRecord> {
        self.records.iter().find(|r| &r.outbox_id == outbox_id)
    }

    pub fn pull_conversation(&self, conv_id: ConversationId) -> Vec<OutboxRecord> {
        self.records
            .iter()
            .filter(|r| r.conv_id == conv_id)
            .cloned()
            .collect()
    }

    /// Removes and returns up to `n` of the oldest records.
    pub fn pop_oldest(&mut self, n: usize) -> Vec<OutboxRecord> {
        let n = n.min(self.records.len());
        self.records.drain(..n).collect()
    }

    pub fn remove(&mut self, outbox_id: &OutboxId) -> Option<OutboxRecord> {
        let index = self.records.iter().position(|r| &r.outbox_id == outbox_id)?;
        Some(self.records.remove(index))
    }

    pub fn set_state(
        &mut self,
        outbox_id: &OutboxId,
        state: RecordState,
    ) -> OutboxResult<OutboxRecord> {
        let record = self
            .records
            .iter_mut()
            .find(|r| &r.outbox_id == outbox_id)
            .ok_or(OutboxError::NotFound(*outbox_id))?;
        record.state = state;
        Ok(record.clone())
    }

    /// Counts one failed send. After `max_attempts` failures the record is
    /// parked as [`FailureKind::TooManyAttempts`].
    ///
    /// Records already in the error state are returned unchanged.
    pub fn record_failed_attempt(
        &mut self,
        outbox_id: &OutboxId,
        max_attempts: u32,
        message: &str,
    ) -> OutboxResult<OutboxRecord> {
        let record = self
            .records
            .iter_mut()
            .find(|r| &r.outbox_id == outbox_id)
            .ok_or(OutboxError::NotFound(*outbox_id))?;

        if let RecordState::Sending { attempts } = record.state {
            let attempts = attempts.saturating_add(1);
            record.state = if attempts >= max_attempts {
                RecordState::Error {
                    kind: FailureKind::TooManyAttempts,
                    message: message.to_string(),
                }
            } else {
                RecordState::Sending { attempts }
            };
        }
        Ok(record.clone())
    }

    /// Parks every still-sending record of a conversation in the error
    /// state. Returns the records it changed; ones already parked keep their
    /// original error.
    pub fn mark_conversation_as_error(
        &mut self,
        conv_id: ConversationId,
        kind: FailureKind,
        message: &str,
    ) -> Vec<OutboxRecord> {
        self.records
            .iter_mut()
            .filter(|r| r.conv_id == conv_id && r.state.is_sending())
            .map(|r| {
                r.state = RecordState::Error {
                    kind,
                    message: message.to_string(),
                };
                r.clone()
            })
            .collect()
    }
}

impl Default for RecordSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealpost_types::{ConversationTriple, MessageBody};

    fn plaintext(text: &str) -> MessagePlaintext {
        MessagePlaintext::new(
            ConversationTriple::default(),
            "alice,bob",
            false,
            MessageBody::text(text),
        )
    }

    fn push(set: &mut RecordSet, conv: u64, text: &str, prev_hint: MessageId) -> OutboxRecord {
        set.push(ConversationId::new(conv), plaintext(text), prev_hint).expect("push")
    }

    #[test]
    fn push_assigns_increasing_ordinals_and_stamps_plaintext() {
        let mut set = RecordSet::new();
        let first = push(&mut set, 1, "a", MessageId::new(7));
        let second = push(&mut set, 1, "b", MessageId::ZERO);

        assert_eq!(first.ordinal, FIRST_ORDINAL);
        assert_eq!(second.ordinal, FIRST_ORDINAL + 1);
        assert!(first.compose_time < second.compose_time);

        let header = &first.plaintext.client_header;
        assert_eq!(header.outbox_id, Some(first.outbox_id));
        let info = header.outbox_info.expect("outbox info stamped");
        assert_eq!(info.prev_msg_id, MessageId::new(7));
        assert_eq!(info.compose_time, first.compose_time);
    }

    #[test]
    fn push_keeps_caller_outbox_id() {
        let mut set = RecordSet::new();
        let mut pt = plaintext("a");
        let id = OutboxId::from_bytes([9; 8]);
        pt.client_header.outbox_id = Some(id);

        let record = set
            .push(ConversationId::new(1), pt.clone(), MessageId::ZERO)
            .expect("push");
        assert_eq!(record.outbox_id, id);

        assert!(matches!(
            set.push(ConversationId::new(2), pt, MessageId::ZERO),
            Err(OutboxError::DuplicateId(dup)) if dup == id
        ));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn generated_ids_are_unique() {
        let mut set = RecordSet::new();
        let ids: std::collections::HashSet<OutboxId> = (0..64)
            .map(|_| push(&mut set, 1, "a", MessageId::ZERO).outbox_id)
            .collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn from_records_restores_order_and_next_ordinal() {
        let mut set = RecordSet::new();
        for text in ["a", "b", "c"] {
            push(&mut set, 1, text, MessageId::ZERO);
        }
        let mut shuffled = set.records().to_vec();
        shuffled.reverse();

        let mut restored = RecordSet::from_records(shuffled);
        assert_eq!(restored.records(), set.records());

        let next = push(&mut restored, 1, "d", MessageId::ZERO);
        assert_eq!(next.ordinal, FIRST_ORDINAL + 3);
    }

    #[test]
    fn pop_oldest_drains_front() {
        let mut set = RecordSet::new();
        let a = push(&mut set, 1, "a", MessageId::ZERO);
        let b = push(&mut set, 2, "b", MessageId::ZERO);
        push(&mut set, 1, "c", MessageId::ZERO);

        let popped = set.pop_oldest(2);
        assert_eq!(popped, vec![a, b]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.pop_oldest(10).len(), 1);
        assert!(set.pop_oldest(1).is_empty());
    }

    #[test]
    fn failed_attempts_park_record_at_limit() {
        let mut set = RecordSet::new();
        let record = push(&mut set, 1, "a", MessageId::ZERO);

        let after_one = set
            .record_failed_attempt(&record.outbox_id, 2, "offline")
            .expect("record exists");
        assert_eq!(after_one.state, RecordState::Sending { attempts: 1 });

        let after_two = set
            .record_failed_attempt(&record.outbox_id, 2, "offline")
            .expect("record exists");
        assert_eq!(
            after_two.state,
            RecordState::Error {
                kind: FailureKind::TooManyAttempts,
                message: "offline".to_string(),
            }
        );

        let retried = set
            .set_state(&record.outbox_id, RecordState::Sending { attempts: 0 })
            .expect("record exists");
        assert!(retried.state.is_sending());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let mut set = RecordSet::new();
        let missing = OutboxId::from_bytes([1; 8]);
        assert!(matches!(
            set.record_failed_attempt(&missing, 3, "x"),
            Err(OutboxError::NotFound(id)) if id == missing
        ));
        assert!(set.remove(&missing).is_none());
    }

    #[test]
    fn mark_conversation_as_error_only_touches_that_conversation() {
        let mut set = RecordSet::new();
        push(&mut set, 1, "a", MessageId::ZERO);
        push(&mut set, 2, "b", MessageId::ZERO);
        push(&mut set, 1, "c", MessageId::ZERO);

        let marked =
            set.mark_conversation_as_error(ConversationId::new(1), FailureKind::Rejected, "gone");
        assert_eq!(marked.len(), 2);
        assert!(set.pull_conversation(ConversationId::new(2))[0].state.is_sending());
        assert!(
            set.pull_conversation(ConversationId::new(1))
                .iter()
                .all(|r| !r.state.is_sending())
        );
    }

    #[test]
    fn mark_conversation_as_error_keeps_earlier_failures() {
        let mut set = RecordSet::new();
        let first = push(&mut set, 1, "a", MessageId::ZERO);
        push(&mut set, 1, "b", MessageId::ZERO);
        set.record_failed_attempt(&first.outbox_id, 1, "timeout")
            .expect("record exists");

        let marked = set.mark_conversation_as_error(
            ConversationId::new(1),
            FailureKind::TooManyAttempts,
            "earlier message failed",
        );

        assert_eq!(marked.len(), 1);
        assert_eq!(
            set.get(&first.outbox_id).expect("kept").state,
            RecordState::Error {
                kind: FailureKind::TooManyAttempts,
                message: "timeout".to_string(),
            }
        );
    }
}
