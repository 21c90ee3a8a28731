//! Reopen and ordering behaviour shared by every outbox store.

use proptest::prelude::*;
use sealpost_outbox::{
    FIRST_ORDINAL, FailureKind, FileOutbox, MemoryOutbox, OutboxError, OutboxStore, RecordState,
};
use sealpost_types::{ConversationId, ConversationTriple, MessageBody, MessageId, MessagePlaintext};
use tempfile::tempdir;

// ============================================================================
// Test Helpers
// ============================================================================

fn plaintext(text: &str) -> MessagePlaintext {
    MessagePlaintext::new(
        ConversationTriple::default(),
        "alice,bob",
        false,
        MessageBody::text(text),
    )
}

fn body_text(plaintext: &MessagePlaintext) -> &str {
    match &plaintext.body {
        MessageBody::Text(text) => &text.body,
        other => panic!("unexpected body {other:?}"),
    }
}

fn exercise_ordering(store: &dyn OutboxStore) {
    let conv_a = ConversationId::new(1);
    let conv_b = ConversationId::new(2);
    for (conv, text) in [(conv_a, "a1"), (conv_b, "b1"), (conv_a, "a2"), (conv_b, "b2")] {
        store.push(conv, plaintext(text), MessageId::ZERO).expect("push");
    }

    let all: Vec<_> = store
        .pull_all()
        .expect("pull")
        .iter()
        .map(|r| body_text(&r.plaintext).to_string())
        .collect();
    assert_eq!(all, ["a1", "b1", "a2", "b2"]);

    let only_b: Vec<_> = store
        .pull_conversation(conv_b)
        .expect("pull")
        .iter()
        .map(|r| body_text(&r.plaintext).to_string())
        .collect();
    assert_eq!(only_b, ["b1", "b2"]);

    let popped = store.pop_oldest(1).expect("pop");
    assert_eq!(body_text(&popped[0].plaintext), "a1");
    assert_eq!(store.pending().expect("pending"), 3);
}

// ============================================================================
// Shared Behaviour
// ============================================================================

#[test]
fn memory_outbox_orders_by_enqueue() {
    exercise_ordering(&MemoryOutbox::new());
}

#[test]
fn file_outbox_orders_by_enqueue() {
    let dir = tempdir().expect("temp dir");
    let outbox = FileOutbox::open(dir.path().join("outbox.log")).expect("open");
    exercise_ordering(&outbox);
}

// ============================================================================
// Durability
// ============================================================================

#[test]
fn records_and_states_survive_reopen() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("outbox.log");

    let (kept, errored) = {
        let outbox = FileOutbox::open(&path).expect("open");
        let kept = outbox
            .push(ConversationId::new(1), plaintext("kept"), MessageId::new(4))
            .expect("push");
        let errored = outbox
            .push(ConversationId::new(1), plaintext("errored"), MessageId::new(4))
            .expect("push");
        let removed = outbox
            .push(ConversationId::new(2), plaintext("removed"), MessageId::ZERO)
            .expect("push");

        outbox
            .mark_as_error(&errored.outbox_id, FailureKind::Rejected, "too long")
            .expect("mark");
        outbox
            .remove(&removed.outbox_id)
            .expect("remove")
            .expect("record was present");
        (kept, errored)
    };

    let reopened = FileOutbox::open(&path).expect("reopen");
    let records = reopened.pull_all().expect("pull");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], kept);
    assert_eq!(records[1].outbox_id, errored.outbox_id);
    assert_eq!(
        records[1].state,
        RecordState::Error {
            kind: FailureKind::Rejected,
            message: "too long".to_string(),
        }
    );
    assert_eq!(reopened.pending().expect("pending"), 1);

    let next = reopened
        .push(ConversationId::new(1), plaintext("after"), MessageId::ZERO)
        .expect("push");
    assert_eq!(next.ordinal, FIRST_ORDINAL + 3);
    assert!(next.compose_time > errored.compose_time);
}

#[test]
fn corrupted_file_fails_to_open() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("outbox.log");
    {
        let outbox = FileOutbox::open(&path).expect("open");
        outbox
            .push(ConversationId::new(1), plaintext("hello"), MessageId::ZERO)
            .expect("push");
    }

    let mut bytes = std::fs::read(&path).expect("read");
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x5A;
    std::fs::write(&path, bytes).expect("write");

    let err = FileOutbox::open(&path).expect_err("corruption must be reported");
    assert!(err.is_corruption() || matches!(err, OutboxError::Serialization(_)), "got {err:?}");
}

#[test]
fn retry_resets_attempts() {
    let outbox = MemoryOutbox::new();
    let record = outbox
        .push(ConversationId::new(1), plaintext("x"), MessageId::ZERO)
        .expect("push");

    for _ in 0..3 {
        outbox
            .record_failed_attempt(&record.outbox_id, 3, "offline")
            .expect("attempt");
    }
    assert_eq!(outbox.pending().expect("pending"), 0);

    let retried = outbox.retry(&record.outbox_id).expect("retry");
    assert_eq!(retried.state, RecordState::Sending { attempts: 0 });
    assert_eq!(outbox.pending().expect("pending"), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn reopened_outbox_matches_written(texts in prop::collection::vec("[a-z]{0,24}", 0..12)) {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("outbox.log");

        let written = {
            let outbox = FileOutbox::open(&path).expect("open");
            for (i, text) in texts.iter().enumerate() {
                outbox
                    .push(ConversationId::new(i as u64 % 3), plaintext(text), MessageId::ZERO)
                    .expect("push");
            }
            outbox.pull_all().expect("pull")
        };

        let reopened = FileOutbox::open(&path).expect("reopen");
        prop_assert_eq!(reopened.pull_all().expect("pull"), written);
    }
}
