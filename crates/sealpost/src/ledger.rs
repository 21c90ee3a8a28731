//! Cross-message invariants on the read path.
//!
//! The chain verifier only sees one window at a time. The ledger remembers
//! what earlier windows said so a server cannot show different histories to
//! different reads:
//!
//! - a body hash belongs to exactly one message (replay detection)
//! - a message id has one header hash, whether learned by unboxing the
//!   message or from a prev pointer that names it

use std::collections::HashMap;
use std::sync::Mutex;

use sealpost_types::{BodyHash, ConversationTriple, HeaderHash, MessageId};

use crate::error::{ChainError, UnboxingError, UnboxingErrorKind, UnboxingResult};
use crate::message::MessageUnboxedValid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashSource {
    /// Computed from the message's own ciphertext.
    Actual,
    /// Asserted by a prev pointer in another message.
    Claimed,
}

#[derive(Debug, Default)]
struct LedgerState {
    bodies: HashMap<BodyHash, (ConversationTriple, MessageId)>,
    headers: HashMap<(ConversationTriple, MessageId), (HeaderHash, HashSource)>,
}

#[derive(Debug, Default)]
pub struct InvariantLedger {
    state: Mutex<LedgerState>,
}

impl InvariantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `message` against everything seen so far, then records it.
    ///
    /// Nothing is recorded when a check fails.
    pub fn check_and_record(
        &self,
        conv: &ConversationTriple,
        message: &MessageUnboxedValid,
    ) -> UnboxingResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| UnboxingError::transient("ledger lock poisoned"))?;
        let id = message.message_id();

        if let Some(&(seen_conv, original)) = state.bodies.get(&message.body_hash) {
            if (seen_conv, original) != (*conv, id) {
                return Err(UnboxingErrorKind::Replay { original }.into());
            }
        }

        if let Some(&(known, source)) = state.headers.get(&(*conv, id)) {
            if known != message.header_hash {
                let err = match source {
                    HashSource::Actual => ChainError::InconsistentHash {
                        id,
                        first: known,
                        second: message.header_hash,
                    },
                    HashSource::Claimed => ChainError::IncorrectHash {
                        id,
                        claimed: known,
                        actual: message.header_hash,
                    },
                };
                return Err(UnboxingErrorKind::Chain(err).into());
            }
        }

        for prev in &message.client_header.prev {
            if let Some(&(known, source)) = state.headers.get(&(*conv, prev.id)) {
                if known != prev.hash {
                    let err = match source {
                        HashSource::Actual => ChainError::IncorrectHash {
                            id: prev.id,
                            claimed: prev.hash,
                            actual: known,
                        },
                        HashSource::Claimed => ChainError::InconsistentHash {
                            id: prev.id,
                            first: known,
                            second: prev.hash,
                        },
                    };
                    return Err(UnboxingErrorKind::Chain(err).into());
                }
            }
        }

        state.bodies.insert(message.body_hash, (*conv, id));
        state
            .headers
            .insert((*conv, id), (message.header_hash, HashSource::Actual));
        for prev in &message.client_header.prev {
            state
                .headers
                .entry((*conv, prev.id))
                .or_insert((prev.hash, HashSource::Claimed));
        }
        Ok(())
    }
}
