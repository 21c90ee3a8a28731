//! Prev-pointer verification over a window of a thread.
//!
//! Every message names some earlier messages by id and header hash. Over a
//! window the verifier checks:
//!
//! - no id appears twice ([`ChainError::DuplicateId`])
//! - pointers only go backwards ([`ChainError::OutOfOrderId`])
//! - the first pointer to an id agrees with the actual header hash when the
//!   target is in the window ([`ChainError::IncorrectHash`])
//! - later pointers to the same id agree with the first one, whether or not
//!   the target is in the window ([`ChainError::InconsistentHash`])
//!
//! It also computes which messages nothing points at yet. Those become the
//! prev pointers of the next outgoing message.

use std::collections::{BTreeMap, HashMap};

use sealpost_types::{HeaderHash, MessageId, PrevPointer};
use tracing::trace;

use crate::context::RequestContext;
use crate::error::{ChainError, ChainResult};
use crate::message::{MessageUnboxed, MessageUnboxedValid};

/// Messages no other message in the window points at.
///
/// Exploding messages may point at anything, but ordinary messages never
/// point at exploding ones, so each kind of outgoing message draws from its
/// own set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnprevedSets {
    /// Ordinary messages only. Used by ordinary outgoing messages.
    pub regular: BTreeMap<MessageId, HeaderHash>,
    /// Every message. Used by exploding outgoing messages.
    pub exploding: BTreeMap<MessageId, HeaderHash>,
}

impl UnprevedSets {
    /// Prev pointers for an outgoing message, ascending by id.
    pub fn pointers_for(&self, exploding: bool) -> Vec<PrevPointer> {
        let set = if exploding {
            &self.exploding
        } else {
            &self.regular
        };
        set.iter()
            .map(|(&id, &hash)| PrevPointer { id, hash })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChainVerifier;

impl ChainVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verifies a window and returns its unpreved sets.
    ///
    /// Errored messages are skipped: they have no trustworthy header to
    /// index. Cancellation is checked once per message in each pass.
    pub fn verify(
        &self,
        ctx: &RequestContext,
        messages: &[MessageUnboxed],
    ) -> ChainResult<UnprevedSets> {
        let valid: Vec<&MessageUnboxedValid> =
            messages.iter().filter_map(MessageUnboxed::as_valid).collect();

        // Pass 1: index.
        let mut index: HashMap<MessageId, HeaderHash> = HashMap::with_capacity(valid.len());
        let mut sets = UnprevedSets::default();
        for message in &valid {
            ctx.check()?;
            let id = message.message_id();
            if index.insert(id, message.header_hash).is_some() {
                return Err(ChainError::DuplicateId(id));
            }
            sets.exploding.insert(id, message.header_hash);
            if !message.is_ephemeral() {
                sets.regular.insert(id, message.header_hash);
            }
        }

        // Pass 2: pointers.
        let mut claimed: HashMap<MessageId, HeaderHash> = HashMap::new();
        for message in &valid {
            ctx.check()?;
            let id = message.message_id();
            for prev in &message.client_header.prev {
                if prev.id >= id {
                    return Err(ChainError::OutOfOrderId {
                        message: id,
                        prev: prev.id,
                    });
                }
                // Only the first claim on an id is checked against the
                // window; later claims must agree with it.
                if let Some(&first) = claimed.get(&prev.id) {
                    if first != prev.hash {
                        return Err(ChainError::InconsistentHash {
                            id: prev.id,
                            first,
                            second: prev.hash,
                        });
                    }
                } else {
                    if let Some(&actual) = index.get(&prev.id) {
                        if actual != prev.hash {
                            return Err(ChainError::IncorrectHash {
                                id: prev.id,
                                claimed: prev.hash,
                                actual,
                            });
                        }
                    }
                    claimed.insert(prev.id, prev.hash);
                }

                sets.exploding.remove(&prev.id);
                if !message.is_ephemeral() {
                    sets.regular.remove(&prev.id);
                }
            }
        }

        trace!(
            correlation_id = %ctx.correlation_id(),
            window = messages.len(),
            regular = sets.regular.len(),
            exploding = sets.exploding.len(),
            "chain verified"
        );
        Ok(sets)
    }
}
