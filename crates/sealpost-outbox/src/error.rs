//! Error types for outbox storage.

use sealpost_types::OutboxId;

/// Errors raised by an [`crate::OutboxStore`].
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] postcard::Error),

    /// The frame checksum did not match its contents.
    #[error("corrupted record at byte {position}")]
    Corrupted { position: usize },

    /// A frame sentinel is missing, so the frame was never fully written.
    #[error("torn write detected: {reason}")]
    TornWrite { reason: String },

    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("not an outbox file")]
    BadPreamble,

    #[error("unsupported outbox file version {0}")]
    UnsupportedVersion(u8),

    #[error("no outbox record with id {0}")]
    NotFound(OutboxId),

    #[error("outbox id {0} is already in use")]
    DuplicateId(OutboxId),

    #[error("outbox lock poisoned")]
    LockPoisoned,
}

impl OutboxError {
    /// True when the stored data itself is damaged, as opposed to the
    /// operation failing.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            OutboxError::Corrupted { .. }
                | OutboxError::TornWrite { .. }
                | OutboxError::UnexpectedEof
                | OutboxError::BadPreamble
        )
    }
}

pub type OutboxResult<T> = Result<T, OutboxError>;
