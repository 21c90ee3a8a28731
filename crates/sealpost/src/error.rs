//! Error taxonomy for boxing, unboxing, chain verification and delivery.
//!
//! Unboxing errors are split by whether retrying can help:
//!
//! - [`UnboxingError::Permanent`]: the record itself is bad. Callers turn it
//!   into an error message and move on.
//! - [`UnboxingError::Transient`]: the record may be fine but something it
//!   depends on (a key, the network) was not available.
//!
//! Only the deliverer retries, and only by leaving records queued.

use sealpost_config::ConfigError;
use sealpost_crypto::CryptoError;
use sealpost_outbox::OutboxError;
use sealpost_types::{HeaderHash, MessageBoxedVersion, MessageId, MessageType, OutboxId};
use thiserror::Error;

use crate::context::ContextError;

// ============================================================================
// Collaborator errors
// ============================================================================

/// Failures reported by a [`crate::KeyProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key generation {generation} not found for {domain}")]
    GenerationNotFound { domain: String, generation: u32 },

    #[error("domain {domain} needs a rekey")]
    RekeyNeeded { domain: String, self_rekey: bool },

    #[error("invalid encryption domain: {0}")]
    InvalidDomain(String),

    #[error("key lookup failed: {0}")]
    Lookup(String),
}

/// Failures reported by a [`crate::RemoteLog`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("ordering server unreachable")]
    Offline,

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("rate limited")]
    RateLimited,

    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// The server will never accept this message as composed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RemoteError::Rejected(_))
    }
}

/// Failures reported by a [`crate::LocalCache`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("message has no server header")]
    MissingServerHeader,

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("cache lock poisoned")]
    LockPoisoned,
}

// ============================================================================
// Boxing
// ============================================================================

#[derive(Debug, Error)]
pub enum BoxingError {
    #[error("blank encryption domain name")]
    BlankDomain,

    #[error("key provider returned a blank canonical name")]
    BlankCanonicalName,

    #[error("no encryption key: {0}")]
    Key(#[from] KeyError),

    #[error("envelope serialization failed: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("sealing failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("cannot box with version {0}")]
    UnsupportedVersion(MessageBoxedVersion),

    #[error("exploding messages require V2 boxing")]
    ExplodingRequiresV2,

    #[error("header type {header} does not match body type {body}")]
    TypeMismatch {
        header: MessageType,
        body: MessageType,
    },

    #[error("prev pointers are assigned by the sender")]
    PrevAlreadySet,

    #[error("sender field {0} is assigned by the sender")]
    SenderFieldSet(&'static str),

    #[error("no logged-in user")]
    LoginRequired,

    #[error("no active device")]
    DeviceRequired,
}

pub type BoxingResult<T> = std::result::Result<T, BoxingError>;

// ============================================================================
// Unboxing
// ============================================================================

/// What was wrong with a record that can never be unboxed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnboxingErrorKind {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("ciphertext version does not match wire version {0}")]
    VersionMismatch(MessageBoxedVersion),

    #[error("header could not be opened: {0}")]
    HeaderOpen(CryptoError),

    #[error("body could not be opened: {0}")]
    BodyOpen(CryptoError),

    #[error("body ciphertext missing on a live message")]
    EmptyBody,

    #[error("body hash does not match the signed header")]
    BodyHashInvalid,

    #[error("header signature invalid")]
    BadSignature,

    #[error("sealed header failed verification: {0}")]
    SealedSignature(CryptoError),

    #[error("unexpected signature layout: {0}")]
    SignatureLayout(&'static str),

    #[error("signed header disagrees with cleartext header on {field}")]
    HeaderMismatch { field: &'static str },

    #[error("header type {header} does not match body type {body}")]
    TypeMismatch {
        header: MessageType,
        body: MessageType,
    },

    #[error("sender key was not valid when the message was sent")]
    NoKey,

    #[error("sender key revoked at time zero")]
    ZeroRevocationTime,

    #[error("message belongs to another conversation")]
    ConversationMismatch,

    #[error("body replayed from message {original}")]
    Replay { original: MessageId },

    #[error("encryption domain rejected: {0}")]
    Domain(String),

    #[error("chain check failed: {0}")]
    Chain(ChainError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnboxingError {
    #[error("permanent unboxing failure: {0}")]
    Permanent(UnboxingErrorKind),

    #[error("transient unboxing failure: {reason}")]
    Transient {
        reason: String,
        needs_rekey: bool,
        needs_rekey_self: bool,
    },

    #[error(transparent)]
    Interrupted(#[from] ContextError),
}

impl UnboxingError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, UnboxingError::Permanent(_))
    }

    pub fn kind(&self) -> Option<&UnboxingErrorKind> {
        match self {
            UnboxingError::Permanent(kind) => Some(kind),
            _ => None,
        }
    }

    pub(crate) fn transient(reason: impl Into<String>) -> Self {
        UnboxingError::Transient {
            reason: reason.into(),
            needs_rekey: false,
            needs_rekey_self: false,
        }
    }
}

impl From<UnboxingErrorKind> for UnboxingError {
    fn from(kind: UnboxingErrorKind) -> Self {
        UnboxingError::Permanent(kind)
    }
}

impl From<KeyError> for UnboxingError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::GenerationNotFound { .. } => UnboxingError::Transient {
                reason: err.to_string(),
                needs_rekey: true,
                needs_rekey_self: false,
            },
            KeyError::RekeyNeeded { self_rekey, .. } => UnboxingError::Transient {
                reason: err.to_string(),
                needs_rekey: true,
                needs_rekey_self: self_rekey,
            },
            KeyError::InvalidDomain(domain) => {
                UnboxingError::Permanent(UnboxingErrorKind::Domain(domain))
            }
            KeyError::Lookup(reason) => UnboxingError::transient(reason),
        }
    }
}

pub type UnboxingResult<T> = std::result::Result<T, UnboxingError>;

// ============================================================================
// Chain
// ============================================================================

/// A contradiction in the prev-pointer graph of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("message id {0} appears twice")]
    DuplicateId(MessageId),

    #[error("message {message} points forward to {prev}")]
    OutOfOrderId { message: MessageId, prev: MessageId },

    #[error("pointers disagree on the hash of message {id}")]
    InconsistentHash {
        id: MessageId,
        first: HeaderHash,
        second: HeaderHash,
    },

    #[error("pointer to message {id} carries {claimed}, actual hash is {actual}")]
    IncorrectHash {
        id: MessageId,
        claimed: HeaderHash,
        actual: HeaderHash,
    },

    #[error(transparent)]
    Interrupted(#[from] ContextError),
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

// ============================================================================
// Sending and delivery
// ============================================================================

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Boxing(#[from] BoxingError),

    #[error("remote log: {0}")]
    Remote(#[from] RemoteError),

    #[error("reading conversation history: {0}")]
    History(#[from] UnboxingError),

    #[error("local cache: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Interrupted(#[from] ContextError),

    #[error("conversation lock poisoned")]
    LockPoisoned,
}

impl SendError {
    /// Retrying the same record cannot succeed.
    pub fn is_immediate_fail(&self) -> bool {
        match self {
            SendError::Boxing(BoxingError::Key(KeyError::GenerationNotFound { .. })) => false,
            SendError::Boxing(BoxingError::Key(KeyError::RekeyNeeded { .. })) => false,
            SendError::Boxing(BoxingError::Key(KeyError::Lookup(_))) => false,
            SendError::Boxing(_) => true,
            SendError::Remote(err) => err.is_permanent(),
            SendError::History(err) => err.is_permanent(),
            _ => false,
        }
    }
}

pub type SendResult<T> = std::result::Result<T, SendError>;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("outbox: {0}")]
    Outbox(#[from] OutboxError),

    #[error("failed to spawn delivery worker: {0}")]
    Spawn(std::io::Error),

    #[error("delivery is disabled in configuration")]
    Disabled,

    #[error("no outbox record {0}")]
    UnknownRecord(OutboxId),

    #[error(transparent)]
    Interrupted(#[from] ContextError),

    #[error("deliverer lock poisoned")]
    LockPoisoned,
}

pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

// ============================================================================
// Top level
// ============================================================================

/// Errors surfaced by [`crate::Sealpost`].
#[derive(Debug, Error)]
pub enum SealpostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("outbox: {0}")]
    Outbox(#[from] OutboxError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

pub type Result<T> = std::result::Result<T, SealpostError>;
