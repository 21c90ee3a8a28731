//! # Sealpost
//!
//! Authenticated, hash-chained chat messages with reliable delivery.
//!
//! Every message is sealed under its conversation's key and signed by the
//! sending device. Each message also names the header hashes of earlier
//! messages, so a client can tell when the server drops, reorders or
//! rewrites history.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Sealpost                           │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌────────────┐ │
//! │  │  Outbox  │ → │Deliverer │ → │  Sender  │ → │ RemoteLog  │ │
//! │  │ (durable)│   │ (worker) │   │(prev+box)│   │  (server)  │ │
//! │  └──────────┘   └──────────┘   └──────────┘   └────────────┘ │
//! │                                     ↓                        │
//! │                 ┌──────────┐   ┌──────────┐                  │
//! │                 │  Chain   │ ← │  Boxer   │ ← KeyProvider    │
//! │                 │ Verifier │   │ (V1/V2)  │                  │
//! │                 └──────────┘   └──────────┘                  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use sealpost::{Collaborators, RequestContext, Sealpost, SealpostConfig};
//!
//! let client = Sealpost::open(SealpostConfig::load()?, collaborators)?;
//! client.start()?;
//!
//! let ctx = RequestContext::new();
//! let outbox_id = client.queue(&ctx, conv_id, plaintext, last_seen)?;
//!
//! let mut events = client.deliverer().subscribe();
//! ```
//!
//! # Modules
//!
//! - **Codec**: [`Boxer`], [`ChainVerifier`], [`InvariantLedger`]
//! - **Sending**: [`Sender`], [`Deliverer`], [`DeliveryEvent`]
//! - **Collaborators**: [`KeyProvider`], [`RemoteLog`], [`LocalCache`] and
//!   their in-memory versions in [`memory`]

mod boxer;
mod chain;
mod context;
mod deliverer;
mod error;
mod events;
mod ledger;
pub mod memory;
mod message;
mod sealpost;
mod sender;
mod traits;
mod wake_queue;

// Top level
pub use sealpost::{Collaborators, Sealpost, wire_version};

// Codec
pub use boxer::{Boxer, ThreadView, header_hash};
pub use chain::{ChainVerifier, UnprevedSets};
pub use ledger::InvariantLedger;
pub use message::{MessageUnboxed, MessageUnboxedError, MessageUnboxedValid};

// Sending and delivery
pub use deliverer::{Deliverer, PassReport};
pub use events::{DeliveryBroadcast, DeliveryEvent};
pub use sender::{ActiveDevice, DEFAULT_HISTORY_WINDOW, MessageSender, SendReceipt, Sender};
pub use wake_queue::{WakeOutcome, WakeQueue, WakeReason};

// Context, collaborators and errors
pub use context::{ContextError, RequestContext};
pub use error::{
    BoxingError, BoxingResult, CacheError, ChainError, ChainResult, DeliveryError,
    DeliveryResult, KeyError, RemoteError, Result, SealpostError, SendError, SendResult,
    UnboxingError, UnboxingErrorKind, UnboxingResult,
};
pub use traits::{
    KeyProvider, LocalCache, PostReceipt, RateLimit, RemoteLog, SenderKeyValidity,
};

// Re-export configuration
pub use sealpost_config::{ConfigLoader, DelivererConfig, SealpostConfig, WireVersion};

// Re-export the outbox
pub use sealpost_outbox::{
    FailureKind, FileOutbox, MemoryOutbox, OutboxError, OutboxRecord, OutboxStore, RecordState,
};

// Re-export crypto primitives callers need to build devices and keys
pub use sealpost_crypto::{CryptKey, SigningKeyPair};

// Re-export core types
pub use sealpost_types::{
    BodyHash, ConversationId, ConversationTriple, DeleteBody, DeviceId, EditBody, HeaderHash,
    KeyId, MessageBody, MessageBoxed, MessageBoxedVersion, MessageClientHeader, MessageId,
    MessagePlaintext, MessageServerHeader, MessageType, OutboxId, PrevPointer, ReactionBody,
    TextBody, Timestamp, TlfId, TopicId, TopicType, Uid,
};
