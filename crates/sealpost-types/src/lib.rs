//! # sealpost-types: Core types for `Sealpost`
//!
//! This crate contains shared types used across the `Sealpost` system:
//! - Entity IDs ([`MessageId`], [`ConversationId`], [`Uid`], [`DeviceId`], [`OutboxId`])
//! - Key identifiers ([`KeyId`])
//! - Temporal types ([`Timestamp`])
//! - Wire model ([`MessagePlaintext`], [`MessageBoxed`], [`PrevPointer`], [`HeaderHash`])
//!
//! Nothing in here does cryptography; hashes and signatures are carried as
//! opaque byte values and produced by `sealpost-crypto`.

use std::{
    fmt::{Debug, Display},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

mod wire;

pub use wire::{
    ConversationTriple, DeleteBody, EditBody, EncryptedData, EphemeralMetadata, HeadlineBody,
    MessageBody, MessageBoxed, MessageBoxedVersion, MessageClientHeader, MessagePlaintext,
    MessageServerHeader, MessageType, MetadataBody, OutboxInfo, PrevPointer, ReactionBody,
    SignatureInfo, SystemBody, TextBody, TopicType,
};

/// Writes bytes as lowercase hex.
fn write_hex(f: &mut std::fmt::Formatter<'_>, bytes: &[u8]) -> std::fmt::Result {
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Server-assigned position of a message within its conversation.
///
/// IDs are dense and strictly increasing per conversation. Zero is never
/// assigned by the server and doubles as "none" in `superseded_by`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct MessageId(u64);

impl MessageId {
    pub const ZERO: MessageId = MessageId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<MessageId> for u64 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Identifier of a conversation on the ordering server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ConversationId(u64);

impl ConversationId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConversationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ConversationId> for u64 {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

// ============================================================================
// Fixed-width byte identifiers
// ============================================================================

macro_rules! byte_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LENGTH: usize = $len;

            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "("))?;
                write_hex(f, &self.0)?;
                write!(f, ")")
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write_hex(f, &self.0)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }
    };
}

byte_id!(
    /// User identifier.
    Uid,
    16
);

byte_id!(
    /// Identifier of one of a user's devices.
    DeviceId,
    16
);

byte_id!(
    /// Identifier of the encryption domain (top-level folder) a conversation lives in.
    TlfId,
    16
);

byte_id!(
    /// Topic within a top-level folder.
    TopicId,
    16
);

byte_id!(
    /// Public half of an Ed25519 signing key, used as its identifier.
    KeyId,
    32
);

byte_id!(
    /// Content digest of a sealed message header.
    ///
    /// Always recomputed locally from ciphertext; never trusted from the wire.
    HeaderHash,
    32
);

byte_id!(
    /// Digest of a sealed message body, embedded in the signed header.
    BodyHash,
    32
);

// ============================================================================
// Outbox ID - locally generated, never reused
// ============================================================================

/// Length of an outbox identifier in bytes.
pub const OUTBOX_ID_LENGTH: usize = 8;

byte_id!(
    /// Client-generated identifier attached to an outgoing message.
    ///
    /// Lets a device match the server's copy of a message with the local
    /// outbox record it came from.
    OutboxId,
    OUTBOX_ID_LENGTH
);

impl OutboxId {
    /// Generates a fresh random outbox ID using the OS CSPRNG.
    ///
    /// Falls back to a timestamp-derived value if the OS entropy source is
    /// unavailable; uniqueness per device is all that is required.
    pub fn generate() -> Self {
        let mut bytes = [0u8; OUTBOX_ID_LENGTH];
        if getrandom::fill(&mut bytes).is_err() {
            bytes = Timestamp::now().as_nanos().to_be_bytes();
        }
        Self(bytes)
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value with monotonic guarantee)
// ============================================================================

/// Wall-clock timestamp.
///
/// Stored as nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a timestamp from milliseconds since Unix epoch.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Returns the timestamp as nanoseconds since Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp as milliseconds since Unix epoch.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Creates a timestamp for the current time.
    ///
    /// A clock set before the Unix epoch reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as u64)
    }

    /// Creates a timestamp ensuring monotonicity: `max(now, last + 1ns)`.
    pub fn now_monotonic(last: Option<Timestamp>) -> Self {
        let now = Self::now();
        match last {
            Some(prev) if now.0 <= prev.0 => Timestamp(prev.0.saturating_add(1)),
            _ => now,
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}
