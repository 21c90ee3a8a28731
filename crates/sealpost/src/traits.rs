//! Collaborator interfaces.
//!
//! Key resolution, the ordering server and the local message cache live
//! outside this crate. They are reached through these traits so the boxer,
//! sender and deliverer can run against real services or the in-memory
//! versions in [`crate::memory`].

use std::time::Duration;

use sealpost_crypto::CryptKey;
use sealpost_types::{ConversationId, KeyId, MessageBoxed, MessageServerHeader, Timestamp, Uid};

use crate::context::RequestContext;
use crate::error::{CacheError, KeyError, RemoteError};

// ============================================================================
// Keys
// ============================================================================

/// Answer to "was this signing key valid for this user at time t?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderKeyValidity {
    /// The key has ever belonged to the user.
    pub found: bool,
    /// The key was active at the queried time.
    pub valid_at_time: bool,
    /// When the key was revoked, if it has been.
    pub revoked_at: Option<Timestamp>,
}

pub trait KeyProvider: Send + Sync {
    /// Current key for an encryption domain plus the domain's canonical name.
    fn encryption_key(
        &self,
        ctx: &RequestContext,
        domain: &str,
        public: bool,
    ) -> Result<(CryptKey, String), KeyError>;

    /// Key of a specific generation, for reading older messages.
    fn decryption_key(
        &self,
        ctx: &RequestContext,
        domain: &str,
        public: bool,
        generation: u32,
    ) -> Result<CryptKey, KeyError>;

    fn sender_key_valid_at(
        &self,
        ctx: &RequestContext,
        uid: &Uid,
        key_id: &KeyId,
        at: Timestamp,
    ) -> Result<SenderKeyValidity, KeyError>;
}

// ============================================================================
// Ordering server
// ============================================================================

/// Rate-limit state reported alongside a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub calls_remaining: u32,
    pub window_reset: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReceipt {
    pub server_header: MessageServerHeader,
    pub rate_limit: Option<RateLimit>,
}

pub trait RemoteLog: Send + Sync {
    /// Appends a boxed message to a conversation and returns the header the
    /// server assigned it.
    fn post_message(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        boxed: &MessageBoxed,
    ) -> Result<PostReceipt, RemoteError>;
}

// ============================================================================
// Local cache
// ============================================================================

/// Boxed messages this device has already seen, per conversation and user.
pub trait LocalCache: Send + Sync {
    /// Up to `limit` messages, newest first.
    fn pull(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        uid: &Uid,
        limit: usize,
    ) -> Result<Vec<MessageBoxed>, CacheError>;

    /// Stores messages. Each must carry a server header.
    fn push(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        uid: &Uid,
        messages: Vec<MessageBoxed>,
    ) -> Result<(), CacheError>;
}
