//! In-memory collaborators for tests, demos and single-process setups.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use sealpost_crypto::CryptKey;
use sealpost_types::{
    ConversationId, KeyId, MessageBoxed, MessageId, MessageServerHeader, MessageType, Timestamp,
    Uid,
};
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{CacheError, KeyError, RemoteError};
use crate::traits::{KeyProvider, LocalCache, PostReceipt, RemoteLog, SenderKeyValidity};

/// Canonical form of a domain name: trimmed, lowercase, members sorted.
pub fn canonicalize_domain(domain: &str) -> String {
    let mut members: Vec<String> = domain
        .split(',')
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect();
    members.sort();
    members.dedup();
    members.join(",")
}

// ============================================================================
// Keys
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct SenderKeyRecord {
    valid_from: Timestamp,
    revoked_at: Option<Timestamp>,
}

/// A [`KeyProvider`] backed by maps.
///
/// Private domains must be registered with [`MemoryKeyProvider::add_domain`].
/// Public domains always resolve to [`CryptKey::public`].
#[derive(Debug, Default)]
pub struct MemoryKeyProvider {
    domains: RwLock<HashMap<String, Vec<CryptKey>>>,
    sender_keys: RwLock<HashMap<(Uid, KeyId), SenderKeyRecord>>,
}

impl MemoryKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a private domain with a fresh generation-1 key. Returns the
    /// canonical name.
    pub fn add_domain(&self, domain: &str) -> String {
        let canonical = canonicalize_domain(domain);
        if let Ok(mut domains) = self.domains.write() {
            domains
                .entry(canonical.clone())
                .or_insert_with(|| vec![CryptKey::generate(1)]);
        }
        canonical
    }

    /// Adds a new key generation to a registered domain and returns it.
    pub fn rotate(&self, domain: &str) -> Option<u32> {
        let mut domains = self.domains.write().ok()?;
        let keys = domains.get_mut(&canonicalize_domain(domain))?;
        let generation = keys.last().map_or(1, |k| k.generation() + 1);
        keys.push(CryptKey::generate(generation));
        Some(generation)
    }

    /// Records that `key_id` belongs to `uid` from `valid_from` onwards.
    pub fn register_sender_key(&self, uid: Uid, key_id: KeyId, valid_from: Timestamp) {
        if let Ok(mut keys) = self.sender_keys.write() {
            keys.insert(
                (uid, key_id),
                SenderKeyRecord {
                    valid_from,
                    revoked_at: None,
                },
            );
        }
    }

    pub fn revoke_sender_key(&self, uid: Uid, key_id: KeyId, at: Timestamp) {
        if let Ok(mut keys) = self.sender_keys.write() {
            if let Some(record) = keys.get_mut(&(uid, key_id)) {
                record.revoked_at = Some(at);
            }
        }
    }

    fn lock_error() -> KeyError {
        KeyError::Lookup("key store lock poisoned".to_string())
    }
}

impl KeyProvider for MemoryKeyProvider {
    fn encryption_key(
        &self,
        _ctx: &RequestContext,
        domain: &str,
        public: bool,
    ) -> Result<(CryptKey, String), KeyError> {
        let canonical = canonicalize_domain(domain);
        if canonical.is_empty() {
            return Err(KeyError::InvalidDomain(domain.to_string()));
        }
        if public {
            return Ok((CryptKey::public(), canonical));
        }

        let domains = self.domains.read().map_err(|_| Self::lock_error())?;
        let key = domains
            .get(&canonical)
            .and_then(|keys| keys.last())
            .cloned()
            .ok_or_else(|| KeyError::InvalidDomain(canonical.clone()))?;
        Ok((key, canonical))
    }

    fn decryption_key(
        &self,
        _ctx: &RequestContext,
        domain: &str,
        public: bool,
        generation: u32,
    ) -> Result<CryptKey, KeyError> {
        let canonical = canonicalize_domain(domain);
        let not_found = || KeyError::GenerationNotFound {
            domain: canonical.clone(),
            generation,
        };

        if public {
            let key = CryptKey::public();
            return if key.generation() == generation {
                Ok(key)
            } else {
                Err(not_found())
            };
        }

        let domains = self.domains.read().map_err(|_| Self::lock_error())?;
        let keys = domains
            .get(&canonical)
            .ok_or_else(|| KeyError::InvalidDomain(canonical.clone()))?;
        keys.iter()
            .find(|k| k.generation() == generation)
            .cloned()
            .ok_or_else(not_found)
    }

    fn sender_key_valid_at(
        &self,
        _ctx: &RequestContext,
        uid: &Uid,
        key_id: &KeyId,
        at: Timestamp,
    ) -> Result<SenderKeyValidity, KeyError> {
        let keys = self.sender_keys.read().map_err(|_| Self::lock_error())?;
        let Some(record) = keys.get(&(*uid, *key_id)) else {
            return Ok(SenderKeyValidity::default());
        };
        let valid_at_time =
            at >= record.valid_from && record.revoked_at.is_none_or(|revoked| at < revoked);
        Ok(SenderKeyValidity {
            found: true,
            valid_at_time,
            revoked_at: record.revoked_at,
        })
    }
}

// ============================================================================
// Ordering server
// ============================================================================

#[derive(Debug, Default)]
struct RemoteState {
    conversations: HashMap<ConversationId, Vec<MessageBoxed>>,
    failures: VecDeque<RemoteError>,
    offline: bool,
    posts: usize,
}

/// A [`RemoteLog`] that assigns ids the way the ordering server does: dense,
/// starting at 1, per conversation.
///
/// Posting a message whose outbox id was already accepted returns the
/// original server header.
#[derive(Debug, Default)]
pub struct MemoryRemoteLog {
    state: Mutex<RemoteState>,
}

impl MemoryRemoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error returned by the next post instead of accepting it.
    pub fn fail_next(&self, err: RemoteError) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.push_back(err);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Messages accepted so far, oldest first.
    pub fn messages(&self, conv_id: ConversationId) -> Vec<MessageBoxed> {
        self.state
            .lock()
            .map(|state| {
                state
                    .conversations
                    .get(&conv_id)
                    .cloned()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of post attempts, including rejected ones.
    pub fn post_count(&self) -> usize {
        self.state.lock().map(|s| s.posts).unwrap_or_default()
    }
}

impl RemoteLog for MemoryRemoteLog {
    fn post_message(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        boxed: &MessageBoxed,
    ) -> Result<PostReceipt, RemoteError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RemoteError::Transport("remote lock poisoned".to_string()))?;
        state.posts += 1;

        if state.offline {
            return Err(RemoteError::Offline);
        }
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let messages = state.conversations.entry(conv_id).or_default();

        if let Some(outbox_id) = boxed.client_header.outbox_id {
            let existing = messages
                .iter()
                .find(|m| m.client_header.outbox_id == Some(outbox_id))
                .and_then(|m| m.server_header);
            if let Some(server_header) = existing {
                debug!(%outbox_id, "duplicate post answered with original header");
                return Ok(PostReceipt {
                    server_header,
                    rate_limit: None,
                });
            }
        }

        let message_id = MessageId::new(messages.len() as u64 + 1);
        let server_header = MessageServerHeader {
            message_id,
            superseded_by: MessageId::ZERO,
            ctime: Timestamp::now(),
        };

        let header = &boxed.client_header;
        let mut targets: Vec<MessageId> = header.supersedes.into_iter().collect();
        if header.message_type == MessageType::Delete {
            targets.extend(header.deletes.iter().copied());
        }
        for message in messages.iter_mut() {
            if let Some(sh) = message.server_header.as_mut() {
                if targets.contains(&sh.message_id) {
                    sh.superseded_by = message_id;
                }
            }
        }

        messages.push(boxed.clone().with_server_header(server_header));
        debug!(
            correlation_id = %ctx.correlation_id(),
            %conv_id,
            %message_id,
            "message accepted"
        );

        Ok(PostReceipt {
            server_header,
            rate_limit: None,
        })
    }
}

// ============================================================================
// Local cache
// ============================================================================

/// A [`LocalCache`] keyed by conversation and user.
#[derive(Debug, Default)]
pub struct MemoryLocalCache {
    messages: RwLock<HashMap<(ConversationId, Uid), BTreeMap<MessageId, MessageBoxed>>>,
}

impl MemoryLocalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryLocalCache {
    fn pull(
        &self,
        _ctx: &RequestContext,
        conv_id: ConversationId,
        uid: &Uid,
        limit: usize,
    ) -> Result<Vec<MessageBoxed>, CacheError> {
        let messages = self.messages.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(messages
            .get(&(conv_id, *uid))
            .map(|thread| thread.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn push(
        &self,
        _ctx: &RequestContext,
        conv_id: ConversationId,
        uid: &Uid,
        incoming: Vec<MessageBoxed>,
    ) -> Result<(), CacheError> {
        if incoming.iter().any(|m| m.server_header.is_none()) {
            return Err(CacheError::MissingServerHeader);
        }
        let mut messages = self.messages.write().map_err(|_| CacheError::LockPoisoned)?;
        let thread = messages.entry((conv_id, *uid)).or_default();
        for message in incoming {
            if let Some(id) = message.message_id() {
                thread.insert(id, message);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealpost_types::{
        ConversationTriple, EncryptedData, MessageBoxedVersion, MessageClientHeader,
    };

    fn boxed(message_type: MessageType) -> MessageBoxed {
        MessageBoxed {
            version: MessageBoxedVersion::V2,
            server_header: None,
            client_header: MessageClientHeader::new(
                ConversationTriple::default(),
                "alice",
                false,
                message_type,
            ),
            header_ciphertext: EncryptedData::default(),
            body_ciphertext: EncryptedData::default(),
            verify_key: None,
            key_generation: 1,
        }
    }

    #[test]
    fn canonical_names_sort_members() {
        assert_eq!(canonicalize_domain(" Bob, alice ,bob"), "alice,bob");
        assert_eq!(canonicalize_domain(" , "), "");
    }

    #[test]
    fn private_domains_rotate_generations() {
        let keys = MemoryKeyProvider::new();
        let ctx = RequestContext::new();
        let name = keys.add_domain("bob,alice");
        assert_eq!(keys.rotate(&name), Some(2));

        let (current, canonical) = keys.encryption_key(&ctx, "alice,bob", false).expect("key");
        assert_eq!(canonical, "alice,bob");
        assert_eq!(current.generation(), 2);
        assert!(keys.decryption_key(&ctx, &name, false, 1).is_ok());
        assert!(matches!(
            keys.decryption_key(&ctx, &name, false, 3),
            Err(KeyError::GenerationNotFound { generation: 3, .. })
        ));
    }

    #[test]
    fn public_domains_use_public_key() {
        let keys = MemoryKeyProvider::new();
        let ctx = RequestContext::new();
        let (key, _) = keys.encryption_key(&ctx, "alice", true).expect("key");
        assert_eq!(key, CryptKey::public());
        assert!(keys.decryption_key(&ctx, "alice", true, 1).is_ok());
    }

    #[test]
    fn sender_key_validity_windows() {
        let keys = MemoryKeyProvider::new();
        let ctx = RequestContext::new();
        let uid = Uid::from_bytes([1; 16]);
        let key_id = KeyId::from_bytes([2; 32]);

        let unknown = keys
            .sender_key_valid_at(&ctx, &uid, &key_id, Timestamp::from_millis(5))
            .expect("lookup");
        assert!(!unknown.found);

        keys.register_sender_key(uid, key_id, Timestamp::from_millis(10));
        keys.revoke_sender_key(uid, key_id, Timestamp::from_millis(20));

        let before = keys
            .sender_key_valid_at(&ctx, &uid, &key_id, Timestamp::from_millis(5))
            .expect("lookup");
        assert!(before.found && !before.valid_at_time);

        let during = keys
            .sender_key_valid_at(&ctx, &uid, &key_id, Timestamp::from_millis(15))
            .expect("lookup");
        assert!(during.valid_at_time);
        assert_eq!(during.revoked_at, Some(Timestamp::from_millis(20)));

        let after = keys
            .sender_key_valid_at(&ctx, &uid, &key_id, Timestamp::from_millis(25))
            .expect("lookup");
        assert!(!after.valid_at_time);
    }

    #[test]
    fn remote_assigns_dense_ids_and_marks_superseded() {
        let remote = MemoryRemoteLog::new();
        let ctx = RequestContext::new();
        let conv = ConversationId::new(9);

        let first = remote
            .post_message(&ctx, conv, &boxed(MessageType::Text))
            .expect("post");
        assert_eq!(first.server_header.message_id, MessageId::new(1));

        let mut edit = boxed(MessageType::Edit);
        edit.client_header.supersedes = Some(MessageId::new(1));
        let second = remote.post_message(&ctx, conv, &edit).expect("post");
        assert_eq!(second.server_header.message_id, MessageId::new(2));

        let stored = remote.messages(conv);
        let original = stored[0].server_header.expect("server header");
        assert_eq!(original.superseded_by, MessageId::new(2));
    }

    #[test]
    fn remote_failures_and_duplicates() {
        let remote = MemoryRemoteLog::new();
        let ctx = RequestContext::new();
        let conv = ConversationId::new(1);
        let mut message = boxed(MessageType::Text);
        message.client_header.outbox_id = Some(sealpost_types::OutboxId::from_bytes([4; 8]));

        remote.fail_next(RemoteError::Offline);
        assert_eq!(
            remote.post_message(&ctx, conv, &message),
            Err(RemoteError::Offline)
        );

        let accepted = remote.post_message(&ctx, conv, &message).expect("post");
        let again = remote.post_message(&ctx, conv, &message).expect("post");
        assert_eq!(accepted.server_header, again.server_header);
        assert_eq!(remote.messages(conv).len(), 1);
        assert_eq!(remote.post_count(), 3);
    }

    #[test]
    fn cache_returns_newest_first() {
        let cache = MemoryLocalCache::new();
        let ctx = RequestContext::new();
        let conv = ConversationId::new(1);
        let uid = Uid::from_bytes([1; 16]);

        let messages = (1..=5)
            .map(|id| {
                boxed(MessageType::Text).with_server_header(MessageServerHeader {
                    message_id: MessageId::new(id),
                    superseded_by: MessageId::ZERO,
                    ctime: Timestamp::from_millis(id),
                })
            })
            .collect();
        cache.push(&ctx, conv, &uid, messages).expect("push");

        let pulled = cache.pull(&ctx, conv, &uid, 3).expect("pull");
        let ids: Vec<_> = pulled.iter().filter_map(MessageBoxed::message_id).collect();
        assert_eq!(ids, [MessageId::new(5), MessageId::new(4), MessageId::new(3)]);
    }

    #[test]
    fn cache_rejects_unposted_messages() {
        let cache = MemoryLocalCache::new();
        let result = cache.push(
            &RequestContext::new(),
            ConversationId::new(1),
            &Uid::default(),
            vec![boxed(MessageType::Text)],
        );
        assert_eq!(result, Err(CacheError::MissingServerHeader));
    }
}
