//! Outgoing message pipeline.
//!
//! ```text
//! plaintext -> attach identity -> read history -> verify chain
//!           -> attach prev pointers -> expand deletes -> box -> post -> cache
//! ```
//!
//! Everything from reading history to caching the posted message runs under
//! a per-conversation lock, so two sends to the same conversation never pick
//! the same prev pointers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sealpost_crypto::SigningKeyPair;
use sealpost_types::{
    ConversationId, DeviceId, MessageBody, MessageBoxed, MessageBoxedVersion, MessageId,
    MessagePlaintext, MessageType, OutboxId, OutboxInfo, Timestamp, Uid,
};
use tracing::{debug, info, warn};

use crate::boxer::Boxer;
use crate::context::RequestContext;
use crate::error::{BoxingError, SendError, SendResult};
use crate::message::MessageUnboxed;
use crate::traits::{LocalCache, RateLimit, RemoteLog};

/// Default number of cached messages read to compute prev pointers.
pub const DEFAULT_HISTORY_WINDOW: usize = 100;

/// The signed-in user and device messages are sent as.
#[derive(Clone, Default)]
pub struct ActiveDevice {
    pub uid: Option<Uid>,
    pub device_id: Option<DeviceId>,
    pub signing_key: Option<Arc<SigningKeyPair>>,
}

impl ActiveDevice {
    pub fn new(uid: Uid, device_id: DeviceId, signing_key: Arc<SigningKeyPair>) -> Self {
        Self {
            uid: Some(uid),
            device_id: Some(device_id),
            signing_key: Some(signing_key),
        }
    }

    /// No user is signed in. Every send fails with
    /// [`BoxingError::LoginRequired`].
    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for ActiveDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveDevice")
            .field("uid", &self.uid)
            .field("device_id", &self.device_id)
            .field("signing_key", &self.signing_key.as_ref().map(|k| k.key_id()))
            .finish()
    }
}

/// What a successful send reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub outbox_id: OutboxId,
    pub message_id: MessageId,
    pub rate_limit: Option<RateLimit>,
    /// The message as the server stored it.
    pub boxed: MessageBoxed,
}

/// Anything that can send one outbox record. Implemented by [`Sender`];
/// the deliverer depends on this rather than on the concrete pipeline.
pub trait MessageSender: Send + Sync {
    fn send(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> SendResult<SendReceipt>;
}

pub struct Sender {
    boxer: Arc<Boxer>,
    remote: Arc<dyn RemoteLog>,
    cache: Arc<dyn LocalCache>,
    device: ActiveDevice,
    history_window: usize,
    version: MessageBoxedVersion,
    locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl Sender {
    pub fn new(
        boxer: Arc<Boxer>,
        remote: Arc<dyn RemoteLog>,
        cache: Arc<dyn LocalCache>,
        device: ActiveDevice,
    ) -> Self {
        Self {
            boxer,
            remote,
            cache,
            device,
            history_window: DEFAULT_HISTORY_WINDOW,
            version: MessageBoxedVersion::CURRENT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    pub fn with_version(mut self, version: MessageBoxedVersion) -> Self {
        self.version = version;
        self
    }

    pub fn device(&self) -> &ActiveDevice {
        &self.device
    }

    /// Boxes a plaintext ready for posting.
    ///
    /// With a conversation id the cached history is read and verified, and
    /// the result points at every message nothing else points at yet.
    /// Without one the message goes out with no prev pointers.
    pub fn prepare(
        &self,
        ctx: &RequestContext,
        plaintext: MessagePlaintext,
        conv_id: Option<ConversationId>,
    ) -> SendResult<MessageBoxed> {
        match conv_id {
            Some(conv_id) => {
                let lock = self.conversation_lock(conv_id)?;
                let _guard = lock.lock().map_err(|_| SendError::LockPoisoned)?;
                self.prepare_locked(ctx, plaintext, Some(conv_id))
            }
            None => self.prepare_locked(ctx, plaintext, None),
        }
    }

    fn prepare_locked(
        &self,
        ctx: &RequestContext,
        mut plaintext: MessagePlaintext,
        conv_id: Option<ConversationId>,
    ) -> SendResult<MessageBoxed> {
        ctx.check()?;
        let header = &mut plaintext.client_header;
        if header.sender.is_some() {
            return Err(BoxingError::SenderFieldSet("sender").into());
        }
        if header.sender_device.is_some() {
            return Err(BoxingError::SenderFieldSet("sender_device").into());
        }
        if !header.prev.is_empty() {
            return Err(BoxingError::PrevAlreadySet.into());
        }

        let uid = self.device.uid.ok_or(BoxingError::LoginRequired)?;
        let device_id = self.device.device_id.ok_or(BoxingError::DeviceRequired)?;
        let signing_key = self
            .device
            .signing_key
            .clone()
            .ok_or(BoxingError::DeviceRequired)?;
        header.sender = Some(uid);
        header.sender_device = Some(device_id);

        if let Some(conv_id) = conv_id {
            let history = self.cache.pull(ctx, conv_id, &uid, self.history_window)?;
            let thread = self
                .boxer
                .unbox_thread(ctx, &plaintext.client_header.conv, &history)?;

            plaintext.client_header.prev = thread
                .unpreved
                .pointers_for(plaintext.client_header.is_ephemeral());
            if plaintext.client_header.message_type == MessageType::Delete {
                expand_deletes(&mut plaintext, &thread.messages);
            }

            debug!(
                correlation_id = %ctx.correlation_id(),
                %conv_id,
                history = history.len(),
                prev = plaintext.client_header.prev.len(),
                "prev pointers attached"
            );
        }

        Ok(self
            .boxer
            .box_message(ctx, &plaintext, self.version, &signing_key)?)
    }

    /// Prepares, posts and caches one message.
    ///
    /// Outbox id and info are stamped when the caller left them empty. The
    /// remote error, if any, is returned as is; a failure to write the cache
    /// after a successful post is only logged.
    pub fn send(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        mut plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> SendResult<SendReceipt> {
        let header = &mut plaintext.client_header;
        let outbox_id = *header.outbox_id.get_or_insert_with(OutboxId::generate);
        header.outbox_info.get_or_insert_with(|| OutboxInfo {
            prev_msg_id: prev_hint,
            compose_time: Timestamp::now(),
        });

        let lock = self.conversation_lock(conv_id)?;
        let _guard = lock.lock().map_err(|_| SendError::LockPoisoned)?;

        let boxed = self.prepare_locked(ctx, plaintext, Some(conv_id))?;
        let receipt = self.remote.post_message(ctx, conv_id, &boxed)?;
        let boxed = boxed.with_server_header(receipt.server_header);
        let message_id = receipt.server_header.message_id;

        if let Some(uid) = self.device.uid {
            if let Err(err) = self.cache.push(ctx, conv_id, &uid, vec![boxed.clone()]) {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    %conv_id,
                    %message_id,
                    error = %err,
                    "posted message not cached"
                );
            }
        }

        info!(
            correlation_id = %ctx.correlation_id(),
            %conv_id,
            %message_id,
            %outbox_id,
            "message sent"
        );

        Ok(SendReceipt {
            outbox_id,
            message_id,
            rate_limit: receipt.rate_limit,
            boxed,
        })
    }

    fn conversation_lock(&self, conv_id: ConversationId) -> SendResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| SendError::LockPoisoned)?;
        Ok(locks.entry(conv_id).or_default().clone())
    }
}

impl MessageSender for Sender {
    fn send(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> SendResult<SendReceipt> {
        Sender::send(self, ctx, conv_id, plaintext, prev_hint)
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("device", &self.device)
            .field("history_window", &self.history_window)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Adds every cached edit and reaction of the deleted messages to the
/// delete, so they disappear with their target.
fn expand_deletes(plaintext: &mut MessagePlaintext, history: &[MessageUnboxed]) {
    let targets = plaintext.client_header.deletes.clone();
    let dependents: Vec<MessageId> = history
        .iter()
        .filter_map(MessageUnboxed::as_valid)
        .filter(|m| {
            matches!(
                m.client_header.message_type,
                MessageType::Edit | MessageType::Reaction
            )
        })
        .filter(|m| m.client_header.supersedes.is_some_and(|t| targets.contains(&t)))
        .map(|m| m.message_id())
        .collect();

    for id in dependents {
        if !plaintext.client_header.deletes.contains(&id) {
            plaintext.client_header.deletes.push(id);
        }
        if let MessageBody::Delete(delete) = &mut plaintext.body {
            if !delete.message_ids.contains(&id) {
                delete.message_ids.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RemoteError, UnboxingError};
    use crate::memory::{MemoryKeyProvider, MemoryLocalCache, MemoryRemoteLog};
    use sealpost_types::{
        ConversationTriple, DeleteBody, EditBody, PrevPointer, ReactionBody, TlfId, TopicId,
        TopicType,
    };

    // ========================================================================
    // Test Helpers
    // ========================================================================

    struct Harness {
        sender: Sender,
        remote: Arc<MemoryRemoteLog>,
        cache: Arc<MemoryLocalCache>,
        uid: Uid,
        conv: ConversationTriple,
    }

    const CONV_ID: ConversationId = ConversationId::new(42);

    fn harness() -> Harness {
        let keys = Arc::new(MemoryKeyProvider::new());
        keys.add_domain("alice,bob");
        let signer = Arc::new(SigningKeyPair::from_seed(&[3u8; 32]));
        let uid = Uid::from_bytes([1u8; 16]);
        keys.register_sender_key(uid, signer.key_id(), Timestamp::EPOCH);

        let remote = Arc::new(MemoryRemoteLog::new());
        let cache = Arc::new(MemoryLocalCache::new());
        let device = ActiveDevice::new(uid, DeviceId::from_bytes([2u8; 16]), signer);
        let sender = Sender::new(
            Arc::new(Boxer::new(keys)),
            remote.clone(),
            cache.clone(),
            device,
        );
        Harness {
            sender,
            remote,
            cache,
            uid,
            conv: ConversationTriple {
                tlf_id: TlfId::from_bytes([5u8; 16]),
                topic_type: TopicType::Chat,
                topic_id: TopicId::from_bytes([6u8; 16]),
            },
        }
    }

    impl Harness {
        fn plaintext(&self, body: MessageBody) -> MessagePlaintext {
            MessagePlaintext::new(self.conv, "alice,bob", false, body)
        }

        fn send(&self, body: MessageBody) -> SendReceipt {
            self.sender
                .send(&RequestContext::new(), CONV_ID, self.plaintext(body), MessageId::ZERO)
                .expect("sends")
        }

        fn send_text(&self, text: &str) -> SendReceipt {
            self.send(MessageBody::text(text))
        }
    }

    // ========================================================================
    // Prepare
    // ========================================================================

    #[test]
    fn prepare_without_conversation_has_no_prev() {
        let h = harness();
        let boxed = h
            .sender
            .prepare(&RequestContext::new(), h.plaintext(MessageBody::text("hi")), None)
            .expect("prepares");

        assert!(boxed.client_header.prev.is_empty());
        assert_eq!(boxed.client_header.sender, Some(h.uid));
        assert_eq!(boxed.version, MessageBoxedVersion::V2);
    }

    #[test]
    fn prepare_rejects_caller_set_fields() {
        let h = harness();
        let ctx = RequestContext::new();

        let mut with_sender = h.plaintext(MessageBody::text("hi"));
        with_sender.client_header.sender = Some(h.uid);
        let err = h.sender.prepare(&ctx, with_sender, None).unwrap_err();
        assert!(matches!(err, SendError::Boxing(BoxingError::SenderFieldSet("sender"))));

        let mut with_prev = h.plaintext(MessageBody::text("hi"));
        with_prev.client_header.prev.push(PrevPointer {
            id: MessageId::new(1),
            hash: sealpost_types::HeaderHash::default(),
        });
        let err = h.sender.prepare(&ctx, with_prev, None).unwrap_err();
        assert!(matches!(err, SendError::Boxing(BoxingError::PrevAlreadySet)));
        assert!(err.is_immediate_fail());
    }

    #[test]
    fn signed_out_device_cannot_send() {
        let h = harness();
        let sender = Sender::new(
            h.sender.boxer.clone(),
            h.remote.clone(),
            h.cache.clone(),
            ActiveDevice::signed_out(),
        );
        let err = sender
            .prepare(&RequestContext::new(), h.plaintext(MessageBody::text("hi")), None)
            .unwrap_err();
        assert!(matches!(err, SendError::Boxing(BoxingError::LoginRequired)));
    }

    #[test]
    fn each_message_points_at_the_previous_one() {
        let h = harness();
        let first = h.send_text("one");
        let second = h.send_text("two");

        assert_eq!(first.message_id, MessageId::new(1));
        assert_eq!(second.message_id, MessageId::new(2));
        assert_eq!(
            second.boxed.client_header.prev,
            vec![PrevPointer {
                id: first.message_id,
                hash: crate::boxer::header_hash(&first.boxed),
            }]
        );
    }

    #[test]
    fn exploding_messages_are_skipped_by_regular_pointers() {
        let h = harness();
        let regular = h.send_text("one");
        let exploding = h
            .sender
            .send(
                &RequestContext::new(),
                CONV_ID,
                h.plaintext(MessageBody::text("boom")).with_ephemeral(60),
                MessageId::ZERO,
            )
            .expect("sends");
        assert_eq!(exploding.boxed.client_header.prev.len(), 1);

        let next = h.send_text("two");
        let prev_ids: Vec<MessageId> = next
            .boxed
            .client_header
            .prev
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(prev_ids, vec![regular.message_id]);
    }

    #[test]
    fn delete_takes_edits_and_reactions_along() {
        let h = harness();
        let target = h.send_text("typo");
        let edit = h.send(MessageBody::Edit(EditBody {
            message_id: target.message_id,
            body: "fixed".to_string(),
        }));
        let reaction = h.send(MessageBody::Reaction(ReactionBody {
            message_id: target.message_id,
            body: ":+1:".to_string(),
        }));
        let unrelated = h.send_text("other");

        let delete = h.send(MessageBody::Delete(DeleteBody {
            message_ids: vec![target.message_id],
        }));

        let deletes = &delete.boxed.client_header.deletes;
        assert!(deletes.contains(&target.message_id));
        assert!(deletes.contains(&edit.message_id));
        assert!(deletes.contains(&reaction.message_id));
        assert!(!deletes.contains(&unrelated.message_id));
    }

    // ========================================================================
    // Send
    // ========================================================================

    #[test]
    fn send_stamps_outbox_fields() {
        let h = harness();
        let receipt = h
            .sender
            .send(
                &RequestContext::new(),
                CONV_ID,
                h.plaintext(MessageBody::text("hi")),
                MessageId::new(7),
            )
            .expect("sends");

        let header = &receipt.boxed.client_header;
        assert_eq!(header.outbox_id, Some(receipt.outbox_id));
        assert_eq!(
            header.outbox_info.map(|info| info.prev_msg_id),
            Some(MessageId::new(7))
        );
    }

    #[test]
    fn send_keeps_a_caller_outbox_id() {
        let h = harness();
        let outbox_id = OutboxId::from_bytes([9u8; 8]);
        let mut plaintext = h.plaintext(MessageBody::text("hi"));
        plaintext.client_header.outbox_id = Some(outbox_id);

        let receipt = h
            .sender
            .send(&RequestContext::new(), CONV_ID, plaintext, MessageId::ZERO)
            .expect("sends");
        assert_eq!(receipt.outbox_id, outbox_id);
    }

    #[test]
    fn sent_messages_land_in_the_cache() {
        let h = harness();
        let receipt = h.send_text("hi");

        let cached = h
            .cache
            .pull(&RequestContext::new(), CONV_ID, &h.uid, 10)
            .expect("pulls");
        assert_eq!(cached, vec![receipt.boxed]);
    }

    #[test]
    fn remote_errors_are_returned_untouched() {
        let h = harness();
        h.remote.fail_next(RemoteError::RateLimited);

        let err = h
            .sender
            .send(
                &RequestContext::new(),
                CONV_ID,
                h.plaintext(MessageBody::text("hi")),
                MessageId::ZERO,
            )
            .unwrap_err();
        assert!(matches!(err, SendError::Remote(RemoteError::RateLimited)));
        assert!(!err.is_immediate_fail());
        assert!(h.remote.messages(CONV_ID).is_empty());
    }

    #[test]
    fn cancelled_context_stops_before_posting() {
        let h = harness();
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = h
            .sender
            .send(&ctx, CONV_ID, h.plaintext(MessageBody::text("hi")), MessageId::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Interrupted(_) | SendError::History(UnboxingError::Interrupted(_))
        ));
        assert_eq!(h.remote.post_count(), 0);
    }

    #[test]
    fn concurrent_sends_form_a_single_chain() {
        let h = Arc::new(harness());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let h = h.clone();
                std::thread::spawn(move || h.send_text(&format!("message {n}")))
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }

        let posted = h.remote.messages(CONV_ID);
        assert_eq!(posted.len(), 4);
        for pair in posted.windows(2) {
            let prev_ids: Vec<MessageId> =
                pair[1].client_header.prev.iter().map(|p| p.id).collect();
            assert_eq!(prev_ids, vec![pair[0].message_id().expect("posted")]);
        }
    }
}
