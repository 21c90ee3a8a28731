//! Plaintext <-> boxed message codec.
//!
//! # Boxing
//!
//! ```text
//! body    --postcard--> BodyPlaintext   --seal--> body ciphertext
//!                                                  |
//!                                              body hash
//!                                                  v
//! header  --postcard--> HeaderPlaintext --sign+seal--> header ciphertext
//! ```
//!
//! # Unboxing
//!
//! The header hash is computed first, from ciphertext only, so every outcome
//! (including failures) can be tied back to the record the server sent.
//! Then the header is opened and its signature verified, the body hash and
//! the cleartext header are checked against the signed header, the body is
//! opened and the sender's key is checked against the server timestamp.
//!
//! Wire versions are handled by [`BoxStrategy`] and [`UnboxStrategy`]
//! implementations; VNONE shares the V1 implementation.

mod compare;
mod envelope;
mod v1;
mod v2;


use std::sync::Arc;

use sealpost_crypto::{CryptKey, SigningKeyPair};
use sealpost_types::{
    BodyHash, ConversationTriple, EncryptedData, HeaderHash, KeyId, MessageBody, MessageBoxed,
    MessageBoxedVersion, MessageClientHeader, MessagePlaintext, Timestamp,
};
use tracing::{debug, warn};

use crate::chain::{ChainVerifier, UnprevedSets};
use crate::context::RequestContext;
use crate::error::{
    BoxingError, BoxingResult, UnboxingError, UnboxingErrorKind, UnboxingResult,
};
use crate::ledger::InvariantLedger;
use crate::message::{MessageUnboxed, MessageUnboxedError, MessageUnboxedValid};
use crate::traits::KeyProvider;

use compare::compare_headers;
use envelope::{BodyPlaintext, HeaderPlaintextV1, encode};
use v1::V1Format;
use v2::V2Format;

// ============================================================================
// Strategies
// ============================================================================

/// Hashing rules of one wire version.
pub(crate) trait WireFormat: Send + Sync {
    fn version(&self) -> MessageBoxedVersion;

    /// `EncryptedData::version` this format writes.
    fn ciphertext_version(&self) -> u32;

    fn header_hash(&self, header: &EncryptedData) -> HeaderHash;

    fn body_hash(&self, body: &EncryptedData) -> BodyHash;
}

pub(crate) trait BoxStrategy: WireFormat {
    fn seal_body(
        &self,
        key: &CryptKey,
        header: &MessageClientHeader,
        body: &[u8],
    ) -> BoxingResult<EncryptedData>;

    /// Seals the header and returns the verify key to carry in the clear.
    fn seal_header(
        &self,
        key: &CryptKey,
        header: HeaderPlaintextV1,
        signer: &SigningKeyPair,
    ) -> BoxingResult<(EncryptedData, Option<KeyId>)>;
}

pub(crate) trait UnboxStrategy: WireFormat {
    /// Opens the header and verifies its signature. Returns the signed header
    /// and the key that signed it.
    fn open_header(
        &self,
        key: &CryptKey,
        boxed: &MessageBoxed,
    ) -> UnboxingResult<(HeaderPlaintextV1, KeyId)>;

    fn open_body(
        &self,
        key: &CryptKey,
        header: &HeaderPlaintextV1,
        body: &EncryptedData,
    ) -> UnboxingResult<MessageBody>;

    fn compares_outbox_fields(&self) -> bool;

    /// Accepts an empty body even when the server has not marked the
    /// message superseded.
    fn tolerates_missing_body(&self) -> bool {
        false
    }
}

fn box_strategy(version: MessageBoxedVersion) -> BoxingResult<&'static dyn BoxStrategy> {
    match version {
        MessageBoxedVersion::V1 => Ok(&V1Format::CURRENT),
        MessageBoxedVersion::V2 => Ok(&V2Format),
        MessageBoxedVersion::VNone => Err(BoxingError::UnsupportedVersion(version)),
    }
}

fn unbox_strategy(version: MessageBoxedVersion) -> &'static dyn UnboxStrategy {
    match version {
        MessageBoxedVersion::VNone => &V1Format::LEGACY,
        MessageBoxedVersion::V1 => &V1Format::CURRENT,
        MessageBoxedVersion::V2 => &V2Format,
    }
}

/// Header hash of a boxed message, recomputed from its ciphertext.
pub fn header_hash(boxed: &MessageBoxed) -> HeaderHash {
    unbox_strategy(boxed.version).header_hash(&boxed.header_ciphertext)
}

// ============================================================================
// Boxer
// ============================================================================

/// A window of a thread after unboxing and chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadView {
    /// Newest first.
    pub messages: Vec<MessageUnboxed>,
    pub unpreved: UnprevedSets,
}

pub struct Boxer {
    keys: Arc<dyn KeyProvider>,
    ledger: InvariantLedger,
    verifier: ChainVerifier,
}

impl Boxer {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self {
            keys,
            ledger: InvariantLedger::new(),
            verifier: ChainVerifier::new(),
        }
    }

    pub fn keys(&self) -> &Arc<dyn KeyProvider> {
        &self.keys
    }

    /// Seals a plaintext for posting.
    ///
    /// The sender fields must already be filled in. The domain name in the
    /// returned header is the canonical one reported by the key provider.
    pub fn box_message(
        &self,
        ctx: &RequestContext,
        plaintext: &MessagePlaintext,
        version: MessageBoxedVersion,
        signer: &SigningKeyPair,
    ) -> BoxingResult<MessageBoxed> {
        let strategy = box_strategy(version)?;
        let header = &plaintext.client_header;

        if plaintext.is_ephemeral() && version != MessageBoxedVersion::V2 {
            return Err(BoxingError::ExplodingRequiresV2);
        }
        let body_type = plaintext.body.message_type();
        if header.message_type != body_type {
            return Err(BoxingError::TypeMismatch {
                header: header.message_type,
                body: body_type,
            });
        }
        if header.tlf_name.trim().is_empty() {
            return Err(BoxingError::BlankDomain);
        }

        let (key, canonical) = self
            .keys
            .encryption_key(ctx, &header.tlf_name, header.tlf_public)?;
        if canonical.trim().is_empty() {
            return Err(BoxingError::BlankCanonicalName);
        }

        let mut client_header = header.clone();
        client_header.tlf_name = canonical;

        let body = encode(&BodyPlaintext::V1 {
            body: plaintext.body.clone(),
        })?;
        let body_ciphertext = strategy.seal_body(&key, &client_header, &body)?;
        let body_hash = strategy.body_hash(&body_ciphertext);

        let signed = HeaderPlaintextV1::new(&client_header, body_hash)?;
        let (header_ciphertext, verify_key) = strategy.seal_header(&key, signed, signer)?;

        debug!(
            correlation_id = %ctx.correlation_id(),
            version = %strategy.version(),
            message_type = %client_header.message_type,
            generation = key.generation(),
            "message boxed"
        );

        Ok(MessageBoxed {
            version,
            server_header: None,
            client_header,
            header_ciphertext,
            body_ciphertext,
            verify_key,
            key_generation: key.generation(),
        })
    }

    /// Opens and verifies one boxed message with a known key.
    pub fn unbox(
        &self,
        ctx: &RequestContext,
        boxed: &MessageBoxed,
        key: &CryptKey,
    ) -> UnboxingResult<(MessageUnboxedValid, HeaderHash)> {
        ctx.check()?;
        let strategy = unbox_strategy(boxed.version);
        let header_hash = strategy.header_hash(&boxed.header_ciphertext);

        let server_header = boxed
            .server_header
            .ok_or_else(|| UnboxingErrorKind::Malformed("missing server header".to_string()))?;
        if boxed.header_ciphertext.version != strategy.ciphertext_version() {
            return Err(UnboxingErrorKind::VersionMismatch(boxed.version).into());
        }

        let skip_body = if boxed.body_ciphertext.is_empty() {
            if server_header.superseded_by.is_zero() && !strategy.tolerates_missing_body() {
                return Err(UnboxingErrorKind::EmptyBody.into());
            }
            true
        } else {
            false
        };

        let (signed, verify_key) = strategy.open_header(key, boxed)?;

        if !skip_body && strategy.body_hash(&boxed.body_ciphertext) != signed.body_hash {
            return Err(UnboxingErrorKind::BodyHashInvalid.into());
        }

        let client_header = signed.to_client_header();
        compare_headers(
            &boxed.client_header,
            &client_header,
            strategy.compares_outbox_fields(),
        )?;

        let body = if skip_body {
            None
        } else {
            let body = strategy.open_body(key, &signed, &boxed.body_ciphertext)?;
            if body.message_type() != signed.message_type {
                return Err(UnboxingErrorKind::TypeMismatch {
                    header: signed.message_type,
                    body: body.message_type(),
                }
                .into());
            }
            Some(body)
        };

        let sender_device_revoked_at =
            self.check_sender_key(ctx, &signed, &verify_key, server_header.ctime)?;

        let valid = MessageUnboxedValid {
            version: boxed.version,
            server_header,
            client_header,
            body,
            header_hash,
            body_hash: signed.body_hash,
            verify_key,
            key_generation: boxed.key_generation,
            sender_device_revoked_at,
        };
        Ok((valid, header_hash))
    }

    /// Returns when the signing key was revoked, or `None` if it still is
    /// active.
    fn check_sender_key(
        &self,
        ctx: &RequestContext,
        signed: &HeaderPlaintextV1,
        verify_key: &KeyId,
        ctime: Timestamp,
    ) -> UnboxingResult<Option<Timestamp>> {
        let validity = self
            .keys
            .sender_key_valid_at(ctx, &signed.sender, verify_key, ctime)?;

        if validity.revoked_at == Some(Timestamp::EPOCH) {
            return Err(UnboxingErrorKind::ZeroRevocationTime.into());
        }
        if !validity.found || !validity.valid_at_time {
            return Err(UnboxingErrorKind::NoKey.into());
        }
        Ok(validity.revoked_at)
    }

    /// Unboxes a message received for `conv`, enforcing the cross-message
    /// invariants.
    ///
    /// Permanent failures come back as [`MessageUnboxed::Error`]; only
    /// transient failures are returned as `Err`.
    pub fn unbox_message(
        &self,
        ctx: &RequestContext,
        conv: &ConversationTriple,
        boxed: &MessageBoxed,
    ) -> UnboxingResult<MessageUnboxed> {
        match self.unbox_checked(ctx, conv, boxed) {
            Ok(valid) => Ok(valid.into()),
            Err(UnboxingError::Permanent(kind)) => {
                let header_hash = header_hash(boxed);
                let server_header = boxed.server_header.unwrap_or_default();
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    message_id = %server_header.message_id,
                    %header_hash,
                    error = %kind,
                    "message failed to unbox"
                );
                Ok(MessageUnboxed::Error(MessageUnboxedError {
                    kind,
                    message_id: server_header.message_id,
                    message_type: boxed.client_header.message_type,
                    ctime: server_header.ctime,
                    header_hash,
                }))
            }
            Err(err) => Err(err),
        }
    }

    fn unbox_checked(
        &self,
        ctx: &RequestContext,
        conv: &ConversationTriple,
        boxed: &MessageBoxed,
    ) -> UnboxingResult<MessageUnboxedValid> {
        ctx.check()?;
        if boxed.client_header.conv != *conv {
            return Err(UnboxingErrorKind::ConversationMismatch.into());
        }

        let header = &boxed.client_header;
        let key = self.keys.decryption_key(
            ctx,
            &header.tlf_name,
            header.tlf_public,
            boxed.key_generation,
        )?;

        let (valid, _) = self.unbox(ctx, boxed, &key)?;
        if valid.client_header.conv != *conv {
            return Err(UnboxingErrorKind::ConversationMismatch.into());
        }
        self.ledger.check_and_record(conv, &valid)?;
        Ok(valid)
    }

    /// Unboxes a window of a thread, newest first, and verifies its chain.
    pub fn unbox_thread(
        &self,
        ctx: &RequestContext,
        conv: &ConversationTriple,
        boxed: &[MessageBoxed],
    ) -> UnboxingResult<ThreadView> {
        let mut messages = Vec::with_capacity(boxed.len());
        for message in boxed {
            ctx.check()?;
            messages.push(self.unbox_message(ctx, conv, message)?);
        }
        messages.sort_by_key(|m| std::cmp::Reverse(m.message_id()));

        let unpreved = self
            .verifier
            .verify(ctx, &messages)
            .map_err(|err| match err {
                crate::error::ChainError::Interrupted(reason) => UnboxingError::Interrupted(reason),
                other => UnboxingError::Permanent(UnboxingErrorKind::Chain(other)),
            })?;

        Ok(ThreadView { messages, unpreved })
    }
}

impl std::fmt::Debug for Boxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Boxer").finish_non_exhaustive()
    }
}
