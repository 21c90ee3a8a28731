//! V2 wire format: the header is signed and encrypted in one pass under a
//! per-purpose key derived from the base key.
//!
//! ```text
//! message key   = HKDF(base key, "chat message")
//! body key      = message key, or HKDF(base key, "exploding body")
//! header        = signencrypt(message key, signer, 16-byte nonce)
//! hash(x)       = SHA-256(i32 BE version || nonce || sealed)
//! ```

use bytes::Bytes;
use sealpost_crypto::hash::{body_hash_versioned, header_hash_versioned};
use sealpost_crypto::{
    CryptKey, CryptoError, DeriveReason, SignaturePrefix, SigningKeyPair, secretbox, signencrypt,
};
use sealpost_types::{
    BodyHash, EncryptedData, HeaderHash, KeyId, MessageBody, MessageBoxed, MessageBoxedVersion,
    MessageClientHeader,
};

use super::envelope::{BodyPlaintext, HeaderPlaintext, HeaderPlaintextV1, decode, encode};
use super::{BoxStrategy, UnboxStrategy, WireFormat};
use crate::error::{BoxingResult, UnboxingErrorKind, UnboxingResult};

const CIPHERTEXT_VERSION: u32 = 2;

pub(crate) struct V2Format;

fn message_key(key: &CryptKey) -> Result<CryptKey, CryptoError> {
    key.derive(&DeriveReason::CHAT_MESSAGE)
}

fn body_key(key: &CryptKey, exploding: bool) -> Result<CryptKey, CryptoError> {
    if exploding {
        key.derive(&DeriveReason::EXPLODING_BODY)
    } else {
        message_key(key)
    }
}

impl WireFormat for V2Format {
    fn version(&self) -> MessageBoxedVersion {
        MessageBoxedVersion::V2
    }

    fn ciphertext_version(&self) -> u32 {
        CIPHERTEXT_VERSION
    }

    fn header_hash(&self, header: &EncryptedData) -> HeaderHash {
        header_hash_versioned(header.version as i32, &header.nonce, &header.sealed)
    }

    fn body_hash(&self, body: &EncryptedData) -> BodyHash {
        body_hash_versioned(body.version as i32, &body.nonce, &body.sealed)
    }
}

impl BoxStrategy for V2Format {
    fn seal_body(
        &self,
        key: &CryptKey,
        header: &MessageClientHeader,
        body: &[u8],
    ) -> BoxingResult<EncryptedData> {
        let key = body_key(key, header.is_ephemeral())?;
        let nonce = secretbox::random_nonce();
        let sealed = secretbox::seal(key.material(), &nonce, body)?;
        Ok(EncryptedData {
            version: CIPHERTEXT_VERSION,
            nonce: Bytes::copy_from_slice(&nonce),
            sealed: Bytes::from(sealed),
        })
    }

    fn seal_header(
        &self,
        key: &CryptKey,
        mut header: HeaderPlaintextV1,
        signer: &SigningKeyPair,
    ) -> BoxingResult<(EncryptedData, Option<KeyId>)> {
        header.header_signature = None;
        let plaintext = encode(&HeaderPlaintext::V1(header))?;

        let key = message_key(key)?;
        let nonce = signencrypt::random_nonce();
        let sealed = signencrypt::seal_whole(
            &plaintext,
            key.material(),
            signer,
            SignaturePrefix::CHAT_V2,
            &nonce,
        )?;

        let ciphertext = EncryptedData {
            version: CIPHERTEXT_VERSION,
            nonce: Bytes::copy_from_slice(&nonce),
            sealed: Bytes::from(sealed),
        };
        Ok((ciphertext, Some(signer.key_id())))
    }
}

impl UnboxStrategy for V2Format {
    fn open_header(
        &self,
        key: &CryptKey,
        boxed: &MessageBoxed,
    ) -> UnboxingResult<(HeaderPlaintextV1, KeyId)> {
        let verify_key = boxed
            .verify_key
            .ok_or(UnboxingErrorKind::SignatureLayout("V2 requires a verify key"))?;

        let key = message_key(key).map_err(UnboxingErrorKind::HeaderOpen)?;
        let ciphertext = &boxed.header_ciphertext;
        let opened = signencrypt::open_whole(
            &ciphertext.sealed,
            key.material(),
            &verify_key,
            SignaturePrefix::CHAT_V2,
            &ciphertext.nonce,
        )
        .map_err(|e| match e {
            CryptoError::BadNonce { actual, .. } => {
                UnboxingErrorKind::Malformed(format!("header nonce of {actual} bytes"))
            }
            other => UnboxingErrorKind::SealedSignature(other),
        })?;

        let HeaderPlaintext::V1(header) = decode(&opened, "header")?;
        if header.header_signature.is_some() {
            return Err(
                UnboxingErrorKind::SignatureLayout("V2 header carries a detached signature").into(),
            );
        }
        Ok((header, verify_key))
    }

    fn open_body(
        &self,
        key: &CryptKey,
        header: &HeaderPlaintextV1,
        body: &EncryptedData,
    ) -> UnboxingResult<MessageBody> {
        let key = body_key(key, header.ephemeral.is_some()).map_err(UnboxingErrorKind::BodyOpen)?;
        let opened = secretbox::open(key.material(), &body.nonce, &body.sealed)
            .map_err(UnboxingErrorKind::BodyOpen)?;
        let BodyPlaintext::V1 { body } = decode(&opened, "body")?;
        Ok(body)
    }

    fn compares_outbox_fields(&self) -> bool {
        true
    }
}

/// Reopens a single-packet header and flips one bit of its chunk signature
/// before sealing it again under the same key and nonce.
#[cfg(test)]
pub(crate) fn reseal_with_flipped_signature(
    key: &CryptKey,
    ciphertext: &EncryptedData,
    bit: usize,
) -> EncryptedData {
    let key = message_key(key).expect("derives");
    let mut packet_nonce = [0u8; secretbox::NONCE_LENGTH];
    packet_nonce[..signencrypt::NONCE_LENGTH].copy_from_slice(&ciphertext.nonce);

    let mut signed =
        secretbox::open(key.material(), &packet_nonce, &ciphertext.sealed).expect("packet opens");
    signed[bit / 8] ^= 1 << (bit % 8);
    let sealed = secretbox::seal(key.material(), &packet_nonce, &signed).expect("seals");
    EncryptedData {
        sealed: Bytes::from(sealed),
        ..ciphertext.clone()
    }
}
