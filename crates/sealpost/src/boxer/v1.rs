//! V1 wire format: base-key seal plus a detached Ed25519 header signature.
//!
//! Also reads VNONE records, which predate versioning and differ only in
//! tolerating a missing body on deleted messages.

use bytes::Bytes;
use sealpost_crypto::hash::{body_hash, header_hash};
use sealpost_crypto::signing::{self, SIGNATURE_LENGTH};
use sealpost_crypto::{CryptKey, SignaturePrefix, SigningKeyPair, secretbox};
use sealpost_types::{
    BodyHash, EncryptedData, HeaderHash, KeyId, MessageBody, MessageBoxed, MessageBoxedVersion,
    MessageClientHeader, SignatureInfo,
};

use super::envelope::{BodyPlaintext, HeaderPlaintext, HeaderPlaintextV1, decode, encode};
use super::{BoxStrategy, UnboxStrategy, WireFormat};
use crate::error::{BoxingResult, UnboxingErrorKind, UnboxingResult};

const CIPHERTEXT_VERSION: u32 = 1;

const SIGNATURE_VERSION: u32 = 1;

pub(crate) struct V1Format {
    legacy: bool,
}

impl V1Format {
    pub const CURRENT: V1Format = V1Format { legacy: false };
    pub const LEGACY: V1Format = V1Format { legacy: true };
}

fn seal(key: &CryptKey, plaintext: &[u8]) -> BoxingResult<EncryptedData> {
    let nonce = secretbox::random_nonce();
    let sealed = secretbox::seal(key.material(), &nonce, plaintext)?;
    Ok(EncryptedData {
        version: CIPHERTEXT_VERSION,
        nonce: Bytes::copy_from_slice(&nonce),
        sealed: Bytes::from(sealed),
    })
}

impl WireFormat for V1Format {
    fn version(&self) -> MessageBoxedVersion {
        if self.legacy {
            MessageBoxedVersion::VNone
        } else {
            MessageBoxedVersion::V1
        }
    }

    fn ciphertext_version(&self) -> u32 {
        CIPHERTEXT_VERSION
    }

    fn header_hash(&self, header: &EncryptedData) -> HeaderHash {
        header_hash(&header.sealed)
    }

    fn body_hash(&self, body: &EncryptedData) -> BodyHash {
        body_hash(&body.sealed)
    }
}

impl BoxStrategy for V1Format {
    fn seal_body(
        &self,
        key: &CryptKey,
        _header: &MessageClientHeader,
        body: &[u8],
    ) -> BoxingResult<EncryptedData> {
        seal(key, body)
    }

    fn seal_header(
        &self,
        key: &CryptKey,
        mut header: HeaderPlaintextV1,
        signer: &SigningKeyPair,
    ) -> BoxingResult<(EncryptedData, Option<KeyId>)> {
        let signature = signer.sign(SignaturePrefix::CHAT_V1, &header.signing_bytes()?);
        header.header_signature = Some(SignatureInfo {
            version: SIGNATURE_VERSION,
            signature: Bytes::copy_from_slice(&signature),
            key_id: signer.key_id(),
        });
        let sealed = seal(key, &encode(&HeaderPlaintext::V1(header))?)?;
        Ok((sealed, None))
    }
}

impl UnboxStrategy for V1Format {
    fn open_header(
        &self,
        key: &CryptKey,
        boxed: &MessageBoxed,
    ) -> UnboxingResult<(HeaderPlaintextV1, KeyId)> {
        if boxed.verify_key.is_some() {
            return Err(UnboxingErrorKind::SignatureLayout("V1 carries no verify key").into());
        }

        let ciphertext = &boxed.header_ciphertext;
        let opened = secretbox::open(key.material(), &ciphertext.nonce, &ciphertext.sealed)
            .map_err(UnboxingErrorKind::HeaderOpen)?;
        let HeaderPlaintext::V1(header) = decode(&opened, "header")?;

        let info = header
            .header_signature
            .clone()
            .ok_or(UnboxingErrorKind::SignatureLayout("V1 header is unsigned"))?;
        if info.signature.len() != SIGNATURE_LENGTH {
            return Err(UnboxingErrorKind::BadSignature.into());
        }

        let signed = header
            .signing_bytes()
            .map_err(|e| UnboxingErrorKind::Malformed(format!("header: {e}")))?;
        signing::verify(&info.key_id, SignaturePrefix::CHAT_V1, &signed, &info.signature)
            .map_err(|_| UnboxingErrorKind::BadSignature)?;

        Ok((header, info.key_id))
    }

    fn open_body(
        &self,
        key: &CryptKey,
        _header: &HeaderPlaintextV1,
        body: &EncryptedData,
    ) -> UnboxingResult<MessageBody> {
        let opened = secretbox::open(key.material(), &body.nonce, &body.sealed)
            .map_err(UnboxingErrorKind::BodyOpen)?;
        let BodyPlaintext::V1 { body } = decode(&opened, "body")?;
        Ok(body)
    }

    fn compares_outbox_fields(&self) -> bool {
        false
    }

    fn tolerates_missing_body(&self) -> bool {
        self.legacy
    }
}

#[cfg(test)]
pub(crate) fn reseal_header(
    key: &CryptKey,
    ciphertext: &EncryptedData,
    edit: impl FnOnce(&mut HeaderPlaintextV1),
) -> EncryptedData {
    let opened = secretbox::open(key.material(), &ciphertext.nonce, &ciphertext.sealed)
        .expect("header opens");
    let HeaderPlaintext::V1(mut header) = decode(&opened, "header").expect("header decodes");
    edit(&mut header);
    seal(key, &encode(&HeaderPlaintext::V1(header)).expect("encodes")).expect("seals")
}
