//! Ed25519 signatures with domain-separation prefixes.
//!
//! Every signature covers `prefix || 0x00 || message`, so a signature made
//! for one purpose never verifies for another. Verification uses RFC 8032
//! strict mode, rejecting non-canonical signatures.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sealpost_types::KeyId;

use crate::error::{CryptoError, CryptoResult};

pub const SIGNATURE_LENGTH: usize = 64;

/// Domain-separation prefix for signatures. Never contains a NUL byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignaturePrefix(&'static [u8]);

impl SignaturePrefix {
    /// Detached header signatures of V1 messages.
    pub const CHAT_V1: SignaturePrefix = SignaturePrefix(b"Sealpost-Chat-MBv1");
    /// Sign-encrypted headers of V2 messages.
    pub const CHAT_V2: SignaturePrefix = SignaturePrefix(b"Sealpost-Chat-MBv2");

    pub fn as_bytes(&self) -> &'static [u8] {
        self.0
    }

    fn frame(&self, message: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(self.0.len() + 1 + message.len());
        framed.extend_from_slice(self.0);
        framed.push(0x00);
        framed.extend_from_slice(message);
        framed
    }
}

/// A device's Ed25519 signing key.
pub struct SigningKeyPair {
    inner: SigningKey,
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("key_id", &self.key_id())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuilds a key pair from its 32-byte seed. Seeds must be random.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: SigningKey::from_bytes(seed),
        }
    }

    /// The public key, which doubles as the key's identifier.
    pub fn key_id(&self) -> KeyId {
        KeyId::from_bytes(self.inner.verifying_key().to_bytes())
    }

    /// Signs `prefix || 0x00 || message`.
    pub fn sign(&self, prefix: SignaturePrefix, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.sign_raw(&prefix.frame(message))
    }

    /// Signs bytes that already carry their own domain separation.
    pub(crate) fn sign_raw(&self, input: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.inner.sign(input).to_bytes()
    }
}

/// Verifies a prefixed signature made by `key_id`.
pub fn verify(
    key_id: &KeyId,
    prefix: SignaturePrefix,
    message: &[u8],
    signature: &[u8],
) -> CryptoResult<()> {
    verify_raw(key_id, &prefix.frame(message), signature)
}

pub(crate) fn verify_raw(key_id: &KeyId, input: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let key = VerifyingKey::from_bytes(key_id.as_bytes()).map_err(|_| CryptoError::InvalidKey)?;
    let signature = Signature::from_slice(signature)
        .map_err(|_| CryptoError::MalformedSignature(signature.len()))?;
    key.verify_strict(input, &signature)
        .map_err(|_| CryptoError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(SignaturePrefix::CHAT_V1, b"header");
        assert!(verify(&pair.key_id(), SignaturePrefix::CHAT_V1, b"header", &sig).is_ok());
    }

    #[test]
    fn prefix_separates_domains() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(SignaturePrefix::CHAT_V1, b"header");
        assert_eq!(
            verify(&pair.key_id(), SignaturePrefix::CHAT_V2, b"header", &sig),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn wrong_key_fails() {
        let signer = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let sig = signer.sign(SignaturePrefix::CHAT_V1, b"header");
        assert_eq!(
            verify(&other.key_id(), SignaturePrefix::CHAT_V1, b"header", &sig),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn flipped_signature_bit_fails() {
        let pair = SigningKeyPair::generate();
        let mut sig = pair.sign(SignaturePrefix::CHAT_V1, b"header");
        sig[10] ^= 0x04;
        assert!(verify(&pair.key_id(), SignaturePrefix::CHAT_V1, b"header", &sig).is_err());
    }

    #[test]
    fn truncated_signature_is_malformed() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(SignaturePrefix::CHAT_V1, b"header");
        assert_eq!(
            verify(&pair.key_id(), SignaturePrefix::CHAT_V1, b"header", &sig[..63]),
            Err(CryptoError::MalformedSignature(63))
        );
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = SigningKeyPair::from_seed(&[0x42; 32]);
        let b = SigningKeyPair::from_seed(&[0x42; 32]);
        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(
            a.sign(SignaturePrefix::CHAT_V2, b"m"),
            b.sign(SignaturePrefix::CHAT_V2, b"m")
        );
    }

    #[test]
    fn debug_redacts_secret() {
        let pair = SigningKeyPair::from_seed(&[0x42; 32]);
        assert!(format!("{pair:?}").contains("<redacted>"));
    }
}
