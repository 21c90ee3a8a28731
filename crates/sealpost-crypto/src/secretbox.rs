//! Symmetric sealing with XChaCha20-Poly1305.
//!
//! Nonces are 24 bytes, wide enough to draw at random per message. The
//! Poly1305 tag (16 bytes) is appended to the ciphertext.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::KEY_LENGTH;

pub const NONCE_LENGTH: usize = 24;

/// Authentication tag overhead added by [`seal`].
pub const TAG_LENGTH: usize = 16;

/// Draws a fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seals `plaintext` under `key` and `nonce`.
pub fn seal(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_LENGTH],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::SealFailed)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::SealFailed)
}

/// Opens a sealed blob. The nonce comes off the wire, so its length is checked.
pub fn open(key: &[u8; KEY_LENGTH], nonce: &[u8], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if nonce.len() != NONCE_LENGTH {
        return Err(CryptoError::BadNonce {
            expected: NONCE_LENGTH,
            actual: nonce.len(),
        });
    }
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::OpenFailed)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::OpenFailed)
}
