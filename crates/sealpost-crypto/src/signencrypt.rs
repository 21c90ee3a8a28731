//! Sign-then-encrypt for whole messages.
//!
//! The plaintext is cut into fixed-size chunks. Each chunk becomes one
//! packet:
//!
//! ```text
//! packet = seal(enc_key, chunk_nonce, signature(64B) || chunk)
//! chunk_nonce = nonce(16B) || chunk_index(u64 BE)
//! signature input = prefix || 0x00 || enc_key || chunk_nonce || SHA-512(chunk)
//! ```
//!
//! Full chunks produce packets of exactly [`PACKET_LENGTH`] bytes. The stream
//! always ends with one short packet (possibly carrying an empty chunk), so
//! truncation at a packet boundary is detected. Binding the encryption key
//! into the signature stops a recipient from re-encrypting a signed chunk
//! under another key.

use sealpost_types::KeyId;

use crate::error::{CryptoError, CryptoResult};
use crate::hash::sha512;
use crate::keys::KEY_LENGTH;
use crate::secretbox::{self, TAG_LENGTH};
use crate::signing::{self, SIGNATURE_LENGTH, SignaturePrefix, SigningKeyPair};

pub const NONCE_LENGTH: usize = 16;

/// Plaintext bytes per full packet.
pub const CHUNK_LENGTH: usize = 1 << 20;

/// Ciphertext bytes of a full packet.
pub const PACKET_LENGTH: usize = CHUNK_LENGTH + SIGNATURE_LENGTH + TAG_LENGTH;

fn chunk_nonce(nonce: &[u8; NONCE_LENGTH], index: u64) -> [u8; secretbox::NONCE_LENGTH] {
    let mut out = [0u8; secretbox::NONCE_LENGTH];
    out[..NONCE_LENGTH].copy_from_slice(nonce);
    out[NONCE_LENGTH..].copy_from_slice(&index.to_be_bytes());
    out
}

fn signature_input(
    chunk: &[u8],
    enc_key: &[u8; KEY_LENGTH],
    prefix: SignaturePrefix,
    chunk_nonce: &[u8; secretbox::NONCE_LENGTH],
) -> Vec<u8> {
    let prefix = prefix.as_bytes();
    let mut input = Vec::with_capacity(prefix.len() + 1 + KEY_LENGTH + chunk_nonce.len() + 64);
    input.extend_from_slice(prefix);
    input.push(0x00);
    input.extend_from_slice(enc_key);
    input.extend_from_slice(chunk_nonce);
    input.extend_from_slice(&sha512(chunk));
    input
}

/// Chunked codec; the chunk length is only configurable inside the crate.
struct Codec {
    chunk_length: usize,
}

impl Codec {
    const DEFAULT: Codec = Codec {
        chunk_length: CHUNK_LENGTH,
    };

    fn packet_length(&self) -> usize {
        self.chunk_length + SIGNATURE_LENGTH + TAG_LENGTH
    }

    fn seal(
        &self,
        plaintext: &[u8],
        enc_key: &[u8; KEY_LENGTH],
        signer: &SigningKeyPair,
        prefix: SignaturePrefix,
        nonce: &[u8; NONCE_LENGTH],
    ) -> CryptoResult<Vec<u8>> {
        let full_chunks = plaintext.len() / self.chunk_length;
        let mut output = Vec::with_capacity(
            (full_chunks + 1) * self.packet_length(),
        );

        let mut index = 0u64;
        let mut rest = plaintext;
        loop {
            let take = rest.len().min(self.chunk_length);
            let (chunk, tail) = rest.split_at(take);
            let packet_nonce = chunk_nonce(nonce, index);
            let signature = signer.sign_raw(&signature_input(chunk, enc_key, prefix, &packet_nonce));

            let mut signed = Vec::with_capacity(SIGNATURE_LENGTH + chunk.len());
            signed.extend_from_slice(&signature);
            signed.extend_from_slice(chunk);
            output.extend(secretbox::seal(enc_key, &packet_nonce, &signed)?);

            // A short chunk is the terminator.
            if take < self.chunk_length {
                break;
            }
            rest = tail;
            index += 1;
        }
        Ok(output)
    }

    fn open(
        &self,
        sealed: &[u8],
        enc_key: &[u8; KEY_LENGTH],
        verify_key: &KeyId,
        prefix: SignaturePrefix,
        nonce: &[u8; NONCE_LENGTH],
    ) -> CryptoResult<Vec<u8>> {
        let packet_length = self.packet_length();
        let mut output = Vec::with_capacity(sealed.len());
        let mut index = 0u64;
        let mut rest = sealed;

        loop {
            let is_final = rest.len() < packet_length;
            let take = rest.len().min(packet_length);
            let (packet, tail) = rest.split_at(take);
            if packet.len() < SIGNATURE_LENGTH + TAG_LENGTH {
                return Err(CryptoError::Truncated);
            }

            let packet_nonce = chunk_nonce(nonce, index);
            let signed = secretbox::open(enc_key, &packet_nonce, packet)?;
            let (signature, chunk) = signed.split_at(SIGNATURE_LENGTH);
            signing::verify_raw(
                verify_key,
                &signature_input(chunk, enc_key, prefix, &packet_nonce),
                signature,
            )?;
            output.extend_from_slice(chunk);

            if is_final {
                return Ok(output);
            }
            rest = tail;
            index += 1;
        }
    }
}

/// Signs and seals `plaintext` as a sequence of packets.
pub fn seal_whole(
    plaintext: &[u8],
    enc_key: &[u8; KEY_LENGTH],
    signer: &SigningKeyPair,
    prefix: SignaturePrefix,
    nonce: &[u8; NONCE_LENGTH],
) -> CryptoResult<Vec<u8>> {
    Codec::DEFAULT.seal(plaintext, enc_key, signer, prefix, nonce)
}

/// Opens and verifies a sequence of packets made by [`seal_whole`].
///
/// The nonce comes off the wire, so its length is checked here.
pub fn open_whole(
    sealed: &[u8],
    enc_key: &[u8; KEY_LENGTH],
    verify_key: &KeyId,
    prefix: SignaturePrefix,
    nonce: &[u8],
) -> CryptoResult<Vec<u8>> {
    let nonce: &[u8; NONCE_LENGTH] = nonce.try_into().map_err(|_| CryptoError::BadNonce {
        expected: NONCE_LENGTH,
        actual: nonce.len(),
    })?;
    Codec::DEFAULT.open(sealed, enc_key, verify_key, prefix, nonce)
}

/// Draws a fresh random 16-byte nonce.
pub fn random_nonce() -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce.copy_from_slice(&secretbox::random_nonce()[..NONCE_LENGTH]);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: Codec = Codec { chunk_length: 8 };

    fn fixture() -> ([u8; 32], SigningKeyPair, [u8; NONCE_LENGTH]) {
        ([3u8; 32], SigningKeyPair::from_seed(&[5u8; 32]), [9u8; NONCE_LENGTH])
    }

    #[test]
    fn roundtrip_single_packet() {
        let (key, signer, nonce) = fixture();
        let sealed = seal_whole(b"header bytes", &key, &signer, SignaturePrefix::CHAT_V2, &nonce)
            .expect("seal");
        let opened = open_whole(&sealed, &key, &signer.key_id(), SignaturePrefix::CHAT_V2, &nonce)
            .expect("open");
        assert_eq!(opened, b"header bytes");
    }

    #[test]
    fn empty_plaintext_still_has_terminator() {
        let (key, signer, nonce) = fixture();
        let sealed = seal_whole(b"", &key, &signer, SignaturePrefix::CHAT_V2, &nonce).expect("seal");
        assert_eq!(sealed.len(), SIGNATURE_LENGTH + TAG_LENGTH);
        let opened = open_whole(&sealed, &key, &signer.key_id(), SignaturePrefix::CHAT_V2, &nonce)
            .expect("open");
        assert!(opened.is_empty());
    }

    #[test]
    fn multi_packet_roundtrip() {
        let (key, signer, nonce) = fixture();
        let plaintext: Vec<u8> = (0..=40u8).collect();
        let sealed = SMALL
            .seal(&plaintext, &key, &signer, SignaturePrefix::CHAT_V2, &nonce)
            .expect("seal");
        // 41 bytes at 8 per chunk: five full packets plus a terminator
        assert_eq!(sealed.len(), 5 * SMALL.packet_length() + 1 + SIGNATURE_LENGTH + TAG_LENGTH);
        let opened = SMALL
            .open(&sealed, &key, &signer.key_id(), SignaturePrefix::CHAT_V2, &nonce)
            .expect("open");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn exact_multiple_gets_empty_terminator() {
        let (key, signer, nonce) = fixture();
        let plaintext = [1u8; 16];
        let sealed = SMALL
            .seal(&plaintext, &key, &signer, SignaturePrefix::CHAT_V2, &nonce)
            .expect("seal");
        assert_eq!(sealed.len(), 2 * SMALL.packet_length() + SIGNATURE_LENGTH + TAG_LENGTH);
    }

    #[test]
    fn dropping_the_terminator_is_detected() {
        let (key, signer, nonce) = fixture();
        let plaintext = [1u8; 16];
        let sealed = SMALL
            .seal(&plaintext, &key, &signer, SignaturePrefix::CHAT_V2, &nonce)
            .expect("seal");
        let truncated = &sealed[..2 * SMALL.packet_length()];
        assert_eq!(
            SMALL.open(truncated, &key, &signer.key_id(), SignaturePrefix::CHAT_V2, &nonce),
            Err(CryptoError::Truncated)
        );
    }

    #[test]
    fn swapped_packets_fail() {
        let (key, signer, nonce) = fixture();
        let plaintext: Vec<u8> = (0..20u8).collect();
        let sealed = SMALL
            .seal(&plaintext, &key, &signer, SignaturePrefix::CHAT_V2, &nonce)
            .expect("seal");
        let len = SMALL.packet_length();
        let mut swapped = sealed.clone();
        swapped[..len].copy_from_slice(&sealed[len..2 * len]);
        swapped[len..2 * len].copy_from_slice(&sealed[..len]);
        assert_eq!(
            SMALL.open(&swapped, &key, &signer.key_id(), SignaturePrefix::CHAT_V2, &nonce),
            Err(CryptoError::OpenFailed)
        );
    }

    #[test]
    fn wrong_verify_key_fails() {
        let (key, signer, nonce) = fixture();
        let other = SigningKeyPair::from_seed(&[6u8; 32]);
        let sealed = seal_whole(b"hi", &key, &signer, SignaturePrefix::CHAT_V2, &nonce).expect("seal");
        assert_eq!(
            open_whole(&sealed, &key, &other.key_id(), SignaturePrefix::CHAT_V2, &nonce),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn wrong_prefix_fails() {
        let (key, signer, nonce) = fixture();
        let sealed = seal_whole(b"hi", &key, &signer, SignaturePrefix::CHAT_V2, &nonce).expect("seal");
        assert_eq!(
            open_whole(&sealed, &key, &signer.key_id(), SignaturePrefix::CHAT_V1, &nonce),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn bad_nonce_length_is_rejected() {
        let (key, signer, nonce) = fixture();
        let sealed = seal_whole(b"hi", &key, &signer, SignaturePrefix::CHAT_V2, &nonce).expect("seal");
        assert_eq!(
            open_whole(&sealed, &key, &signer.key_id(), SignaturePrefix::CHAT_V2, &[0u8; 24]),
            Err(CryptoError::BadNonce {
                expected: 16,
                actual: 24
            })
        );
    }
}
