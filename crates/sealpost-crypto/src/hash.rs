//! SHA-2 digests used for message identity.
//!
//! - [`header_hash`] / [`body_hash`]: content addresses of sealed header and
//!   body bytes. V1 hashes the sealed bytes alone; V2 also binds the
//!   ciphertext version and nonce so only the trailing field is variable
//!   length.
//! - [`derive_outbox_id`]: deterministic outbox ids for callers that need
//!   idempotent enqueue.

use sealpost_types::{BodyHash, HeaderHash, OUTBOX_ID_LENGTH, OutboxId};
use sha2::{Digest, Sha256, Sha512};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}

/// Hash of `(version, nonce, sealed)` with the version as a big-endian i32.
fn versioned_digest(version: i32, nonce: &[u8], sealed: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(version.to_be_bytes());
    hasher.update(nonce);
    hasher.update(sealed);
    hasher.finalize().into()
}

/// V1 header hash: digest of the sealed bytes alone.
pub fn header_hash(sealed: &[u8]) -> HeaderHash {
    HeaderHash::from_bytes(sha256(sealed))
}

/// V2 header hash over version, nonce and sealed bytes.
///
/// The caller checks the nonce length first; a variable-length nonce would
/// make the encoding ambiguous.
pub fn header_hash_versioned(version: i32, nonce: &[u8], sealed: &[u8]) -> HeaderHash {
    HeaderHash::from_bytes(versioned_digest(version, nonce, sealed))
}

/// V1 body hash: digest of the sealed bytes alone.
pub fn body_hash(sealed: &[u8]) -> BodyHash {
    BodyHash::from_bytes(sha256(sealed))
}

/// V2 body hash over version, nonce and sealed bytes.
pub fn body_hash_versioned(version: i32, nonce: &[u8], sealed: &[u8]) -> BodyHash {
    BodyHash::from_bytes(versioned_digest(version, nonce, sealed))
}

/// Derives an outbox id from arbitrary seed bytes (first 8 bytes of SHA-256).
pub fn derive_outbox_id(seed: &[u8]) -> OutboxId {
    let digest = sha256(seed);
    let mut bytes = [0u8; OUTBOX_ID_LENGTH];
    bytes.copy_from_slice(&digest[..OUTBOX_ID_LENGTH]);
    OutboxId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            digest[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "SHA-256(\"abc\") starts with ba7816bf"
        );
    }

    #[test]
    fn versioned_hash_binds_nonce_and_version() {
        let sealed = b"sealed header";
        let base = header_hash_versioned(2, &[1; 16], sealed);
        assert_ne!(base, header_hash_versioned(1, &[1; 16], sealed));
        assert_ne!(base, header_hash_versioned(2, &[2; 16], sealed));
        assert_ne!(base, header_hash(sealed));
    }

    #[test]
    fn derived_outbox_ids_are_stable() {
        assert_eq!(derive_outbox_id(b"seed"), derive_outbox_id(b"seed"));
        assert_ne!(derive_outbox_id(b"seed"), derive_outbox_id(b"seed2"));
    }

    proptest! {
        #[test]
        fn header_hash_is_stable(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(header_hash(&data), header_hash(&data));
        }

        #[test]
        fn single_byte_flip_changes_hash(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut corrupted = data.clone();
            let i = index.index(corrupted.len());
            corrupted[i] ^= flip;
            prop_assert_ne!(header_hash(&data), header_hash(&corrupted));
        }
    }
}
