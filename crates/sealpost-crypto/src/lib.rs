//! # sealpost-crypto: Cryptographic primitives for `Sealpost`
//!
//! Thin, typed wrappers over audited crates. Nothing here knows about
//! messages; the boxer composes these pieces into wire versions.
//!
//! - [`keys`]: [`CryptKey`] generations and HKDF derivation (`hkdf` + `sha2`)
//! - [`secretbox`]: XChaCha20-Poly1305 seal/open (`chacha20poly1305`)
//! - [`signing`]: prefixed Ed25519 signatures (`ed25519-dalek`)
//! - [`signencrypt`]: chunked sign-then-encrypt
//! - [`hash`]: header/body hashes and outbox id derivation (`sha2`)
//! - [`crc32`]: frame checksums for the outbox file

pub mod crc32;
mod error;
pub mod hash;
pub mod keys;
pub mod secretbox;
pub mod signencrypt;
pub mod signing;

pub use crc32::crc32;
pub use error::{CryptoError, CryptoResult};
pub use hash::derive_outbox_id;
pub use keys::{CryptKey, DeriveReason};
pub use signing::{SignaturePrefix, SigningKeyPair};
