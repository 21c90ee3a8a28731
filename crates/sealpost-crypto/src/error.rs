//! Error types for cryptographic operations.

use thiserror::Error;

/// Failures raised by sealing, opening, signing and verification.
///
/// Callers classify these as permanent or transient. Variants never say
/// which byte of a ciphertext was wrong.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("bad nonce length: expected {expected}, got {actual}")]
    BadNonce { expected: usize, actual: usize },

    #[error("sealing failed")]
    SealFailed,

    #[error("decryption failed: ciphertext tampered or wrong key")]
    OpenFailed,

    #[error("signature verification failed")]
    BadSignature,

    #[error("malformed signature of {0} bytes")]
    MalformedSignature(usize),

    #[error("invalid verifying key")]
    InvalidKey,

    #[error("sealed stream is truncated")]
    Truncated,

    #[error("key derivation failed")]
    KeyDerivation,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
