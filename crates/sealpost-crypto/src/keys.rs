//! Symmetric encryption-domain keys.
//!
//! A [`CryptKey`] is one epoch ("generation") of an encryption domain's key.
//! Messages record the generation that sealed them so old history stays
//! readable after rotation. Key material is zeroed on drop.

use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

pub const KEY_LENGTH: usize = 32;

/// HKDF `info` strings that separate keys derived from one base key.
pub struct DeriveReason(&'static [u8]);

impl DeriveReason {
    /// Header/body key for V2 messages.
    pub const CHAT_MESSAGE: DeriveReason = DeriveReason(b"Sealpost-Derived-Chat-Message-1");
    /// Body key for exploding messages.
    pub const EXPLODING_BODY: DeriveReason = DeriveReason(b"Sealpost-Derived-Exploding-Body-1");

    pub fn as_bytes(&self) -> &'static [u8] {
        self.0
    }
}

/// One generation of an encryption domain's symmetric key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptKey {
    #[zeroize(skip)]
    generation: u32,
    material: [u8; KEY_LENGTH],
}

impl CryptKey {
    pub fn new(generation: u32, material: [u8; KEY_LENGTH]) -> Self {
        Self {
            generation,
            material,
        }
    }

    /// The well-known key used by public conversations: all zeros at generation 1.
    ///
    /// Public messages are still signed; the seal only provides framing.
    pub fn public() -> Self {
        Self::new(1, [0u8; KEY_LENGTH])
    }

    /// Generates fresh key material from the OS CSPRNG.
    pub fn generate(generation: u32) -> Self {
        let mut material = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut material);
        Self::new(generation, material)
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Raw key bytes (sensitive).
    pub fn material(&self) -> &[u8; KEY_LENGTH] {
        &self.material
    }

    /// Derives a purpose-specific key with HKDF-SHA256, keeping the generation.
    pub fn derive(&self, reason: &DeriveReason) -> CryptoResult<CryptKey> {
        let hk = Hkdf::<Sha256>::new(None, &self.material);
        let mut okm = [0u8; KEY_LENGTH];
        hk.expand(reason.as_bytes(), &mut okm)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(CryptKey::new(self.generation, okm))
    }
}

impl PartialEq for CryptKey {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && bool::from(self.material.ct_eq(&other.material))
    }
}

impl Eq for CryptKey {}

impl std::fmt::Debug for CryptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptKey")
            .field("generation", &self.generation)
            .field("material", &"<redacted>")
            .finish()
    }
}
