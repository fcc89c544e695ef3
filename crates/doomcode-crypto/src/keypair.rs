//! Session keypair management.
//!
//! Each endpoint mints one long-lived X25519 keypair per session. The secret
//! half never leaves its origin device; the public half travels once via the
//! pairing payload and once via the relay join.

use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, SecretKey};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// An X25519 keypair for one endpoint of a session.
pub struct Keypair {
    secret: SecretKey,
    public: PublicKey,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &fingerprint_of(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl Keypair {
    /// Generate a new random keypair from the platform CSPRNG.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        let secret = SecretKey::from(arr);
        let public = secret.public_key();
        arr.zeroize();
        Ok(Self { secret, public })
    }

    /// Get the public key.
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Get the public key as raw bytes.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Get the secret key as raw bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Get the secret key reference for shared-secret precomputation.
    pub const fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Compute a human-readable fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self.public.as_bytes())
    }
}

/// Parse a peer public key from raw 32-byte input.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(bytes);
    Ok(PublicKey::from(arr))
}

/// Compute a colon-separated hex fingerprint from raw public key bytes.
///
/// Uses SHA-256 of the public key, truncated to the first eight bytes.
pub fn fingerprint_of(pubkey_bytes: &[u8; 32]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(pubkey_bytes);
    hash[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
