//! Precomputed pair box for session encryption.
//!
//! Once both public keys are known, each side builds a `PairBox` from its own
//! secret and the peer's public key. The X25519 shared secret is derived once
//! and reused for every seal/open until the session ends.

use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};

use crate::error::CryptoError;
use crate::keypair::Keypair;

/// Nonce size for XSalsa20-Poly1305 (NaCl box).
pub const NONCE_SIZE: usize = 24;

/// Sealed payload with the metadata needed to open it.
#[derive(Debug, Clone)]
pub struct Sealed {
    /// 24-byte random nonce used for this seal.
    pub nonce: [u8; NONCE_SIZE],
    /// XSalsa20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
}

/// A precomputed box between two session endpoints.
///
/// Wraps `crypto_box::SalsaBox`: the Diffie-Hellman shared secret is computed
/// once at construction; seal/open only run the symmetric AEAD.
pub struct PairBox {
    inner: SalsaBox,
}

impl PairBox {
    /// Precompute the shared secret between our secret key and the peer's
    /// public key.
    pub fn new(my_secret: &SecretKey, peer_public: &PublicKey) -> Self {
        Self {
            inner: SalsaBox::new(peer_public, my_secret),
        }
    }

    /// Convenience constructor from a full keypair.
    pub fn from_keypair(mine: &Keypair, peer_public: &PublicKey) -> Self {
        Self::new(mine.secret(), peer_public)
    }

    /// Seal plaintext with a fresh random 24-byte nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce.as_slice());
        Ok(Sealed {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Open a sealed payload.
    ///
    /// Any tampering, truncation or cross-session misrouting yields the
    /// single `AuthFailure` kind.
    pub fn open(&self, nonce_bytes: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: nonce_bytes.len(),
            });
        }
        let nonce = Nonce::from_slice(nonce_bytes);
        self.inner
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthFailure)
    }
}

/// Create a matched pair of `PairBox`es for testing.
///
/// Returns (`controller_box`, `operator_box`) that can open each other's
/// sealed payloads.
#[cfg(any(test, feature = "test-utils"))]
pub fn test_pair() -> (PairBox, PairBox) {
    let controller = Keypair::generate();
    let operator = Keypair::generate();
    let controller_box = PairBox::from_keypair(&controller, operator.public_key());
    let operator_box = PairBox::from_keypair(&operator, controller.public_key());
    (controller_box, operator_box)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let (controller, operator) = test_pair();
        let plaintext = b"Hello, encrypted world!";

        let sealed = controller.seal(plaintext).unwrap();
        let opened = operator.open(&sealed.nonce, &sealed.ciphertext).unwrap();
        assert_eq!(opened, plaintext);

        // Reverse direction
        let sealed2 = operator.seal(b"reply").unwrap();
        let opened2 = controller.open(&sealed2.nonce, &sealed2.ciphertext).unwrap();
        assert_eq!(opened2, b"reply");
    }

    #[test]
    fn seal_empty_payload() {
        let (controller, operator) = test_pair();
        let sealed = controller.seal(b"").unwrap();
        let opened = operator.open(&sealed.nonce, &sealed.ciphertext).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn seal_large_payload() {
        let (controller, operator) = test_pair();
        let plaintext = vec![0xABu8; 1024 * 1024];
        let sealed = controller.seal(&plaintext).unwrap();
        let opened = operator.open(&sealed.nonce, &sealed.ciphertext).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_with_wrong_pair_fails() {
        let (controller, _operator) = test_pair();
        let (_, wrong_operator) = test_pair();

        let sealed = controller.seal(b"secret data").unwrap();
        let result = wrong_operator.open(&sealed.nonce, &sealed.ciphertext);
        assert!(matches!(result, Err(CryptoError::AuthFailure)));
    }

    #[test]
    fn single_bit_flip_in_ciphertext_fails() {
        let (controller, operator) = test_pair();
        let mut sealed = controller.seal(b"secret data").unwrap();
        if let Some(byte) = sealed.ciphertext.first_mut() {
            *byte ^= 0x01;
        }
        let result = operator.open(&sealed.nonce, &sealed.ciphertext);
        assert!(matches!(result, Err(CryptoError::AuthFailure)));
    }

    #[test]
    fn single_bit_flip_in_nonce_fails() {
        let (controller, operator) = test_pair();
        let mut sealed = controller.seal(b"secret data").unwrap();
        sealed.nonce[0] ^= 0x01;
        let result = operator.open(&sealed.nonce, &sealed.ciphertext);
        assert!(matches!(result, Err(CryptoError::AuthFailure)));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let (controller, operator) = test_pair();
        let sealed = controller.seal(b"secret data").unwrap();
        let truncated = &sealed.ciphertext[..sealed.ciphertext.len() - 1];
        assert!(matches!(
            operator.open(&sealed.nonce, truncated),
            Err(CryptoError::AuthFailure)
        ));
    }

    #[test]
    fn open_with_invalid_nonce_length_returns_error() {
        let (_, operator) = test_pair();
        let result = operator.open(&[0u8; 12], b"ciphertext");
        assert!(matches!(
            result,
            Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: 12
            })
        ));
    }

    #[test]
    fn nonces_never_repeat() {
        let (controller, _) = test_pair();
        let mut nonces = std::collections::HashSet::new();
        for _ in 0..1000 {
            let sealed = controller.seal(b"x").unwrap();
            assert!(nonces.insert(sealed.nonce), "nonce collision detected");
        }
    }

    #[test]
    fn ciphertext_carries_auth_tag_overhead() {
        let (controller, _) = test_pair();
        let sealed = controller.seal(b"payload").unwrap();
        assert_eq!(sealed.ciphertext.len(), b"payload".len() + 16);
    }
}
