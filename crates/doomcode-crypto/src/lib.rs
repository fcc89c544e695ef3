//! Doomcode E2E Encryption Library
//!
//! Provides cryptographic primitives for end-to-end encryption between the
//! controller and the operator, with the relay unable to see sensitive
//! content.
//!
//! ## Crypto primitives
//!
//! - **Keypair**: X25519 static keypair per endpoint, one per session
//! - **PairBox**: precomputed X25519 shared secret between the two endpoints
//! - **Encryption**: XSalsa20-Poly1305 AEAD (NaCl box), 24-byte random nonces

pub mod error;
pub mod keypair;
pub mod pairbox;

pub use error::CryptoError;
pub use keypair::{fingerprint_of, Keypair};
pub use pairbox::{PairBox, Sealed, NONCE_SIZE};

#[cfg(any(test, feature = "test-utils"))]
pub use pairbox::test_pair;
