//! Doomcode relay server library.
//!
//! A stateless two-party rendezvous: controllers create sessions, operators
//! join them, and encrypted envelopes are forwarded between the two, or
//! queued while the operator is away. The relay only ever reads the envelope
//! header; it never holds keys or plaintext.

pub mod registry;
pub mod server;
pub mod storage;
