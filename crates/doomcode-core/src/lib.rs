//! Doomcode core library.
//!
//! Shared infrastructure for the doomcode components:
//! - tracing/logging bootstrap
//! - wall-clock helpers (unix milliseconds, the wire time unit)
//! - opaque 128-bit id minting

pub mod ids;
pub mod time;
pub mod tracing_init;

pub use ids::new_id;
pub use time::{unix_timestamp, unix_timestamp_ms};
pub use tracing_init::init_tracing;
