//! Doomcode controller library.
//!
//! The controller owns the assistant subprocess and the working directory.
//! It pairs with a remote operator through the relay, supervises the
//! subprocess on a pseudo-terminal, scans its output for permission prompts
//! and unified diffs, and tracks applied patches so they can be undone.

pub mod agent;
pub mod config;
pub mod diff;
pub mod error;
pub mod pairing;
pub mod patch;
pub mod relay_ws;
pub mod runtime;
pub mod scan;
pub mod session_cache;

pub use config::ControllerConfig;
pub use error::ControllerError;
