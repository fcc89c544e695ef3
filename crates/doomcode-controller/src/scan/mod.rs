//! Output scanners.
//!
//! The supervisor buffers the subprocess's combined PTY output into a rolling
//! window; the permission detector and the diff extractor consume the window
//! on every chunk.

mod diff_watch;
mod permission;
mod risk;
mod window;

pub use diff_watch::DiffExtractor;
pub use permission::{PermissionDetector, PermissionHit};
pub use risk::estimate_risk;
pub use window::ScanWindow;
