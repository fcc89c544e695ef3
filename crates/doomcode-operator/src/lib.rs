//! Doomcode operator session client.
//!
//! The wire side of a remote operator: consumes a pairing payload, joins the
//! session at the relay, and exchanges end-to-end encrypted payloads with
//! the controller. Rendering, input surfaces and everything visual sit on
//! top of the event stream this crate produces.

pub mod error;
pub mod sequencer;
pub mod session;

pub use error::OperatorError;
pub use sequencer::OutputSequencer;
pub use session::{OperatorEvent, OperatorSession};
