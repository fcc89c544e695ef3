//! Doomcode wire protocol.
//!
//! Two disjoint frame shapes share the duplex transport:
//!
//! - **Control frames** carry a top-level `action` field and travel in
//!   plaintext; they drive session lifecycle on the relay.
//! - **Envelope frames** carry `encryptedPayload` and are routed by the relay
//!   without ever being decoded past the outer header.
//!
//! The payload kinds that travel *inside* envelopes (E2E-encrypted JSON) are
//! defined in [`payload`]; the relay never sees them.

pub mod control;
pub mod envelope;
pub mod error;
pub mod pairing;
pub mod payload;

pub use control::{ClientControl, ErrorCode, RelayControl};
pub use envelope::{frame_kind, Envelope, FrameKind, Role, ENVELOPE_VERSION};
pub use error::ProtoError;
pub use pairing::{PairingPayload, PAIRING_TTL_MS};
pub use payload::{
    AgentCommand, AgentConfig, AgentStatus, AppliedPatchInfo, PatchDecisionKind, PatchFileRecord,
    PatchFileSummary, Payload, PermissionAction, PermissionDecision, RiskLevel,
};
