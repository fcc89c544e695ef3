//! Assistant subprocess supervision: binary discovery, PTY backends, input
//! injection and the supervisor loop.

mod bridge;
mod input;
mod locate;
mod pty;
mod supervisor;

pub use bridge::BridgePty;
pub use input::InputInjector;
pub use locate::locate_agent_binary;
pub use pty::{provision, NativePty, PtyBackend, DEFAULT_COLS, DEFAULT_ROWS};
pub use supervisor::{AgentSupervisor, PendingPermission, SupervisorEvent};
