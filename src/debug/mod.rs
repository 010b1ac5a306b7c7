//! Interactive debugging sessions on top of the DAP client.

pub mod manager;
pub mod reaper;
pub mod session;
pub mod terminator;

pub use manager::{DebugBackend, DebugSessionManager, NargoBackend, StartOutcome};
pub use session::{DebugSession, Inspection, Location, SessionStatus, StepOutcome};
