//! Debug Adapter Protocol client.
//!
//! Drives a `nargo dap` subprocess over its stdio:
//! - `codec`: Content-Length framing and reassembly of partial chunks.
//! - `protocol`: typed requests, responses, events, and bodies.
//! - `inbox`: buffered messages and one-shot listeners.
//! - `client`: sequence allocation, request correlation, event waiting.
//! - `reader`: task feeding adapter stdout into the inbox.
//! - `spawner`: process launch, stderr logging, exit supervision.

pub mod client;
pub mod codec;
pub mod inbox;
pub mod protocol;
pub mod reader;
pub mod spawner;
