//! Test manager: the broker a test driver uses to command SDK test agents.
//!
//! Each agent connects once, names itself with an `SDK_name` handshake and then
//! answers commands with a `uStatus` envelope. Messages the agent's listeners
//! receive arrive separately as `onReceive` envelopes and are queued per SDK.

mod error;
mod queue;
mod registry;
mod server;

pub use error::{ManagerError, ProtocolError};
pub use server::{ManagerConfig, TestManager, TestManagerHandle, DEFAULT_MANAGER_ADDR};
pub use tck_wire::Command;
