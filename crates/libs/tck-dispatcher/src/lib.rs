//! Flooding broker for dispatcher frames.
//!
//! Every frame a client writes is relayed, unmodified, to every other connected
//! client. The dispatcher reads only the 4-byte length prefix so it can relay
//! whole frames; it never decodes the message inside.

mod registry;
mod server;

pub use registry::{BroadcastTrace, ConnectionRegistry, Frame, PeerSender};
pub use server::{Dispatcher, DispatcherConfig, DispatcherHandle, DEFAULT_DISPATCHER_ADDR};
