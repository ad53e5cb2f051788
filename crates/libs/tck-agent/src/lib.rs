//! Test agent for the Rust SDK.
//!
//! Connects to the test manager, names itself with an `SDK_name` handshake and
//! executes each command it receives against a [`tck_transport::Transport`].

mod agent;
mod error;
mod listener;

pub use agent::{AgentConfig, TestAgent};
pub use error::AgentError;
pub use listener::ForwardingListener;
