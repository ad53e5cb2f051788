//! Topic publish/subscribe and correlated RPC over one dispatcher connection.
//!
//! A [`Transport`] owns a single TCP connection to the dispatcher. Inbound
//! PUBLISH and REQUEST messages are delivered to the listeners registered on
//! their routing key; RESPONSE messages resolve the [`PendingCall`] whose
//! correlation id they echo.

mod error;
mod listener;
mod pending;
mod transport;

pub use error::{RpcError, TransportError};
pub use listener::{ChannelListener, Listener};
pub use pending::PendingCall;
pub use transport::{Transport, TransportConfig, WeakTransport, DEFAULT_SOURCE};
