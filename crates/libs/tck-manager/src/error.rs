use std::time::Duration;

use tck_wire::WireError;

/// Errors surfaced to the test driver.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no agent connected for sdk `{0}`")]
    UnknownSdk(String),
    #[error("sdk `{sdk}` did not answer within {waited:?}")]
    Timeout { sdk: String, waited: Duration },
    #[error("sdk `{0}` disconnected")]
    Disconnected(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl ManagerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Reasons an agent connection is closed by the manager.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("first frame is not an SDK_name handshake")]
    NotHandshake,
    #[error("handshake repeated by sdk `{0}`")]
    DuplicateHandshake(String),
    #[error("sdk `{0}` is already connected")]
    NameTaken(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}
