use tck_wire::{Code, Status, WireError};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    pub fn status(&self) -> Status {
        match self {
            Self::Io(err) => Status::fail(Code::Unavailable, err.to_string()),
            Self::Wire(err) => Status::fail(Code::InvalidArgument, err.to_string()),
            Self::InvalidArgument(reason) => Status::fail(Code::InvalidArgument, reason.clone()),
            Self::Closed => Status::fail(Code::Unavailable, "transport is closed"),
        }
    }
}

/// Failure of an outstanding RPC call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("no response for {correlation_id} within {ttl_ms} ms")]
    Timeout { correlation_id: String, ttl_ms: u32 },
    #[error("transport closed before a response for {correlation_id} arrived")]
    Closed { correlation_id: String },
}

impl RpcError {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Timeout { correlation_id, .. } | Self::Closed { correlation_id } => {
                correlation_id
            }
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Timeout { .. } => Status::fail(Code::DeadlineExceeded, self.to_string()),
            Self::Closed { .. } => Status::fail(Code::Unavailable, self.to_string()),
        }
    }
}
