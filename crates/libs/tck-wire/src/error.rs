use crate::codec::LEN_PREFIX;

/// Errors from frame, envelope and topic handling.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame shorter than the {LEN_PREFIX}-byte length prefix: {0} bytes")]
    MissingHeader(usize),

    #[error("incomplete frame: expected {expected} payload bytes, have {actual}")]
    Incomplete { expected: usize, actual: usize },

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("json object is not valid utf-8")]
    Utf8,

    #[error("unexpected byte 0x{byte:02x} outside a json object at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    #[error("json stream buffered {len} bytes without completing an object (limit {max})")]
    JsonOverflow { len: usize, max: usize },

    #[error("envelope is not a json object")]
    NotAnObject,

    #[error("envelope is missing field {0:?}")]
    MissingField(&'static str),

    #[error("handshake carries an empty SDK_name")]
    EmptySdkName,

    #[error("unknown action {0:?}")]
    UnknownAction(String),

    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: &'static str },
}
