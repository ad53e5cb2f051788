//! Wire formats shared by every component of the socket interoperability harness.
//!
//! Two encodings live here:
//!
//! - **Dispatcher frames**: a 4-byte big-endian length prefix followed by the
//!   MessagePack encoding of a [`Message`]. Used between transports and the
//!   dispatcher.
//! - **Envelopes**: UTF-8 JSON objects `{"action": ..., "message": base64}` used
//!   between test agents and the test manager. Objects are not length-prefixed,
//!   so [`JsonSplitter`] recovers object boundaries from the byte stream.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod message;
pub mod splitter;
pub mod status;
pub mod topic;

pub use codec::{
    decode_frame, decode_message, decode_status, encode_frame, encode_message, encode_status,
    FrameDecoder, LEN_PREFIX, MAX_FRAME_LEN, READ_CHUNK,
};
pub use envelope::{
    action, handshake_bytes, normalize_sdk_name, AgentFrame, Command, CommandFrame, Envelope,
    SDK_NAME_KEY,
};
pub use error::WireError;
pub use message::{new_message_id, CallOptions, Message, MessageKind, Priority};
pub use splitter::JsonSplitter;
pub use status::{Code, Status};
pub use topic::{validate_topic, MAX_TOPIC_LEN};
