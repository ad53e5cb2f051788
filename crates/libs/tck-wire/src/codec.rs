use rmp_serde::{from_slice, Serializer};
use serde::Serialize;

use crate::{Message, Status, WireError};

/// Size of the big-endian length prefix in front of every dispatcher frame.
pub const LEN_PREFIX: usize = 4;

/// Largest frame payload accepted on the dispatcher path.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Size of a single socket read. Frames are reassembled across reads, so this
/// only bounds how much is pulled per syscall.
pub const READ_CHUNK: usize = 32767;

pub fn encode_message(message: &Message) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, WireError> {
    Ok(from_slice(bytes)?)
}

pub fn encode_status(status: &Status) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(status)?)
}

pub fn decode_status(bytes: &[u8]) -> Result<Status, WireError> {
    Ok(from_slice(bytes)?)
}

/// Encodes `message` as a length-prefixed dispatcher frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, WireError> {
    // Serialize straight into the output frame behind a reserved prefix.
    let mut framed = Vec::with_capacity(256 + message.payload.len());
    framed.extend_from_slice(&[0u8; LEN_PREFIX]);
    message.serialize(&mut Serializer::new(&mut framed).with_struct_map())?;
    let payload_len = framed.len() - LEN_PREFIX;
    if payload_len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge { len: payload_len, max: MAX_FRAME_LEN });
    }
    let len = u32::try_from(payload_len)
        .map_err(|_| WireError::FrameTooLarge { len: payload_len, max: MAX_FRAME_LEN })?;
    framed[..LEN_PREFIX].copy_from_slice(&len.to_be_bytes());
    Ok(framed)
}

/// Decodes one complete frame (prefix included) into a [`Message`].
pub fn decode_frame(bytes: &[u8]) -> Result<Message, WireError> {
    if bytes.len() < LEN_PREFIX {
        return Err(WireError::MissingHeader(bytes.len()));
    }
    let len = read_len(bytes);
    let available = bytes.len() - LEN_PREFIX;
    if available < len {
        return Err(WireError::Incomplete { expected: len, actual: available });
    }
    decode_message(&bytes[LEN_PREFIX..LEN_PREFIX + len])
}

fn read_len(bytes: &[u8]) -> usize {
    let mut len_buf = [0u8; LEN_PREFIX];
    len_buf.copy_from_slice(&bytes[..LEN_PREFIX]);
    u32::from_be_bytes(len_buf) as usize
}

/// Reassembles length-prefixed frames from a byte stream.
///
/// TCP may split one frame across reads or merge several frames into one read;
/// callers feed every read into [`FrameDecoder::extend`] and drain complete
/// frames with [`FrameDecoder::next_frame`]. Only the prefix is inspected.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { buffer: Vec::with_capacity(READ_CHUNK), max_frame_len }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, prefix included, or `None` if more
    /// bytes are needed. An oversized length prefix is unrecoverable.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if self.buffer.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = read_len(&self.buffer);
        if len > self.max_frame_len {
            return Err(WireError::FrameTooLarge { len, max: self.max_frame_len });
        }
        if self.buffer.len() < LEN_PREFIX + len {
            return Ok(None);
        }
        Ok(Some(self.buffer.drain(..LEN_PREFIX + len).collect()))
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
