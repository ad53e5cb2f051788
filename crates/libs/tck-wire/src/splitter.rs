use crate::{WireError, MAX_FRAME_LEN};

/// Recovers top-level JSON objects from an unframed byte stream.
///
/// A single read can carry zero, one or several concatenated objects, or end
/// in the middle of one. The splitter tracks brace depth (ignoring braces inside
/// strings) and keeps an incomplete tail buffered until a later read completes
/// it. Whitespace between objects is skipped; anything else outside an object
/// is a protocol error, reported once every object before it has been handed out.
#[derive(Debug)]
pub struct JsonSplitter {
    buffer: Vec<u8>,
    max_len: usize,
}

impl Default for JsonSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonSplitter {
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self { buffer: Vec::new(), max_len }
    }

    /// Appends `bytes` without scanning them.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete object, or `None` while the
    /// buffered tail is still incomplete.
    ///
    /// A stray byte is left in place, so every later call reports it again.
    pub fn next_object(&mut self) -> Result<Option<String>, WireError> {
        let Some(begin) = self.buffer.iter().position(|b| !b.is_ascii_whitespace()) else {
            self.buffer.clear();
            return Ok(None);
        };
        if self.buffer[begin] != b'{' {
            return Err(WireError::UnexpectedByte { byte: self.buffer[begin], offset: begin });
        }

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;
        for (offset, &byte) in self.buffer.iter().enumerate().skip(begin) {
            if in_string {
                match byte {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(offset);
                        break;
                    }
                }
                b'"' => in_string = true,
                _ => {}
            }
        }

        let Some(end) = end else {
            self.buffer.drain(..begin);
            if self.buffer.len() > self.max_len {
                return Err(WireError::JsonOverflow { len: self.buffer.len(), max: self.max_len });
            }
            return Ok(None);
        };
        let object = std::str::from_utf8(&self.buffer[begin..=end]).map(str::to_string);
        self.buffer.drain(..=end);
        object.map(Some).map_err(|_| WireError::Utf8)
    }

    /// Appends `bytes` and returns every object completed by them, in order.
    ///
    /// Objects completed before a stray byte are still returned; the stray
    /// byte fails the call only when nothing precedes it.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, WireError> {
        self.extend(bytes);
        let mut objects = Vec::new();
        loop {
            match self.next_object() {
                Ok(Some(object)) => objects.push(object),
                Ok(None) => return Ok(objects),
                Err(err) if objects.is_empty() => return Err(err),
                Err(_) => return Ok(objects),
            }
        }
    }

    /// Bytes of an object still waiting for its closing brace.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
