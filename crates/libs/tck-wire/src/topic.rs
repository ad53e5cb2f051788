use crate::WireError;

/// Longest accepted topic key, in bytes.
pub const MAX_TOPIC_LEN: usize = 1024;

/// Checks that `topic` is usable as a routing key.
///
/// A topic is an opaque string such as `topic:door` or `/door/1/front`. It must
/// be non-empty, free of whitespace and control characters, and contain a `:`
/// or `/` separator.
pub fn validate_topic(topic: &str) -> Result<(), WireError> {
    let invalid = |reason| Err(WireError::InvalidTopic { topic: topic.to_string(), reason });

    if topic.is_empty() {
        return invalid("empty");
    }
    if topic.len() > MAX_TOPIC_LEN {
        return invalid("longer than 1024 bytes");
    }
    if topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return invalid("contains whitespace or control characters");
    }
    if !topic.contains(|c| c == ':' || c == '/') {
        return invalid("missing scheme or path separator");
    }
    Ok(())
}
