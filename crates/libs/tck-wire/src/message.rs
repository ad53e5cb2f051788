use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message kinds carried over the dispatcher. Decided once at decode time and
/// never inferred from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Publish,
    Request,
    Response,
}

/// Delivery priority classes, lowest (`CS0`) to highest (`CS6`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Cs0,
    #[default]
    Cs1,
    Cs2,
    Cs3,
    Cs4,
    Cs5,
    Cs6,
}

/// Options for a single RPC invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    pub ttl_ms: u32,
    pub priority: Priority,
}

impl CallOptions {
    pub const DEFAULT_TTL_MS: u32 = 10_000;

    pub fn new(ttl_ms: u32) -> Self {
        Self { ttl_ms, priority: Priority::Cs4 }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL_MS)
    }
}

/// Fresh random identifier for a message.
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// An opaque payload plus the routing metadata the harness needs.
///
/// - PUBLISH: `source` is the topic, no `sink`, no `correlation_id`.
/// - REQUEST: `source` is the reply-to address, `sink` is the method,
///   `correlation_id` equals the request's own `id`.
/// - RESPONSE: `source` is the method, `sink` is the requester's reply-to
///   address, `correlation_id` echoes the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u32>,
    #[serde(default, with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    pub fn publish(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: new_message_id(),
            kind: MessageKind::Publish,
            source: topic.into(),
            sink: None,
            correlation_id: None,
            priority: Priority::Cs1,
            ttl_ms: None,
            payload: payload.into(),
        }
    }

    pub fn request(
        reply_to: impl Into<String>,
        method: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        options: &CallOptions,
    ) -> Self {
        let id = new_message_id();
        Self {
            correlation_id: Some(id.clone()),
            id,
            kind: MessageKind::Request,
            source: reply_to.into(),
            sink: Some(method.into()),
            priority: options.priority,
            ttl_ms: Some(options.ttl_ms),
            payload: payload.into(),
        }
    }

    /// Builds the RESPONSE for `request`, addressed back to its reply-to URI.
    pub fn response_to(request: &Message, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: new_message_id(),
            kind: MessageKind::Response,
            source: request.sink.clone().unwrap_or_default(),
            sink: Some(request.source.clone()),
            correlation_id: request.correlation_id.clone(),
            priority: request.priority,
            ttl_ms: request.ttl_ms,
            payload: payload.into(),
        }
    }

    /// Key used to look up listeners: `source` for PUBLISH, `sink` for REQUEST.
    /// Responses are routed by correlation id instead.
    pub fn routing_key(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Publish => Some(self.source.as_str()),
            MessageKind::Request => self.sink.as_deref(),
            MessageKind::Response => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_correlates_with_its_own_id() {
        let options = CallOptions::new(500);
        let request =
            Message::request("rpc:/client/reply", "rpc:/door/open", b"x".to_vec(), &options);
        assert_eq!(request.kind, MessageKind::Request);
        assert_eq!(request.correlation_id.as_deref(), Some(request.id.as_str()));
        assert_eq!(request.ttl_ms, Some(500));
        assert_eq!(request.priority, Priority::Cs4);
        assert_eq!(request.routing_key(), Some("rpc:/door/open"));
    }

    #[test]
    fn response_swaps_addresses_and_echoes_correlation() {
        let options = CallOptions::default();
        let request = Message::request("rpc:/client/reply", "rpc:/door/open", Vec::new(), &options);
        let response = Message::response_to(&request, b"done".to_vec());
        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.source, "rpc:/door/open");
        assert_eq!(response.sink.as_deref(), Some("rpc:/client/reply"));
        assert_eq!(response.correlation_id, request.correlation_id);
        assert_ne!(response.id, request.id);
        assert_eq!(response.routing_key(), None);
    }

    #[test]
    fn publish_has_no_correlation() {
        let message = Message::publish("topic:door", b"open".to_vec());
        assert_eq!(message.correlation_id, None);
        assert_eq!(message.sink, None);
        assert_eq!(message.routing_key(), Some("topic:door"));
    }
}
