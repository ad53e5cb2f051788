use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::{decode_message, decode_status, encode_message, encode_status};
use crate::{Message, Status, WireError};

/// Envelope `action` values.
pub mod action {
    pub const SEND: &str = "send";
    pub const REGISTER_LISTENER: &str = "registerlistener";
    pub const UNREGISTER_LISTENER: &str = "unregisterlistener";
    pub const INVOKE_METHOD: &str = "invokemethod";
    pub const STATUS: &str = "uStatus";
    pub const ON_RECEIVE: &str = "onReceive";
    pub const INITIALIZE: &str = "initialize";
}

/// Key carrying the SDK name in a test agent's first frame.
pub const SDK_NAME_KEY: &str = "SDK_name";

/// SDK names are matched case-insensitively and without surrounding whitespace.
pub fn normalize_sdk_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Commands the test manager issues to a test agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Send,
    RegisterListener,
    UnregisterListener,
    InvokeMethod,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Send,
        Command::RegisterListener,
        Command::UnregisterListener,
        Command::InvokeMethod,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Send => action::SEND,
            Command::RegisterListener => action::REGISTER_LISTENER,
            Command::UnregisterListener => action::UNREGISTER_LISTENER,
            Command::InvokeMethod => action::INVOKE_METHOD,
        }
    }

    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.as_str().eq_ignore_ascii_case(action))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{"action": ..., "message": base64}` as written on the test manager socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    pub message: String,
}

impl Envelope {
    pub fn wrap(action: impl Into<String>, bytes: &[u8]) -> Self {
        Self { action: action.into(), message: STANDARD.encode(bytes) }
    }

    pub fn command(command: Command, message: &Message) -> Result<Self, WireError> {
        Ok(Self::wrap(command.as_str(), &encode_message(message)?))
    }

    pub fn status(status: &Status) -> Result<Self, WireError> {
        Ok(Self::wrap(action::STATUS, &encode_status(status)?))
    }

    pub fn on_receive(message: &Message) -> Result<Self, WireError> {
        Ok(Self::wrap(action::ON_RECEIVE, &encode_message(message)?))
    }

    /// The opaque bytes carried in `message`.
    pub fn payload(&self) -> Result<Vec<u8>, WireError> {
        Ok(STANDARD.decode(self.message.as_bytes())?)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(object: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(object)?)
    }
}

/// The handshake a test agent sends as its very first frame.
pub fn handshake_bytes(sdk_name: &str) -> Result<Vec<u8>, WireError> {
    let mut fields = Map::new();
    fields.insert(SDK_NAME_KEY.to_string(), Value::String(sdk_name.to_string()));
    Ok(serde_json::to_vec(&Value::Object(fields))?)
}

/// A frame received by the test manager from a test agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentFrame {
    Handshake { sdk_name: String },
    Status(Status),
    OnReceive(Message),
}

impl AgentFrame {
    /// Classifies one JSON object.
    ///
    /// Handshakes are accepted as `{"SDK_name": ..}`, as
    /// `{"action": "initialize", "SDK_name": ..}` and with the name nested under
    /// `data`. Actions are matched case-insensitively since agents in the wild
    /// emit both `onReceive` and `onreceive`.
    pub fn parse(object: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(object)?;
        let fields = value.as_object().ok_or(WireError::NotAnObject)?;
        let action_name = fields.get("action").and_then(Value::as_str);

        let is_handshake = fields.contains_key(SDK_NAME_KEY)
            || action_name.is_some_and(|name| name.eq_ignore_ascii_case(action::INITIALIZE));
        if is_handshake {
            let name = fields
                .get(SDK_NAME_KEY)
                .or_else(|| fields.get("data").and_then(|data| data.get(SDK_NAME_KEY)))
                .and_then(Value::as_str)
                .ok_or(WireError::MissingField(SDK_NAME_KEY))?;
            let sdk_name = normalize_sdk_name(name);
            if sdk_name.is_empty() {
                return Err(WireError::EmptySdkName);
            }
            return Ok(Self::Handshake { sdk_name });
        }

        let action_name = action_name.ok_or(WireError::MissingField("action"))?;
        let envelope = Envelope {
            action: action_name.to_string(),
            message: fields
                .get("message")
                .and_then(Value::as_str)
                .ok_or(WireError::MissingField("message"))?
                .to_string(),
        };
        if action_name.eq_ignore_ascii_case(action::STATUS) {
            Ok(Self::Status(decode_status(&envelope.payload()?)?))
        } else if action_name.eq_ignore_ascii_case(action::ON_RECEIVE) {
            Ok(Self::OnReceive(decode_message(&envelope.payload()?)?))
        } else {
            Err(WireError::UnknownAction(envelope.action))
        }
    }
}

/// A command received by a test agent from the test manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub command: Command,
    pub message: Message,
}

impl CommandFrame {
    pub fn parse(object: &str) -> Result<Self, WireError> {
        let envelope = Envelope::from_json(object)?;
        let command = Command::from_action(&envelope.action)
            .ok_or_else(|| WireError::UnknownAction(envelope.action.clone()))?;
        let message = decode_message(&envelope.payload()?)?;
        Ok(Self { command, message })
    }

    pub fn to_envelope(&self) -> Result<Envelope, WireError> {
        Envelope::command(self.command, &self.message)
    }
}
