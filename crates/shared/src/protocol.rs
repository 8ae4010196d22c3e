use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::EventKind, error::ProtocolError};

/// Event pushed from the bridge to every open client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    value: Option<String>,
}

impl OutboundEvent {
    pub fn new(kind: EventKind, value: Option<String>) -> Self {
        Self { kind, value }
    }

    pub fn estop(payload: impl Into<String>) -> Self {
        Self::new(EventKind::EStop, Some(payload.into()))
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Command sent by a client. Serializes to the same
/// `{ "type": ..., "value": ... }` shape it is parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InboundCommand {
    FlightMode(String),
    Keypress(String),
    #[serde(rename = "keyunpress")]
    KeyUnpress(String),
}

impl InboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FlightMode(_) => "flight_mode",
            Self::Keypress(_) => "keypress",
            Self::KeyUnpress(_) => "keyunpress",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result of parsing one client frame. Every well-formed frame with an
/// unknown `type` lands in `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Command(InboundCommand),
    Unrecognized { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<Value>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage = serde_json::from_str(text)?;
        let command = match raw.kind.as_str() {
            "flight_mode" => InboundCommand::FlightMode(string_value(raw)?),
            "keypress" => InboundCommand::Keypress(string_value(raw)?),
            // Any value, or none, still clears the remote command.
            "keyunpress" => InboundCommand::KeyUnpress(released_key(raw.value)),
            _ => return Ok(Self::Unrecognized { kind: raw.kind }),
        };
        Ok(Self::Command(command))
    }
}

fn released_key(value: Option<Value>) -> String {
    match value {
        Some(Value::String(key)) => key,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn string_value(raw: RawClientMessage) -> Result<String, ProtocolError> {
    match raw.value {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ProtocolError::NonStringValue { kind: raw.kind }),
        None => Err(ProtocolError::MissingValue { kind: raw.kind }),
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
