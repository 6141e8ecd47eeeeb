//! Wire format spoken with the readers.
//!
//! Every frame is a JSON object `{ "event": "EVENT" | "RESPONSE", "data": { "type", "payload" } }`.
//! Readers additionally send `{ "event": "HEARTBEAT" }` to keep the connection alive.

mod payloads;

pub use payloads::*;

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Errors raised while decoding frames and payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{0} frame without data")]
    MissingData(FrameKind),

    #[error("Invalid {kind} payload: {source}")]
    Payload {
        kind: EventType,
        source: serde_json::Error,
    },
}

/// Outer `event` discriminator of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    Event,
    Response,
    Heartbeat,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Event => "EVENT",
            FrameKind::Response => "RESPONSE",
            FrameKind::Heartbeat => "HEARTBEAT",
        };
        write!(f, "{name}")
    }
}

/// Message types understood by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Register,
    Authenticate,
    Unauthorized,
    ReaderAuthenticated,
    Reauthenticate,
    NfcTap,
    ChangeKeys,
    EnableCardChecking,
    DisableCardChecking,
    DisplaySuccess,
    DisplayError,
    ShowText,
    HideText,
    KeyPressed,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Register => "REGISTER",
            EventType::Authenticate => "AUTHENTICATE",
            EventType::Unauthorized => "UNAUTHORIZED",
            EventType::ReaderAuthenticated => "READER_AUTHENTICATED",
            EventType::Reauthenticate => "REAUTHENTICATE",
            EventType::NfcTap => "NFC_TAP",
            EventType::ChangeKeys => "CHANGE_KEYS",
            EventType::EnableCardChecking => "ENABLE_CARD_CHECKING",
            EventType::DisableCardChecking => "DISABLE_CARD_CHECKING",
            EventType::DisplaySuccess => "DISPLAY_SUCCESS",
            EventType::DisplayError => "DISPLAY_ERROR",
            EventType::ShowText => "SHOW_TEXT",
            EventType::HideText => "HIDE_TEXT",
            EventType::KeyPressed => "KEY_PRESSED",
        };
        write!(f, "{name}")
    }
}

/// The `data` member of an event or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl MessageData {
    pub fn new(kind: EventType, payload: impl Serialize) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize {kind} payload: {e}");
            Value::Null
        });
        Self { kind, payload }
    }

    /// Decodes the payload into its typed representation.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.payload).map_err(|source| ProtocolError::Payload {
            kind: self.kind,
            source,
        })
    }
}

/// A complete frame as sent to a reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub event: FrameKind,
    pub data: MessageData,
}

impl Message {
    pub fn event(kind: EventType, payload: impl Serialize) -> Self {
        Self {
            event: FrameKind::Event,
            data: MessageData::new(kind, payload),
        }
    }

    /// An event without payload.
    pub fn bare_event(kind: EventType) -> Self {
        Self {
            event: FrameKind::Event,
            data: MessageData {
                kind,
                payload: Value::Null,
            },
        }
    }

    pub fn response(kind: EventType, payload: impl Serialize) -> Self {
        Self {
            event: FrameKind::Response,
            data: MessageData::new(kind, payload),
        }
    }

    pub fn kind(&self) -> EventType {
        self.data.kind
    }
}

/// A decoded frame received from a reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(MessageData),
    Response(MessageData),
    Heartbeat,
}

#[derive(Deserialize)]
struct RawFrame {
    event: FrameKind,
    #[serde(default)]
    data: Option<Value>,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_str(text)?;

        if raw.event == FrameKind::Heartbeat {
            return Ok(Inbound::Heartbeat);
        }

        let data = match raw.data {
            Some(Value::Null) | None => return Err(ProtocolError::MissingData(raw.event)),
            Some(data) => MessageData::deserialize(data)?,
        };

        Ok(match raw.event {
            FrameKind::Response => Inbound::Response(data),
            _ => Inbound::Event(data),
        })
    }
}
