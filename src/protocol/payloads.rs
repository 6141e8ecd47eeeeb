use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::models::ReaderId;

/// Empty object payload (`{}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Reply to `REGISTER`. The token is never sent again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderCredentials {
    pub id: ReaderId,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderAuthenticated {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfcTap {
    #[serde(rename = "cardUID")]
    pub card_uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPressed {
    pub key: String,
}

/// Instructs the reader to replace key slots of the tapped card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeKeys {
    /// Current master key (hex) used to authenticate before the change.
    pub authentication_key: String,
    /// New keys (hex) by slot number.
    pub keys: BTreeMap<u8, String>,
}

/// Outcome of a `CHANGE_KEYS` command as reported by the reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysChanged {
    #[serde(default)]
    pub successful_keys: Vec<u8>,
    #[serde(default)]
    pub failed_keys: Vec<u8>,
}

impl KeysChanged {
    /// Exactly one slot changed and none failed.
    pub fn is_single_success(&self) -> bool {
        self.successful_keys.len() == 1 && self.failed_keys.is_empty()
    }
}

/// Instructs the reader to authenticate the tapped card with a key slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateCard {
    pub authentication_key: String,
    pub key_number: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAuthenticated {
    #[serde(default)]
    pub authentication_successful: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardChecking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CardChecking {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// Payload of `DISPLAY_SUCCESS` and `DISPLAY_ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    pub message: String,
    /// Milliseconds the message stays on screen.
    pub duration: u64,
}

impl DisplayMessage {
    pub fn new(message: impl Into<String>, duration: u64) -> Self {
        Self {
            message: message.into(),
            duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowText {
    pub line_one: String,
    pub line_two: String,
}

impl ShowText {
    pub fn new(line_one: impl Into<String>, line_two: impl Into<String>) -> Self {
        Self {
            line_one: line_one.into(),
            line_two: line_two.into(),
        }
    }
}
