//! Records the gateway reads and writes through its collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::MASTER_KEY_SLOT;

pub type ReaderId = u64;
pub type CardId = u64;
pub type UserId = u64;
pub type ResourceId = u64;
pub type UsageSessionId = u64;

/// A physical reader device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reader {
    pub id: ReaderId,
    pub name: String,
    #[serde(skip_serializing)]
    pub api_token_hash: String,
    pub has_access_to_resource_ids: Vec<ResourceId>,
    pub first_connection: DateTime<Utc>,
    pub last_connection: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReader {
    pub name: String,
    pub api_token_hash: String,
    pub has_access_to_resource_ids: Vec<ResourceId>,
}

/// An enrolled NTAG424 card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfcCard {
    pub id: CardId,
    pub uid: String,
    pub user_id: UserId,
    /// Current key (hex) by slot. Slot 0 is always present.
    pub keys: BTreeMap<u8, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NfcCard {
    pub fn master_key(&self) -> Option<&str> {
        self.keys.get(&MASTER_KEY_SLOT).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct NewCard {
    pub uid: String,
    pub user_id: UserId,
    pub keys: BTreeMap<u8, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
}

/// A start/stop bounded record of a user occupying a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSession {
    pub id: UsageSessionId,
    pub resource_id: ResourceId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub start_notes: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub end_notes: Option<String>,
}

impl UsageSession {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionNotes {
    pub notes: Option<String>,
}

impl SessionNotes {
    pub fn new(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
        }
    }
}
