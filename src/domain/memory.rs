use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};

use super::models::{
    CardId, NewCard, NewReader, NfcCard, Reader, ReaderId, Resource, ResourceId, SessionNotes,
    UsageSession, UsageSessionId, User, UserId,
};
use super::ports::{
    CardDirectory, DirectoryError, DirectoryResult, ReaderDirectory, ResourceDirectory,
    UsageService, UserDirectory,
};
use crate::crypto::MASTER_KEY_SLOT;

/// An in-memory implementation of every collaborator.
///
/// Useful for testing and development. Cloning shares the underlying maps.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: AtomicU64,
    readers: DashMap<ReaderId, Reader>,
    cards: DashMap<CardId, NfcCard>,
    card_uids: DashMap<String, CardId>,
    users: DashMap<UserId, User>,
    resources: DashMap<ResourceId, Resource>,
    sessions: DashMap<UsageSessionId, UsageSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_user(&self, username: impl Into<String>) -> User {
        let user = User {
            id: self.next_id(),
            username: username.into(),
        };
        self.inner.users.insert(user.id, user.clone());
        user
    }

    pub fn add_resource(&self, name: impl Into<String>) -> Resource {
        let resource = Resource {
            id: self.next_id(),
            name: name.into(),
        };
        self.inner.resources.insert(resource.id, resource.clone());
        resource
    }

    /// Grants a reader access to the given resources, replacing previous grants.
    pub fn set_reader_resources(
        &self,
        reader_id: ReaderId,
        resource_ids: Vec<ResourceId>,
    ) -> DirectoryResult<()> {
        let mut reader = self
            .inner
            .readers
            .get_mut(&reader_id)
            .ok_or(DirectoryError::NotFound {
                entity: "Reader",
                id: reader_id,
            })?;
        reader.has_access_to_resource_ids = resource_ids;
        Ok(())
    }

    pub fn cards(&self) -> Vec<NfcCard> {
        self.inner.cards.iter().map(|c| c.value().clone()).collect()
    }

    pub fn sessions(&self, resource_id: ResourceId) -> Vec<UsageSession> {
        let mut sessions: Vec<_> = self
            .inner
            .sessions
            .iter()
            .filter(|s| s.resource_id == resource_id)
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    fn active_session_id(&self, resource_id: ResourceId) -> Option<UsageSessionId> {
        self.inner
            .sessions
            .iter()
            .find(|s| s.resource_id == resource_id && s.is_active())
            .map(|s| s.id)
    }
}

#[async_trait]
impl ReaderDirectory for MemoryStore {
    async fn find_by_id(&self, id: ReaderId) -> DirectoryResult<Option<Reader>> {
        Ok(self.inner.readers.get(&id).map(|r| r.value().clone()))
    }

    async fn create(&self, reader: NewReader) -> DirectoryResult<Reader> {
        let now = Utc::now();
        let reader = Reader {
            id: self.next_id(),
            name: reader.name,
            api_token_hash: reader.api_token_hash,
            has_access_to_resource_ids: reader.has_access_to_resource_ids,
            first_connection: now,
            last_connection: now,
        };
        self.inner.readers.insert(reader.id, reader.clone());
        Ok(reader)
    }

    async fn update_last_connection(&self, id: ReaderId) -> DirectoryResult<()> {
        let mut reader = self
            .inner
            .readers
            .get_mut(&id)
            .ok_or(DirectoryError::NotFound { entity: "Reader", id })?;
        reader.last_connection = Utc::now();
        Ok(())
    }

    async fn list_all(&self) -> DirectoryResult<Vec<Reader>> {
        let mut readers: Vec<_> = self.inner.readers.iter().map(|r| r.value().clone()).collect();
        readers.sort_by_key(|r| r.id);
        Ok(readers)
    }
}

fn require_master_key(uid: &str, keys: &BTreeMap<u8, String>) -> DirectoryResult<()> {
    if keys.contains_key(&MASTER_KEY_SLOT) {
        return Ok(());
    }
    Err(DirectoryError::Conflict(format!(
        "card with UID {uid} has no key in slot {MASTER_KEY_SLOT}"
    )))
}

#[async_trait]
impl CardDirectory for MemoryStore {
    async fn find_by_uid(&self, uid: &str) -> DirectoryResult<Option<NfcCard>> {
        let Some(id) = self.inner.card_uids.get(uid).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.inner.cards.get(&id).map(|c| c.value().clone()))
    }

    async fn find_by_id(&self, id: CardId) -> DirectoryResult<Option<NfcCard>> {
        Ok(self.inner.cards.get(&id).map(|c| c.value().clone()))
    }

    async fn create(&self, card: NewCard) -> DirectoryResult<NfcCard> {
        require_master_key(&card.uid, &card.keys)?;
        let id = match self.inner.card_uids.entry(card.uid.clone()) {
            Entry::Occupied(_) => {
                return Err(DirectoryError::Conflict(format!(
                    "card with UID {} already exists",
                    card.uid
                )));
            }
            Entry::Vacant(slot) => *slot.insert(self.next_id()),
        };

        let now = Utc::now();
        let card = NfcCard {
            id,
            uid: card.uid,
            user_id: card.user_id,
            keys: card.keys,
            created_at: now,
            updated_at: now,
        };
        self.inner.cards.insert(id, card.clone());
        Ok(card)
    }

    async fn update(&self, card: NfcCard) -> DirectoryResult<NfcCard> {
        require_master_key(&card.uid, &card.keys)?;
        let mut stored = self
            .inner
            .cards
            .get_mut(&card.id)
            .ok_or(DirectoryError::NotFound {
                entity: "NFC card",
                id: card.id,
            })?;
        stored.user_id = card.user_id;
        stored.keys = card.keys;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete(&self, id: CardId) -> DirectoryResult<()> {
        if let Some((_, card)) = self.inner.cards.remove(&id) {
            self.inner.card_uids.remove(&card.uid);
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> DirectoryResult<Option<User>> {
        Ok(self.inner.users.get(&id).map(|u| u.value().clone()))
    }
}

#[async_trait]
impl ResourceDirectory for MemoryStore {
    async fn find_many_by_id(&self, ids: &[ResourceId]) -> DirectoryResult<Vec<Resource>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.inner.resources.get(id).map(|r| r.value().clone()))
            .collect())
    }
}

#[async_trait]
impl UsageService for MemoryStore {
    async fn get_active_session(
        &self,
        resource_id: ResourceId,
        user_id: Option<UserId>,
    ) -> DirectoryResult<Option<UsageSession>> {
        Ok(self
            .inner
            .sessions
            .iter()
            .find(|s| {
                s.resource_id == resource_id
                    && s.is_active()
                    && user_id.is_none_or(|user_id| s.user_id == user_id)
            })
            .map(|s| s.value().clone()))
    }

    async fn start_session(
        &self,
        resource_id: ResourceId,
        user_id: UserId,
        notes: SessionNotes,
    ) -> DirectoryResult<UsageSession> {
        if self.active_session_id(resource_id).is_some() {
            return Err(DirectoryError::Conflict(format!(
                "resource {resource_id} is already in use"
            )));
        }

        let session = UsageSession {
            id: self.next_id(),
            resource_id,
            user_id,
            start_time: Utc::now(),
            start_notes: notes.notes,
            end_time: None,
            end_notes: None,
        };
        self.inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    /// Ends the open session on `resource_id`, whoever started it.
    async fn end_session(
        &self,
        resource_id: ResourceId,
        _user_id: UserId,
        notes: SessionNotes,
    ) -> DirectoryResult<UsageSession> {
        let id = self
            .active_session_id(resource_id)
            .ok_or(DirectoryError::NotFound {
                entity: "Active usage session of resource",
                id: resource_id,
            })?;

        let mut session = self
            .inner
            .sessions
            .get_mut(&id)
            .ok_or(DirectoryError::NotFound {
                entity: "Usage session",
                id,
            })?;
        session.end_time = Some(Utc::now());
        session.end_notes = notes.notes;
        Ok(session.clone())
    }
}
