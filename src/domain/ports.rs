//! Ports (interfaces) to the persistence collaborators.
//! The gateway never touches storage directly; everything goes through these traits.

use async_trait::async_trait;

use super::models::{
    CardId, NewCard, NewReader, NfcCard, Reader, ReaderId, Resource, ResourceId, SessionNotes,
    UsageSession, User, UserId,
};

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors reported by the collaborators
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("Conflicting record: {0}")]
    Conflict(String),

    #[error("Directory backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ReaderDirectory: Send + Sync {
    async fn find_by_id(&self, id: ReaderId) -> DirectoryResult<Option<Reader>>;

    async fn create(&self, reader: NewReader) -> DirectoryResult<Reader>;

    /// Records that the reader was active just now.
    async fn update_last_connection(&self, id: ReaderId) -> DirectoryResult<()>;

    async fn list_all(&self) -> DirectoryResult<Vec<Reader>>;
}

#[async_trait]
pub trait CardDirectory: Send + Sync {
    async fn find_by_uid(&self, uid: &str) -> DirectoryResult<Option<NfcCard>>;

    async fn find_by_id(&self, id: CardId) -> DirectoryResult<Option<NfcCard>>;

    /// Stores a new card. Fails with [`DirectoryError::Conflict`] if the UID is taken
    /// or no master key (slot 0) is given.
    async fn create(&self, card: NewCard) -> DirectoryResult<NfcCard>;

    /// Replaces owner and keys of an existing card. The keys must keep slot 0.
    async fn update(&self, card: NfcCard) -> DirectoryResult<NfcCard>;

    async fn delete(&self, id: CardId) -> DirectoryResult<()>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> DirectoryResult<Option<User>>;
}

#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Returns the resources that exist among `ids`, silently skipping unknown ids.
    async fn find_many_by_id(&self, ids: &[ResourceId]) -> DirectoryResult<Vec<Resource>>;
}

#[async_trait]
pub trait UsageService: Send + Sync {
    /// The open session on `resource_id`, optionally restricted to one user.
    async fn get_active_session(
        &self,
        resource_id: ResourceId,
        user_id: Option<UserId>,
    ) -> DirectoryResult<Option<UsageSession>>;

    async fn start_session(
        &self,
        resource_id: ResourceId,
        user_id: UserId,
        notes: SessionNotes,
    ) -> DirectoryResult<UsageSession>;

    async fn end_session(
        &self,
        resource_id: ResourceId,
        user_id: UserId,
        notes: SessionNotes,
    ) -> DirectoryResult<UsageSession>;
}
