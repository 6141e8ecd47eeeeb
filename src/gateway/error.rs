use crate::crypto;
use crate::domain::models::{CardId, ReaderId, UserId};
use crate::domain::ports::DirectoryError;
use crate::protocol::ProtocolError;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised by reader states and by the operations exposed to the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Reader not found: {0}")]
    ReaderNotFound(ReaderId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("NFC card not found: {0}")]
    CardNotFound(CardId),

    #[error("Reader not connected: {0}")]
    ReaderNotConnected(ReaderId),

    #[error("Connection is not bound to an authenticated reader")]
    ReaderNotBound,

    #[error("Connection closed before the transition completed")]
    ConnectionClosed,

    #[error("Connection has no state attached")]
    NoState,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Crypto(#[from] crypto::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl GatewayError {
    /// Lookup failures the caller of a forced operation can act upon.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GatewayError::ReaderNotFound(_)
                | GatewayError::UserNotFound(_)
                | GatewayError::CardNotFound(_)
        )
    }
}
