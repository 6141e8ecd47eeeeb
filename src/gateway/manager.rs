use std::sync::Arc;

use dashmap::DashMap;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{Command, Connection};
use super::error::{GatewayError, GatewayResult};
use super::machine::ReaderState;
use super::services::GatewayServices;
use super::session::{ConnectionStatus, ReaderSession};
use super::states::{EnrollNtag424State, InitialState, ResetNtag424State};
use crate::domain::models::{CardId, ReaderId, UserId};
use crate::protocol::Message;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone)]
pub(crate) struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    fn reader_id(&self) -> Option<ReaderId> {
        self.status.borrow().reader_id
    }

    /// Hands a state to the connection task and waits until it has been entered.
    async fn force(&self, state: Box<dyn ReaderState>) -> GatewayResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Force { state, reply })
            .map_err(|_| GatewayError::ConnectionClosed)?;
        outcome.await.map_err(|_| GatewayError::ConnectionClosed)?
    }
}

/// Feeds frames received on a socket into its connection task.
#[derive(Debug, Clone)]
pub struct FrameSender {
    commands: mpsc::UnboundedSender<Command>,
}

impl FrameSender {
    /// Returns `false` once the connection task has ended.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.commands.send(Command::Frame(frame.into())).is_ok()
    }

    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// The transport-facing ends of a newly opened connection.
///
/// `outbound` yields the frames to write to the socket and ends when the
/// connection has been closed by the gateway.
#[derive(Debug)]
pub struct ReaderLink {
    pub id: ConnectionId,
    pub frames: FrameSender,
    pub outbound: mpsc::UnboundedReceiver<Message>,
    pub task: JoinHandle<()>,
}

/// Registry of live reader connections.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    services: GatewayServices,
    connections: Arc<DashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionManager {
    pub fn new(services: GatewayServices) -> Self {
        Self {
            services,
            connections: Arc::new(DashMap::new()),
        }
    }

    pub fn services(&self) -> &GatewayServices {
        &self.services
    }

    /// Registers a new connection and starts its task in the initial state.
    pub fn open(&self) -> ReaderLink {
        let id = Uuid::new_v4();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outbox, outbound) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        self.connections.insert(
            id,
            ConnectionHandle {
                commands: commands_tx.clone(),
                status: status_rx,
            },
        );

        let session = ReaderSession::new(id, outbox, commands_tx.downgrade(), status_tx);
        let connection = Connection::new(
            session,
            self.services.clone(),
            commands_rx,
            self.connections.clone(),
        );
        let task = tokio::spawn(connection.run());

        debug!(connection = %id, "Opened connection");
        ReaderLink {
            id,
            frames: FrameSender {
                commands: commands_tx,
            },
            outbound,
            task,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn status(&self, id: ConnectionId) -> Option<ConnectionStatus> {
        self.connections
            .get(&id)
            .map(|handle| handle.status.borrow().clone())
    }

    /// Connections currently bound to `reader_id`.
    fn connections_of(&self, reader_id: ReaderId) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .filter(|entry| entry.reader_id() == Some(reader_id))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn connection_of(&self, reader_id: ReaderId) -> GatewayResult<ConnectionHandle> {
        self.connections_of(reader_id)
            .into_iter()
            .next()
            .ok_or(GatewayError::ReaderNotConnected(reader_id))
    }

    async fn ensure_reader(&self, reader_id: ReaderId) -> GatewayResult<()> {
        self.services
            .readers
            .find_by_id(reader_id)
            .await?
            .ok_or(GatewayError::ReaderNotFound(reader_id))?;
        Ok(())
    }

    async fn ensure_user(&self, user_id: UserId) -> GatewayResult<()> {
        self.services
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(GatewayError::UserNotFound(user_id))?;
        Ok(())
    }

    /// Puts the reader into enrollment for a card of `user_id`.
    pub async fn start_enrollment(&self, reader_id: ReaderId, user_id: UserId) -> GatewayResult<()> {
        self.ensure_reader(reader_id).await?;
        self.ensure_user(user_id).await?;
        let connection = self.connection_of(reader_id)?;

        info!(reader = reader_id, user = user_id, "Starting NFC card enrollment");
        connection
            .force(Box::new(EnrollNtag424State::new(user_id)))
            .await
    }

    /// Puts the reader into reset mode for `card_id`.
    pub async fn start_reset(
        &self,
        reader_id: ReaderId,
        user_id: UserId,
        card_id: CardId,
    ) -> GatewayResult<()> {
        self.ensure_reader(reader_id).await?;
        self.ensure_user(user_id).await?;
        let card = self
            .services
            .cards
            .find_by_id(card_id)
            .await?
            .ok_or(GatewayError::CardNotFound(card_id))?;
        if card.user_id != user_id {
            warn!(
                card = card_id,
                user = user_id,
                owner = card.user_id,
                "Resetting a card owned by another user"
            );
        }
        let connection = self.connection_of(reader_id)?;

        info!(reader = reader_id, card = card_id, "Starting NFC card reset");
        connection
            .force(Box::new(ResetNtag424State::new(card_id)))
            .await
    }

    /// Drops the authentication of every connection of the reader and asks it
    /// to authenticate again.
    pub async fn restart_reader(&self, reader_id: ReaderId) -> GatewayResult<()> {
        self.ensure_reader(reader_id).await?;
        let connections = self.connections_of(reader_id);
        if connections.is_empty() {
            return Err(GatewayError::ReaderNotConnected(reader_id));
        }

        info!(reader = reader_id, "Restarting reader");
        let mut restarted = 0;
        let mut last_error = None;
        for connection in connections {
            match connection
                .force(Box::new(InitialState::reauthenticate()))
                .await
            {
                Ok(()) => restarted += 1,
                Err(e) => {
                    warn!(reader = reader_id, "Failed to restart connection: {e}");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if restarted == 0 => Err(e),
            _ => Ok(()),
        }
    }
}
