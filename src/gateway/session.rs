use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::connection::Command;
use super::manager::ConnectionId;
use super::timer::{Timer, TimerId};
use crate::domain::models::{Reader, ReaderId};
use crate::protocol::Message;

/// Observable summary of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub reader_id: Option<ReaderId>,
    pub state: &'static str,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            reader_id: None,
            state: "None",
        }
    }
}

/// Per-connection record handed to states.
///
/// Holds the reader bound after authentication and the outbound side of the
/// socket.
#[derive(Debug)]
pub struct ReaderSession {
    connection_id: ConnectionId,
    reader: Option<Reader>,
    outbox: mpsc::UnboundedSender<Message>,
    commands: mpsc::WeakUnboundedSender<Command>,
    status: watch::Sender<ConnectionStatus>,
    next_timer: TimerId,
    last_activity: Instant,
}

impl ReaderSession {
    pub(crate) fn new(
        connection_id: ConnectionId,
        outbox: mpsc::UnboundedSender<Message>,
        commands: mpsc::WeakUnboundedSender<Command>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        Self {
            connection_id,
            reader: None,
            outbox,
            commands,
            status,
            next_timer: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn reader(&self) -> Option<&Reader> {
        self.reader.as_ref()
    }

    pub fn reader_id(&self) -> Option<ReaderId> {
        self.reader.as_ref().map(|r| r.id)
    }

    pub fn bind_reader(&mut self, reader: Reader) {
        let reader_id = reader.id;
        self.reader = Some(reader);
        self.status.send_modify(|s| s.reader_id = Some(reader_id));
    }

    pub fn unbind_reader(&mut self) -> Option<Reader> {
        self.status.send_modify(|s| s.reader_id = None);
        self.reader.take()
    }

    /// Queues a frame for the reader. Frames for a closed socket are dropped.
    pub fn send(&self, message: Message) {
        debug!(
            connection = %self.connection_id,
            "Sending {} {}",
            message.event,
            message.kind()
        );
        if self.outbox.send(message).is_err() {
            debug!(connection = %self.connection_id, "Socket closed, dropping frame");
        }
    }

    /// Starts a timer whose expiry is delivered to the current state.
    pub fn schedule(&mut self, delay: Duration) -> Timer {
        self.next_timer += 1;
        Timer::spawn(self.next_timer, delay, self.commands.clone())
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn publish_state(&self, state: &'static str) {
        self.status.send_modify(|s| s.state = state);
    }
}
