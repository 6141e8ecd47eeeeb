use std::sync::Arc;

use dashmap::DashMap;
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, sleep},
};
use tracing::{debug, error, info, warn};

use super::error::GatewayResult;
use super::machine::{ReaderState, StateContext, StateMachine};
use super::manager::{ConnectionHandle, ConnectionId};
use super::services::GatewayServices;
use super::session::ReaderSession;
use super::states::InitialState;
use super::timer::TimerId;
use crate::protocol::Inbound;

/// Work items processed by a connection task, strictly in arrival order.
pub(crate) enum Command {
    /// A text frame received from the reader.
    Frame(String),
    /// Replace the current state and report the outcome of entering the new one.
    Force {
        state: Box<dyn ReaderState>,
        reply: oneshot::Sender<GatewayResult<()>>,
    },
    Timer(TimerId),
    /// The socket was closed by the peer.
    Close,
}

/// Task owning the state machine of one reader socket.
pub(crate) struct Connection {
    id: ConnectionId,
    session: ReaderSession,
    machine: StateMachine,
    services: GatewayServices,
    commands: mpsc::UnboundedReceiver<Command>,
    directory: Arc<DashMap<ConnectionId, ConnectionHandle>>,
}

impl Connection {
    pub(crate) fn new(
        session: ReaderSession,
        services: GatewayServices,
        commands: mpsc::UnboundedReceiver<Command>,
        directory: Arc<DashMap<ConnectionId, ConnectionHandle>>,
    ) -> Self {
        Self {
            id: session.connection_id(),
            session,
            machine: StateMachine::new(),
            services,
            commands,
            directory,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(connection = %self.id, "Reader connected");

        let heartbeat = self.services.config.heartbeat_timeout();
        let deadline = sleep(heartbeat);
        tokio::pin!(deadline);

        let mut ctx = StateContext::new(&mut self.session, &self.services);
        if let Err(e) = self
            .machine
            .transition_to(&mut ctx, Box::new(InitialState::new()))
            .await
        {
            error!(connection = %self.id, "Failed to initialize connection: {e}");
        }

        while self.machine.is_bound() {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        Command::Frame(text) => {
                            if self.on_frame(&text).await {
                                deadline.as_mut().reset(Instant::now() + heartbeat);
                            }
                        }
                        Command::Force { state, reply } => {
                            let mut ctx = StateContext::new(&mut self.session, &self.services);
                            let result = self.machine.transition_to(&mut ctx, state).await;
                            let _ = reply.send(result);
                        }
                        Command::Timer(timer) => {
                            let mut ctx = StateContext::new(&mut self.session, &self.services);
                            if let Err(e) = self.machine.handle_timer(&mut ctx, timer).await {
                                error!(connection = %self.id, "Failed to handle timer: {e}");
                            }
                        }
                        Command::Close => {
                            debug!(connection = %self.id, "Socket closed by reader");
                            break;
                        }
                    }
                }
                () = &mut deadline => {
                    warn!(
                        connection = %self.id,
                        "No message within {}s, closing connection",
                        heartbeat.as_secs()
                    );
                    break;
                }
            }
        }

        if !self.machine.is_bound() {
            error!(connection = %self.id, "Client has no state attached, closing connection");
        }

        self.directory.remove(&self.id);
        let mut ctx = StateContext::new(&mut self.session, &self.services);
        self.machine.shutdown(&mut ctx).await;
        info!(
            connection = %self.id,
            reader = ?self.session.reader_id(),
            "Reader disconnected"
        );
    }

    /// Dispatches one frame. Returns whether it counted as activity.
    async fn on_frame(&mut self, text: &str) -> bool {
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(connection = %self.id, "Dropping frame: {e}");
                return false;
            }
        };

        self.was_active().await;

        let mut ctx = StateContext::new(&mut self.session, &self.services);
        let result = match inbound {
            Inbound::Heartbeat => {
                debug!(connection = %self.id, "Heartbeat");
                Ok(())
            }
            Inbound::Event(data) => {
                debug!(connection = %self.id, "Received event {}", data.kind);
                self.machine.handle_event(&mut ctx, data).await
            }
            Inbound::Response(data) => {
                debug!(connection = %self.id, "Received response {}", data.kind);
                self.machine.handle_response(&mut ctx, data).await
            }
        };

        if let Err(e) = result {
            error!(connection = %self.id, "Failed to process frame: {e}");
        }
        true
    }

    async fn was_active(&mut self) {
        self.session.touch();
        if let Some(reader_id) = self.session.reader_id() {
            if let Err(e) = self.services.readers.update_last_connection(reader_id).await {
                warn!(reader = reader_id, "Failed to record reader activity: {e}");
            }
        }
    }
}
