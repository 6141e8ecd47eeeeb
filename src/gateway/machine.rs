use std::fmt;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::error::{GatewayError, GatewayResult};
use super::services::GatewayServices;
use super::session::ReaderSession;
use super::timer::TimerId;
use crate::protocol::{Message, MessageData};

/// What the machine does after a state handled a message.
pub enum Transition {
    Stay,
    /// Exit the current state and enter the given one.
    To(Box<dyn ReaderState>),
    /// Exit and re-enter the current state.
    Restart,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Stay => write!(f, "Stay"),
            Transition::To(state) => write!(f, "To({})", state.name()),
            Transition::Restart => write!(f, "Restart"),
        }
    }
}

/// Everything a state may touch while handling a message.
pub struct StateContext<'a> {
    pub session: &'a mut ReaderSession,
    pub services: &'a GatewayServices,
}

impl<'a> StateContext<'a> {
    pub fn new(session: &'a mut ReaderSession, services: &'a GatewayServices) -> Self {
        Self { session, services }
    }

    pub fn send(&self, message: Message) {
        self.session.send(message);
    }
}

/// One phase of the reader protocol.
#[async_trait]
pub trait ReaderState: Send {
    fn name(&self) -> &'static str;

    async fn on_state_enter(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition>;

    async fn on_state_exit(&mut self, _ctx: &mut StateContext<'_>) -> GatewayResult<()> {
        Ok(())
    }

    async fn on_event(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition>;

    async fn on_response(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition>;

    /// Called when a timer scheduled through the session expires.
    async fn on_timer(
        &mut self,
        _ctx: &mut StateContext<'_>,
        _timer: TimerId,
    ) -> GatewayResult<Transition> {
        Ok(Transition::Stay)
    }
}

/// Holds the current state of a connection and applies transitions.
///
/// The outgoing state is always exited before the next one is entered. A
/// failing exit is logged; a failing enter leaves the machine without state.
#[derive(Default)]
pub struct StateMachine {
    current: Option<Box<dyn ReaderState>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_name(&self) -> Option<&'static str> {
        self.current.as_ref().map(|s| s.name())
    }

    pub fn is_bound(&self) -> bool {
        self.current.is_some()
    }

    /// Replaces the current state regardless of what it is doing.
    pub async fn transition_to(
        &mut self,
        ctx: &mut StateContext<'_>,
        state: Box<dyn ReaderState>,
    ) -> GatewayResult<()> {
        self.settle(ctx, Transition::To(state)).await
    }

    pub async fn handle_event(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<()> {
        let state = self.current.as_mut().ok_or(GatewayError::NoState)?;
        let transition = state.on_event(ctx, data).await?;
        self.settle(ctx, transition).await
    }

    pub async fn handle_response(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<()> {
        let state = self.current.as_mut().ok_or(GatewayError::NoState)?;
        let transition = state.on_response(ctx, data).await?;
        self.settle(ctx, transition).await
    }

    pub async fn handle_timer(
        &mut self,
        ctx: &mut StateContext<'_>,
        timer: TimerId,
    ) -> GatewayResult<()> {
        let state = self.current.as_mut().ok_or(GatewayError::NoState)?;
        let transition = state.on_timer(ctx, timer).await?;
        self.settle(ctx, transition).await
    }

    /// Exits the current state on connection teardown.
    pub async fn shutdown(&mut self, ctx: &mut StateContext<'_>) {
        if let Some(mut state) = self.current.take() {
            if let Err(e) = state.on_state_exit(ctx).await {
                error!("Failed to exit state {}: {e}", state.name());
            }
        }
    }

    async fn settle(
        &mut self,
        ctx: &mut StateContext<'_>,
        mut transition: Transition,
    ) -> GatewayResult<()> {
        loop {
            let mut next = match transition {
                Transition::Stay => return Ok(()),
                Transition::To(next) => {
                    if let Some(mut previous) = self.current.take() {
                        if let Err(e) = previous.on_state_exit(ctx).await {
                            error!("Failed to exit state {}: {e}", previous.name());
                        }
                        debug!("Leaving state {}", previous.name());
                    }
                    next
                }
                Transition::Restart => {
                    let Some(mut current) = self.current.take() else {
                        return Err(GatewayError::NoState);
                    };
                    if let Err(e) = current.on_state_exit(ctx).await {
                        error!("Failed to exit state {}: {e}", current.name());
                    }
                    current
                }
            };

            info!(
                connection = %ctx.session.connection_id(),
                reader = ?ctx.session.reader_id(),
                "Entering state {}",
                next.name()
            );
            ctx.session.publish_state(next.name());

            match next.on_state_enter(ctx).await {
                Ok(follow_up) => {
                    self.current = Some(next);
                    transition = follow_up;
                }
                Err(e) => {
                    error!("Failed to enter state {}: {e}", next.name());
                    ctx.session.publish_state("None");
                    return Err(e);
                }
            }
        }
    }
}
