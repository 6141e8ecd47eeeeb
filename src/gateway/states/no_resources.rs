use async_trait::async_trait;
use tracing::debug;

use crate::gateway::error::GatewayResult;
use crate::gateway::machine::{ReaderState, StateContext, Transition};
use crate::protocol::{EventType, Message, MessageData, ShowText};

/// Terminal state of a reader without any resources.
#[derive(Debug, Default)]
pub struct NoResourcesAttachedState;

#[async_trait]
impl ReaderState for NoResourcesAttachedState {
    fn name(&self) -> &'static str {
        "NoResourcesAttached"
    }

    async fn on_state_enter(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition> {
        ctx.send(Message::event(
            EventType::ShowText,
            ShowText::new("No resources", "attached"),
        ));
        Ok(Transition::Stay)
    }

    async fn on_state_exit(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<()> {
        ctx.send(Message::bare_event(EventType::HideText));
        Ok(())
    }

    async fn on_event(
        &mut self,
        _ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        debug!("Ignoring event {} without resources", data.kind);
        Ok(Transition::Stay)
    }

    async fn on_response(
        &mut self,
        _ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        debug!("Ignoring response {} without resources", data.kind);
        Ok(Transition::Stay)
    }
}
