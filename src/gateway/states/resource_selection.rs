use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::{StateFactory, WaitForNfcTapState, display_error};
use crate::domain::models::{Resource, ResourceId};
use crate::gateway::error::GatewayResult;
use crate::gateway::machine::{ReaderState, StateContext, Transition};
use crate::protocol::{EventType, KeyPressed, Message, MessageData, ShowText};

const CONFIRM_KEY: &str = "#";
const BACKSPACE_KEY: &str = "*";
const CLEAR_KEY: &str = "D";

/// Lets the user type the id of a resource on the keypad.
#[derive(Debug)]
pub struct ResourceSelectionState {
    resources: Vec<Resource>,
    value: String,
}

impl ResourceSelectionState {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            value: String::new(),
        }
    }

    fn update_display(&self, ctx: &StateContext<'_>) {
        ctx.send(Message::event(
            EventType::ShowText,
            ShowText::new("Select a resource", format!("> {} <", self.value)),
        ));
    }

    fn reject(&mut self, ctx: &StateContext<'_>, message: &str) -> Transition {
        self.value.clear();
        display_error(ctx, message, ctx.services.config.message_duration_ms);
        self.update_display(ctx);
        Transition::Stay
    }

    fn confirm(&mut self, ctx: &StateContext<'_>) -> Transition {
        let Ok(resource_id) = self.value.parse::<ResourceId>() else {
            error!("Invalid resource selection '{}'", self.value);
            return self.reject(ctx, "Invalid selection");
        };

        if !self.resources.iter().any(|r| r.id == resource_id) {
            error!(resource = resource_id, "Selected resource is not attached to reader");
            return self.reject(ctx, "Unknown resource");
        }

        debug!(resource = resource_id, "Resource selected");
        let resources = self.resources.clone();
        let back_to_selection: StateFactory =
            Arc::new(move || -> Box<dyn ReaderState> {
                Box::new(ResourceSelectionState::new(resources.clone()))
            });

        let mut next = WaitForNfcTapState::new(resource_id).on_success(back_to_selection.clone());
        if let Some(timeout) = ctx.services.config.selection_timeout() {
            next = next.with_timeout(timeout, back_to_selection);
        }
        Transition::To(Box::new(next))
    }

    fn on_key(&mut self, ctx: &StateContext<'_>, key: &str) -> Transition {
        match key {
            CONFIRM_KEY => return self.confirm(ctx),
            BACKSPACE_KEY => {
                self.value.pop();
            }
            CLEAR_KEY => self.value.clear(),
            digit if digit.len() == 1 && digit.bytes().all(|b| b.is_ascii_digit()) => {
                self.value.push_str(digit);
            }
            other => {
                debug!("Ignoring key '{other}'");
                return Transition::Stay;
            }
        }
        self.update_display(ctx);
        Transition::Stay
    }
}

#[async_trait]
impl ReaderState for ResourceSelectionState {
    fn name(&self) -> &'static str {
        "WaitForResourceSelection"
    }

    async fn on_state_enter(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition> {
        self.update_display(ctx);
        Ok(Transition::Stay)
    }

    async fn on_state_exit(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<()> {
        ctx.send(Message::bare_event(EventType::HideText));
        Ok(())
    }

    async fn on_event(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        if data.kind != EventType::KeyPressed {
            debug!("Ignoring event {} during resource selection", data.kind);
            return Ok(Transition::Stay);
        }
        let pressed: KeyPressed = data.payload_as()?;
        Ok(self.on_key(ctx, &pressed.key))
    }

    async fn on_response(
        &mut self,
        _ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        debug!("Ignoring response {} during resource selection", data.kind);
        Ok(Transition::Stay)
    }
}
