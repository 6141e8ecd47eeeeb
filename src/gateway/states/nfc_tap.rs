use std::{fmt, time::Duration};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{
    StateFactory, disable_card_checking, display_error, display_success, enable_card_checking,
};
use crate::crypto::MASTER_KEY_SLOT;
use crate::domain::models::{NfcCard, ResourceId, SessionNotes};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::machine::{ReaderState, StateContext, Transition};
use crate::gateway::timer::{Timer, TimerId};
use crate::protocol::{
    AuthenticateCard, CardAuthenticated, EventType, Message, MessageData, NfcTap, ShowText,
};

/// Waits for a card tap and toggles the usage session of one resource.
pub struct WaitForNfcTapState {
    resource_id: ResourceId,
    timeout: Option<(Duration, StateFactory)>,
    success: Option<StateFactory>,
    card: Option<NfcCard>,
    inactivity: Option<Timer>,
    settle: Option<Timer>,
}

impl WaitForNfcTapState {
    pub fn new(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            timeout: None,
            success: None,
            card: None,
            inactivity: None,
            settle: None,
        }
    }

    /// Leaves for `fallback` when no card is tapped within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration, fallback: StateFactory) -> Self {
        self.timeout = Some((timeout, fallback));
        self
    }

    /// State to continue with after a successful toggle. Without one the state
    /// restarts itself.
    pub fn on_success(mut self, next: StateFactory) -> Self {
        self.success = Some(next);
        self
    }

    fn restart_timeout(&mut self, ctx: &mut StateContext<'_>) {
        if let Some((timeout, _)) = &self.timeout {
            self.inactivity = Some(ctx.session.schedule(*timeout));
        }
    }

    /// Shows the error and restarts the state once the reader had time to display it.
    fn invalid_card(&mut self, ctx: &mut StateContext<'_>) -> Transition {
        self.card = None;
        disable_card_checking(ctx);
        display_error(ctx, "Invalid card", ctx.services.config.message_duration_ms);
        self.settle = Some(ctx.session.schedule(ctx.services.config.settle_delay()));
        Transition::Stay
    }

    async fn on_tap(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        let tap: NfcTap = data.payload_as()?;
        disable_card_checking(ctx);
        ctx.send(Message::event(
            EventType::ShowText,
            ShowText::new("Do not remove card!", ""),
        ));

        let card = match ctx.services.cards.find_by_uid(&tap.card_uid).await {
            Ok(Some(card)) => card,
            Ok(None) => {
                debug!(uid = %tap.card_uid, "Tapped card is not enrolled");
                return Ok(self.invalid_card(ctx));
            }
            Err(e) => {
                error!(uid = %tap.card_uid, "Failed to look up tapped card: {e}");
                return Ok(self.invalid_card(ctx));
            }
        };
        let Some(key) = card.master_key().map(str::to_owned) else {
            error!(card = card.id, "Card has no master key");
            return Ok(self.invalid_card(ctx));
        };

        ctx.send(Message::event(
            EventType::Authenticate,
            AuthenticateCard {
                authentication_key: key,
                key_number: MASTER_KEY_SLOT,
            },
        ));
        self.card = Some(card);
        Ok(Transition::Stay)
    }

    async fn on_authenticated(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        let Some(card) = self.card.take() else {
            error!("Received card authentication without a tapped card");
            return Ok(Transition::Stay);
        };

        let outcome: CardAuthenticated = data.payload_as().unwrap_or_default();
        if !outcome.authentication_successful {
            warn!(card = card.id, "Card failed authentication");
            return Ok(self.invalid_card(ctx));
        }

        let message = match self.toggle_usage(ctx, &card).await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(self.invalid_card(ctx)),
            Err(e) => {
                error!(
                    card = card.id,
                    resource = self.resource_id,
                    "Failed to toggle usage: {e}"
                );
                return Ok(self.invalid_card(ctx));
            }
        };

        self.restart_timeout(ctx);
        display_success(ctx, message, ctx.services.config.message_duration_ms);

        Ok(match &self.success {
            Some(next) => Transition::To(next()),
            None => Transition::Restart,
        })
    }

    /// Starts or stops the usage session for the owner of `card`. Returns the
    /// message to display, or `None` when the card has no owner.
    async fn toggle_usage(
        &self,
        ctx: &StateContext<'_>,
        card: &NfcCard,
    ) -> GatewayResult<Option<&'static str>> {
        let Some(user) = ctx.services.users.find_by_id(card.user_id).await? else {
            error!(card = card.id, user = card.user_id, "Card owner does not exist");
            return Ok(None);
        };
        let reader_id = ctx.session.reader_id().ok_or(GatewayError::ReaderNotBound)?;
        let notes = SessionNotes::new(format!(
            "-- by FabReader (ID: {reader_id}) with NFC Card (ID: {}) --",
            card.id
        ));

        let _guard = ctx.services.lock_resource(self.resource_id).await;
        let usage = &ctx.services.usage;
        if usage.get_active_session(self.resource_id, None).await?.is_some() {
            usage.end_session(self.resource_id, user.id, notes).await?;
            info!(resource = self.resource_id, user = user.id, "Stopped resource usage");
            Ok(Some("Resource stopped"))
        } else {
            usage.start_session(self.resource_id, user.id, notes).await?;
            info!(resource = self.resource_id, user = user.id, "Started resource usage");
            Ok(Some("Resource started"))
        }
    }
}

impl fmt::Debug for WaitForNfcTapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForNfcTapState")
            .field("resource_id", &self.resource_id)
            .field("timeout", &self.timeout.as_ref().map(|(t, _)| t))
            .field("card", &self.card.as_ref().map(|c| c.id))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReaderState for WaitForNfcTapState {
    fn name(&self) -> &'static str {
        "WaitForNFCTap"
    }

    async fn on_state_enter(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition> {
        let active = ctx
            .services
            .usage
            .get_active_session(self.resource_id, None)
            .await?;
        let prompt = if active.is_some() {
            "Tap to stop"
        } else {
            "Tap to start"
        };
        enable_card_checking(ctx, prompt);
        self.restart_timeout(ctx);
        Ok(Transition::Stay)
    }

    async fn on_state_exit(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<()> {
        self.inactivity = None;
        self.settle = None;
        disable_card_checking(ctx);
        ctx.send(Message::bare_event(EventType::HideText));
        Ok(())
    }

    async fn on_event(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        if data.kind != EventType::NfcTap {
            debug!("Ignoring event {} while waiting for a tap", data.kind);
            return Ok(Transition::Stay);
        }
        self.restart_timeout(ctx);
        self.on_tap(ctx, data).await
    }

    async fn on_response(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        if data.kind != EventType::Authenticate {
            debug!("Ignoring response {} while waiting for a tap", data.kind);
            return Ok(Transition::Stay);
        }
        self.restart_timeout(ctx);
        self.on_authenticated(ctx, data).await
    }

    async fn on_timer(
        &mut self,
        ctx: &mut StateContext<'_>,
        timer: TimerId,
    ) -> GatewayResult<Transition> {
        if self.inactivity.as_ref().is_some_and(|t| t.is(timer)) {
            self.inactivity = None;
            debug!(resource = self.resource_id, "No card tapped in time");
            disable_card_checking(ctx);
            return Ok(match &self.timeout {
                Some((_, fallback)) => Transition::To(fallback()),
                None => Transition::Stay,
            });
        }

        if self.settle.as_ref().is_some_and(|t| t.is(timer)) {
            self.settle = None;
            return Ok(Transition::Restart);
        }

        Ok(Transition::Stay)
    }
}
