use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{
    InitialState, disable_card_checking, display_error, display_success, enable_card_checking,
};
use crate::crypto::MASTER_KEY_SLOT;
use crate::crypto::kdf::{default_key_hex, derive_current_key, key_to_hex};
use crate::domain::models::{NewCard, UserId};
use crate::gateway::error::GatewayResult;
use crate::gateway::machine::{ReaderState, StateContext, Transition};
use crate::protocol::{
    AuthenticateCard, CardAuthenticated, ChangeKeys, EventType, KeysChanged, Message, MessageData,
    NfcTap,
};

/// Progress of one enrollment, discarded on exit.
#[derive(Debug)]
struct Enrollment {
    expecting: EventType,
    card_uid: String,
    new_keys: BTreeMap<u8, String>,
}

impl Enrollment {
    fn new_key(&self) -> Option<&str> {
        self.new_keys.get(&MASTER_KEY_SLOT).map(String::as_str)
    }
}

/// Provisions a tapped NTAG424 card with a derived master key and binds it to a user.
#[derive(Debug)]
pub struct EnrollNtag424State {
    user_id: UserId,
    waiting_for_tap: bool,
    enrollment: Option<Enrollment>,
}

impl EnrollNtag424State {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            waiting_for_tap: false,
            enrollment: None,
        }
    }

    fn expecting(&self) -> Option<EventType> {
        if self.waiting_for_tap {
            Some(EventType::NfcTap)
        } else {
            self.enrollment.as_ref().map(|e| e.expecting)
        }
    }

    fn abort(&mut self, ctx: &StateContext<'_>) -> Transition {
        self.enrollment = None;
        display_error(
            ctx,
            "Enrollment failed",
            ctx.services.config.provisioning_message_duration_ms,
        );
        Transition::To(Box::new(InitialState::new()))
    }

    async fn on_tap(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        let tap: NfcTap = data.payload_as()?;
        disable_card_checking(ctx);
        self.waiting_for_tap = false;

        let existing = match ctx.services.cards.find_by_uid(&tap.card_uid).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(uid = %tap.card_uid, "Failed to look up tapped card: {e}");
                return Ok(self.abort(ctx));
            }
        };
        let authentication_key = existing
            .as_ref()
            .and_then(|card| card.master_key())
            .map_or_else(default_key_hex, str::to_owned);
        if let Some(card) = &existing {
            debug!(card = card.id, "Re-enrolling known card");
        }

        let new_key = key_to_hex(&derive_current_key(MASTER_KEY_SLOT, &tap.card_uid));
        let new_keys = BTreeMap::from([(MASTER_KEY_SLOT, new_key)]);

        ctx.send(Message::event(
            EventType::ChangeKeys,
            ChangeKeys {
                authentication_key,
                keys: new_keys.clone(),
            },
        ));
        self.enrollment = Some(Enrollment {
            expecting: EventType::ChangeKeys,
            card_uid: tap.card_uid,
            new_keys,
        });
        Ok(Transition::Stay)
    }

    fn on_keys_changed(&mut self, ctx: &StateContext<'_>, data: MessageData) -> Transition {
        let outcome: KeysChanged = data.payload_as().unwrap_or_default();
        if !outcome.is_single_success() {
            error!(
                successful = ?outcome.successful_keys,
                failed = ?outcome.failed_keys,
                "Reader failed to change card keys"
            );
            return self.abort(ctx);
        }

        let Some(enrollment) = self.enrollment.as_mut() else {
            return Transition::Stay;
        };
        let Some(key) = enrollment.new_key().map(str::to_owned) else {
            return self.abort(ctx);
        };
        enrollment.expecting = EventType::Authenticate;

        ctx.send(Message::event(
            EventType::Authenticate,
            AuthenticateCard {
                authentication_key: key,
                key_number: MASTER_KEY_SLOT,
            },
        ));
        Transition::Stay
    }

    async fn on_authenticated(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        let outcome: CardAuthenticated = data.payload_as().unwrap_or_default();
        if !outcome.authentication_successful {
            error!("Card did not authenticate with its new key");
            return Ok(self.abort(ctx));
        }
        let Some(enrollment) = self.enrollment.take() else {
            return Ok(Transition::Stay);
        };

        if let Err(e) = self.persist(ctx, enrollment).await {
            error!("Failed to store enrolled card: {e}");
            return Ok(self.abort(ctx));
        }

        display_success(
            ctx,
            "Enrollment successful",
            ctx.services.config.provisioning_message_duration_ms,
        );
        Ok(Transition::To(Box::new(InitialState::new())))
    }

    async fn persist(
        &self,
        ctx: &mut StateContext<'_>,
        enrollment: Enrollment,
    ) -> GatewayResult<()> {
        let cards = &ctx.services.cards;
        match cards.find_by_uid(&enrollment.card_uid).await? {
            Some(mut card) => {
                card.user_id = self.user_id;
                card.keys = enrollment.new_keys;
                let card = cards.update(card).await?;
                info!(card = card.id, user = self.user_id, "Updated enrolled NFC card");
            }
            None => {
                let card = cards
                    .create(NewCard {
                        uid: enrollment.card_uid,
                        user_id: self.user_id,
                        keys: enrollment.new_keys,
                    })
                    .await?;
                info!(card = card.id, user = self.user_id, "Enrolled new NFC card");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReaderState for EnrollNtag424State {
    fn name(&self) -> &'static str {
        "EnrollNTAG424"
    }

    async fn on_state_enter(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition> {
        self.enrollment = None;
        self.waiting_for_tap = true;
        enable_card_checking(ctx, "Tap your NFC card to enroll");
        Ok(Transition::Stay)
    }

    async fn on_state_exit(&mut self, _ctx: &mut StateContext<'_>) -> GatewayResult<()> {
        self.enrollment = None;
        self.waiting_for_tap = false;
        Ok(())
    }

    async fn on_event(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        if data.kind != EventType::NfcTap || !self.waiting_for_tap {
            debug!(
                "Ignoring event {} while expecting {:?}",
                data.kind,
                self.expecting()
            );
            return Ok(Transition::Stay);
        }
        self.on_tap(ctx, data).await
    }

    async fn on_response(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        let expecting = self.expecting();
        if expecting != Some(data.kind) {
            warn!(
                "Unexpected response {} while expecting {:?}",
                data.kind, expecting
            );
            return Ok(Transition::Stay);
        }

        match data.kind {
            EventType::ChangeKeys => Ok(self.on_keys_changed(ctx, data)),
            EventType::Authenticate => self.on_authenticated(ctx, data).await,
            _ => Ok(Transition::Stay),
        }
    }
}
