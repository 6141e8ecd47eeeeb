use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{
    InitialState, disable_card_checking, display_error, display_success, enable_card_checking,
};
use crate::crypto::MASTER_KEY_SLOT;
use crate::crypto::kdf::default_key_hex;
use crate::domain::models::{CardId, NfcCard};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::machine::{ReaderState, StateContext, Transition};
use crate::protocol::{ChangeKeys, EventType, KeysChanged, Message, MessageData, NfcTap};

/// Restores the factory master key of an enrolled card and deletes its record.
#[derive(Debug)]
pub struct ResetNtag424State {
    card_id: CardId,
    card: Option<NfcCard>,
    awaiting_key_change: bool,
}

impl ResetNtag424State {
    pub fn new(card_id: CardId) -> Self {
        Self {
            card_id,
            card: None,
            awaiting_key_change: false,
        }
    }

    async fn on_tap(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        let tap: NfcTap = data.payload_as()?;
        let Some(card) = &self.card else {
            return Ok(Transition::Stay);
        };
        if tap.card_uid != card.uid {
            warn!(
                card = card.id,
                uid = %tap.card_uid,
                "Tapped card does not match the card to reset"
            );
            return Ok(Transition::Stay);
        }

        disable_card_checking(ctx);
        let current_key = ctx
            .services
            .cards
            .find_by_uid(&tap.card_uid)
            .await?
            .and_then(|card| card.master_key().map(str::to_owned))
            .unwrap_or_else(default_key_hex);

        ctx.send(Message::event(
            EventType::ChangeKeys,
            ChangeKeys {
                authentication_key: current_key,
                keys: BTreeMap::from([(MASTER_KEY_SLOT, default_key_hex())]),
            },
        ));
        self.awaiting_key_change = true;
        Ok(Transition::Stay)
    }

    async fn on_keys_changed(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        self.awaiting_key_change = false;
        let duration = ctx.services.config.provisioning_message_duration_ms;

        let outcome: KeysChanged = data.payload_as().unwrap_or_default();
        if !outcome.is_single_success() {
            error!(
                card = self.card_id,
                failed = ?outcome.failed_keys,
                "Reader failed to reset card keys"
            );
            display_error(ctx, "Reset failed", duration);
            return Ok(Transition::To(Box::new(InitialState::new())));
        }

        if let Err(e) = ctx.services.cards.delete(self.card_id).await {
            error!(card = self.card_id, "Failed to delete reset card: {e}");
            display_error(ctx, "Reset failed", duration);
            return Ok(Transition::To(Box::new(InitialState::new())));
        }

        info!(card = self.card_id, "Reset NFC card");
        display_success(ctx, "Card erased", duration);
        Ok(Transition::To(Box::new(InitialState::new())))
    }
}

#[async_trait]
impl ReaderState for ResetNtag424State {
    fn name(&self) -> &'static str {
        "ResetNTAG424"
    }

    async fn on_state_enter(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition> {
        let card = ctx
            .services
            .cards
            .find_by_id(self.card_id)
            .await?
            .ok_or(GatewayError::CardNotFound(self.card_id))?;
        self.card = Some(card);
        self.awaiting_key_change = false;

        enable_card_checking(ctx, "Tap your NFC card to reset it");
        Ok(Transition::Stay)
    }

    async fn on_event(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        if data.kind != EventType::NfcTap || self.awaiting_key_change {
            debug!("Ignoring event {} during card reset", data.kind);
            return Ok(Transition::Stay);
        }
        self.on_tap(ctx, data).await
    }

    async fn on_response(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        if data.kind != EventType::ChangeKeys || !self.awaiting_key_change {
            warn!("Unexpected response {} during card reset", data.kind);
            return Ok(Transition::Stay);
        }
        self.on_keys_changed(ctx, data).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::models::NewCard;
    use crate::domain::ports::CardDirectory;
    use crate::gateway::states::testing::Harness;

    async fn stored_card(harness: &Harness, uid: &str) -> NfcCard {
        let user = harness.store.add_user("ada");
        CardDirectory::create(
            &harness.store,
            NewCard {
                uid: uid.into(),
                user_id: user.id,
                keys: BTreeMap::from([(0, "ab".repeat(16))]),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_reset_happy_path() {
        let mut harness = Harness::new();
        let card = stored_card(&harness, "XYZ").await;
        harness
            .enter(Box::new(ResetNtag424State::new(card.id)))
            .await;
        let sent = harness.sent();
        assert_eq!(
            sent[0].data.payload["message"],
            "Tap your NFC card to reset it"
        );

        harness
            .event(EventType::NfcTap, json!({ "cardUID": "XYZ" }))
            .await;
        let sent = harness.sent();
        assert_eq!(sent[0].kind(), EventType::DisableCardChecking);
        assert_eq!(
            sent[1].data.payload,
            json!({
                "authenticationKey": "ab".repeat(16),
                "keys": { "0": "0".repeat(32) }
            })
        );

        harness
            .response(EventType::ChangeKeys, json!({ "successfulKeys": [0] }))
            .await;
        let sent = harness.sent();
        assert_eq!(sent[0].kind(), EventType::DisplaySuccess);
        assert_eq!(sent[0].data.payload["message"], "Card erased");
        assert!(harness.store.cards().is_empty());
        assert_eq!(harness.state(), Some("Initial"));
    }

    #[tokio::test]
    async fn test_reset_ignores_other_cards() {
        let mut harness = Harness::new();
        let card = stored_card(&harness, "XYZ").await;
        harness
            .enter(Box::new(ResetNtag424State::new(card.id)))
            .await;
        harness.sent();

        harness
            .event(EventType::NfcTap, json!({ "cardUID": "OTHER" }))
            .await;
        harness
            .response(EventType::ChangeKeys, json!({ "successfulKeys": [0] }))
            .await;

        assert!(harness.sent().is_empty());
        assert_eq!(harness.store.cards().len(), 1);
        assert_eq!(harness.state(), Some("ResetNTAG424"));
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_card() {
        let mut harness = Harness::new();
        let card = stored_card(&harness, "XYZ").await;
        harness
            .enter(Box::new(ResetNtag424State::new(card.id)))
            .await;
        harness
            .event(EventType::NfcTap, json!({ "cardUID": "XYZ" }))
            .await;
        harness.sent();

        harness
            .response(EventType::ChangeKeys, json!({ "failedKeys": [0] }))
            .await;

        let sent = harness.sent();
        assert_eq!(sent[0].data.payload["message"], "Reset failed");
        assert_eq!(harness.store.cards().len(), 1);
    }
}
