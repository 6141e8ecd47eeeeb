use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{NoResourcesAttachedState, ResourceSelectionState, WaitForNfcTapState};
use crate::crypto::{HashedToken, generate_token};
use crate::domain::models::{NewReader, Reader};
use crate::gateway::error::GatewayResult;
use crate::gateway::machine::{ReaderState, StateContext, Transition};
use crate::protocol::{
    Empty, EventType, Message, MessageData, ReaderAuthenticated, ReaderCredentials,
};

const TOKEN_LENGTH: usize = 16;
const READER_NAME_LENGTH: usize = 4;

/// Registration and authentication of a freshly connected reader.
///
/// Once a reader is bound the state resolves the resources it may control and
/// moves on.
#[derive(Debug, Default)]
pub struct InitialState {
    reauthenticate: bool,
}

impl InitialState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the bound reader and asks the device to authenticate again.
    pub fn reauthenticate() -> Self {
        Self {
            reauthenticate: true,
        }
    }

    async fn register(&self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition> {
        let token = generate_token(TOKEN_LENGTH);
        let hash = HashedToken::new(&token)?;
        let reader = ctx
            .services
            .readers
            .create(NewReader {
                name: generate_token(READER_NAME_LENGTH),
                api_token_hash: hash.to_string(),
                has_access_to_resource_ids: Vec::new(),
            })
            .await?;

        info!(reader = reader.id, name = %reader.name, "Registered new reader");
        ctx.send(Message::response(
            EventType::Register,
            ReaderCredentials {
                id: reader.id,
                token,
            },
        ));
        Ok(Transition::Stay)
    }

    async fn authenticate(
        &self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        let credentials = match data.payload_as::<ReaderCredentials>() {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Rejecting authentication: {e}");
                return Ok(unauthorized(ctx));
            }
        };

        let Some(reader) = ctx.services.readers.find_by_id(credentials.id).await? else {
            error!(reader = credentials.id, "No reader found for authentication");
            return Ok(unauthorized(ctx));
        };

        let valid = match HashedToken::parse(&reader.api_token_hash) {
            Ok(hash) => hash.verify(&credentials.token),
            Err(e) => {
                error!(reader = reader.id, "Stored token hash is unreadable: {e}");
                false
            }
        };
        if !valid {
            warn!(reader = reader.id, "Reader sent an invalid token");
            return Ok(unauthorized(ctx));
        }

        ctx.send(Message::response(
            EventType::ReaderAuthenticated,
            ReaderAuthenticated {
                name: reader.name.clone(),
            },
        ));
        info!(reader = reader.id, "Reader authenticated");
        ctx.session.bind_reader(reader.clone());

        resolve_resources(ctx, &reader).await
    }
}

fn unauthorized(ctx: &StateContext<'_>) -> Transition {
    ctx.send(Message::event(EventType::Unauthorized, Empty {}));
    Transition::Stay
}

/// Picks the next state from the resources the reader has access to.
async fn resolve_resources(
    ctx: &mut StateContext<'_>,
    reader: &Reader,
) -> GatewayResult<Transition> {
    let resources = ctx
        .services
        .resources
        .find_many_by_id(&reader.has_access_to_resource_ids)
        .await?;

    let next: Box<dyn ReaderState> = match resources.as_slice() {
        [] => Box::new(NoResourcesAttachedState),
        [resource] => Box::new(WaitForNfcTapState::new(resource.id)),
        _ => Box::new(ResourceSelectionState::new(resources)),
    };
    Ok(Transition::To(next))
}

#[async_trait]
impl ReaderState for InitialState {
    fn name(&self) -> &'static str {
        "Initial"
    }

    async fn on_state_enter(&mut self, ctx: &mut StateContext<'_>) -> GatewayResult<Transition> {
        if self.reauthenticate {
            if let Some(reader) = ctx.session.unbind_reader() {
                debug!(reader = reader.id, "Dropped reader binding");
            }
            ctx.send(Message::event(EventType::Reauthenticate, Empty {}));
            return Ok(Transition::Stay);
        }

        match ctx.session.reader().cloned() {
            Some(reader) => resolve_resources(ctx, &reader).await,
            None => Ok(Transition::Stay),
        }
    }

    async fn on_event(
        &mut self,
        ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        match data.kind {
            EventType::Register => self.register(ctx).await,
            EventType::Authenticate => self.authenticate(ctx, data).await,
            other => {
                warn!("Received unexpected event {other} before authentication");
                Ok(Transition::Stay)
            }
        }
    }

    async fn on_response(
        &mut self,
        _ctx: &mut StateContext<'_>,
        data: MessageData,
    ) -> GatewayResult<Transition> {
        debug!("Ignoring response {}", data.kind);
        Ok(Transition::Stay)
    }
}
