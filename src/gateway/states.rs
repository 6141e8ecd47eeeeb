//! The reader protocol states.

mod enroll;
mod initial;
mod nfc_tap;
mod no_resources;
mod reset;
mod resource_selection;

pub use enroll::EnrollNtag424State;
pub use initial::InitialState;
pub use nfc_tap::WaitForNfcTapState;
pub use no_resources::NoResourcesAttachedState;
pub use reset::ResetNtag424State;
pub use resource_selection::ResourceSelectionState;

use std::sync::Arc;

use super::machine::{ReaderState, StateContext};
use crate::protocol::{CardChecking, DisplayMessage, EventType, Message};

/// Builds a fresh state each time it is called.
pub type StateFactory = Arc<dyn Fn() -> Box<dyn ReaderState> + Send + Sync>;

fn display_error(ctx: &StateContext<'_>, message: &str, duration: u64) {
    ctx.send(Message::event(
        EventType::DisplayError,
        DisplayMessage::new(message, duration),
    ));
}

fn display_success(ctx: &StateContext<'_>, message: &str, duration: u64) {
    ctx.send(Message::event(
        EventType::DisplaySuccess,
        DisplayMessage::new(message, duration),
    ));
}

fn enable_card_checking(ctx: &StateContext<'_>, message: &str) {
    ctx.send(Message::event(
        EventType::EnableCardChecking,
        CardChecking::with_message(message),
    ));
}

fn disable_card_checking(ctx: &StateContext<'_>) {
    ctx.send(Message::bare_event(EventType::DisableCardChecking));
}
