//! Connection-scoped reader protocol.
//!
//! Every reader socket is served by one [`connection`] task that owns a
//! [`StateMachine`]. Frames from the device, transitions forced by the REST
//! layer and timer expiries all arrive on that task's command queue and are
//! processed one at a time.

mod connection;
pub mod error;
mod machine;
mod manager;
mod services;
mod session;
pub mod states;
mod timer;

pub use error::{GatewayError, GatewayResult};
pub use machine::{ReaderState, StateContext, StateMachine, Transition};
pub use manager::{ConnectionId, ConnectionManager, FrameSender, ReaderLink};
pub use services::GatewayServices;
pub use session::{ConnectionStatus, ReaderSession};
pub use timer::{Timer, TimerId};
