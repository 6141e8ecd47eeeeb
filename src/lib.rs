//! WebSocket gateway for NFC card readers.
//!
//! Readers connect over a WebSocket, authenticate with an issued token and are
//! then driven through a per-connection state machine: selecting a resource,
//! toggling its usage with an NTAG424 card, or provisioning and resetting cards
//! when an administrator asks for it over HTTP.

pub mod config;
pub mod crypto;
pub mod domain;
pub mod gateway;
pub mod protocol;
pub mod server;
pub mod telemetry;
