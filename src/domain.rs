//! Records and collaborator interfaces consumed by the gateway.

pub mod memory;
pub mod models;
pub mod ports;

pub use memory::MemoryStore;
