pub mod health;
pub mod readers;
pub mod websocket;
