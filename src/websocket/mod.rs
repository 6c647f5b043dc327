//! Websocket delivery layer
//!
//! The hub owns the registry of live connections and performs targeted
//! fan-out; each connection runs an inbound and an outbound pump; the
//! server authenticates callers and performs the upgrade.

mod connection;
mod hub;
mod server;

pub use connection::{Connection, PumpConfig};
pub use hub::{ConnectionId, Hub, Outbox, Payload};
pub use server::{extract_token, WebSocketServer, WS_PATH};
