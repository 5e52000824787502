//! Presence-aware WebSocket message relay.
//!
//! Clients open a persistent WebSocket connection, join a named room, and
//! exchange application-defined messages either point-to-point or broadcast
//! to the other occupants of their room. The relay handles connection
//! lifecycle, room membership, message routing, and heartbeat-based liveness
//! detection; message payloads are opaque to it.

pub mod protocol;
pub mod registry;
pub mod server;

// shared library
pub mod common;
