//! WebSocket relay server implementation.

mod handler;
pub mod heartbeat;
pub mod router;
mod runner;
pub mod session;
mod signal;
pub mod state;

pub use runner::{RelayConfig, run_server};
