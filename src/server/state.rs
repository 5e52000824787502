//! Shared relay state and per-connection routing entries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::common::time::{Clock, SystemClock};
use crate::registry::RoomRegistry;

use super::heartbeat::HeartbeatConfig;

/// Outbound frames queued per session before drop-on-full kicks in.
pub const OUTBOUND_BUFFER: usize = 64;

/// Routing entry for one live connection.
pub struct SessionHandle {
    /// Bounded outbound channel; the router enqueues with `try_send` and
    /// drops frames when the peer cannot keep up.
    pub sender: mpsc::Sender<String>,
    /// Connection id guarding cleanup when an identity is re-claimed by a
    /// newer connection.
    pub conn_id: Uuid,
}

/// Shared application state.
pub struct AppState {
    /// Room membership; join/leave/shard mutations serialize on this lock.
    pub registry: Mutex<RoomRegistry>,
    /// Live sessions keyed by current identity.
    pub sessions: Mutex<HashMap<String, SessionHandle>>,
    /// Clock used to stamp joins.
    pub clock: Arc<dyn Clock>,
    /// Liveness probe schedule applied to every connection.
    pub heartbeat: HeartbeatConfig,
}

impl AppState {
    pub fn new(registry: RoomRegistry) -> Self {
        Self {
            registry: Mutex::new(registry),
            sessions: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
