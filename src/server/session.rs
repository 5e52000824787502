//! Per-connection session state.

use uuid::Uuid;

/// Lifecycle of a connection.
///
/// Only `Joined` sessions hold a room slot; a `Connected` session that never
/// joins consumes none. `Closed` is terminal and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Joined,
    Closed,
}

/// State owned by one connection's socket loop.
#[derive(Debug)]
pub struct Session {
    /// Immutable per-connection id; identities can be re-claimed, this
    /// cannot.
    pub conn_id: Uuid,
    /// Current identity: server-assigned at accept, replaced by the
    /// client-supplied `clientId` on join.
    pub identity: String,
    /// Assigned room name once joined.
    pub room: Option<String>,
    pub state: SessionState,
}

impl Session {
    /// A freshly accepted connection with a provisional identity.
    pub fn new(identity: String) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            identity,
            room: None,
            state: SessionState::Connected,
        }
    }

    /// Adopt the client-supplied identity and the assigned room. A session
    /// joins at most once; it does not switch rooms.
    pub fn join(&mut self, identity: String, room: String) {
        self.identity = identity;
        self.room = Some(room);
        self.state = SessionState::Joined;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn is_joined(&self) -> bool {
        self.state == SessionState::Joined
    }
}
