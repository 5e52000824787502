//! Session liveness probing.
//!
//! Application traffic does not count as liveness, and a half-open socket
//! may never surface a transport close. Each connection therefore gets its
//! own probe schedule: a `ping` every interval, forced disconnect when the
//! `pong` misses the deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::timeout;

use crate::protocol::Envelope;

/// Probe schedule for one session.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Gap between probes.
    pub interval: Duration,
    /// How long a probe may stay unanswered.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(4),
        }
    }
}

/// Drive liveness probes for one session until the connection closes or a
/// probe goes unanswered.
///
/// Pings are addressed to the session's current identity, which changes on
/// join; `identity_rx` tracks it. On a missed deadline the task signals
/// `expired` and exits; the socket loop owns the actual teardown, so a
/// session already closed by a transport error is never double-cleaned.
pub async fn heartbeat_loop(
    config: HeartbeatConfig,
    outbound: mpsc::Sender<String>,
    mut pong_rx: mpsc::Receiver<()>,
    mut identity_rx: watch::Receiver<String>,
    expired: Arc<Notify>,
) {
    loop {
        tokio::time::sleep(config.interval).await;

        // A pong left over from the previous cycle must not answer this
        // probe.
        while pong_rx.try_recv().is_ok() {}

        let to = identity_rx.borrow_and_update().clone();
        let ping = Envelope::ping(&to).to_json();
        match outbound.try_send(ping) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {
                // Connection already torn down.
                return;
            }
            Err(TrySendError::Full(_)) => {
                // The peer is stalled with a backed-up queue. The dropped
                // ping can never be answered, so the deadline below still
                // fires and forces the disconnect.
                tracing::debug!("outbound queue full for '{to}', ping dropped");
            }
        }

        match timeout(config.timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            Ok(None) => return,
            Err(_) => {
                tracing::warn!("heartbeat timeout for '{to}', forcing disconnect");
                expired.notify_one();
                return;
            }
        }
    }
}
