//! Envelope routing: unicast, room broadcast, and join handling.
//!
//! Delivery is at-most-once and best-effort. An unknown recipient, a closed
//! connection, or a full outbound queue all drop the message without
//! surfacing an error to the sender.

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::{Envelope, JoinRoomData, RoutingMode};

use super::session::Session;
use super::state::AppState;

/// Why a frame was not enqueued. Callers treat every variant as a drop, not
/// a failure; the distinction only shows up in logs.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no live session for '{0}'")]
    UnknownRecipient(String),
    #[error("outbound queue full for '{0}'")]
    QueueFull(String),
    #[error("outbound channel closed for '{0}'")]
    Closed(String),
}

/// Enqueue an envelope for the session named in its `to` field.
pub async fn unicast(state: &AppState, envelope: &Envelope) -> Result<(), DeliveryError> {
    let target = envelope.to.clone().unwrap_or_default();
    let sessions = state.sessions.lock().await;
    let Some(handle) = sessions.get(&target) else {
        return Err(DeliveryError::UnknownRecipient(target));
    };
    handle.sender.try_send(envelope.to_json()).map_err(|e| match e {
        TrySendError::Full(_) => DeliveryError::QueueFull(target),
        TrySendError::Closed(_) => DeliveryError::Closed(target),
    })
}

/// Deliver an envelope to every occupant of `room` except `exclude`,
/// rewriting `to` per recipient. A room that no longer exists is a no-op.
pub async fn broadcast(state: &AppState, room: &str, envelope: &Envelope, exclude: Option<&str>) {
    let occupants = { state.registry.lock().await.snapshot(room) };
    let Some(occupants) = occupants else {
        return;
    };
    for identity in occupants.keys() {
        if Some(identity.as_str()) == exclude {
            continue;
        }
        let mut delivery = envelope.clone();
        delivery.to = Some(identity.clone());
        if let Err(e) = unicast(state, &delivery).await {
            tracing::debug!("dropping broadcast frame: {e}");
        }
    }
}

/// Route an application envelope from `session` according to its routing
/// mode.
pub async fn dispatch(state: &AppState, session: &Session, envelope: Envelope) {
    match envelope.msg_type {
        RoutingMode::Send => {
            if let Err(e) = unicast(state, &envelope).await {
                tracing::debug!("dropping unicast frame: {e}");
            }
        }
        RoutingMode::Broadcast => {
            let Some(room) = session.room.as_deref() else {
                tracing::warn!("'{}' broadcast before joining a room", session.identity);
                return;
            };
            // The envelope's `to` names the excluded recipient; the sender
            // by convention, but the wire protocol allows overriding it.
            let exclude = envelope
                .to
                .clone()
                .unwrap_or_else(|| session.identity.clone());
            broadcast(state, room, &envelope, Some(&exclude)).await;
        }
        RoutingMode::Other => {
            tracing::warn!(
                "dropping '{}' frame from '{}' with unroutable msgType",
                envelope.kind,
                session.identity
            );
        }
    }
}

/// Handle a `joinRoom` control envelope: place the session in a room (or an
/// overflow shard), adopt the client-supplied identity, acknowledge with
/// `connectSuccess`, and refresh the room's membership view for everyone.
pub async fn handle_join(state: &AppState, session: &mut Session, envelope: Envelope) {
    let data: JoinRoomData = match serde_json::from_value(envelope.data) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(
                "dropping invalid joinRoom payload from '{}': {}",
                session.identity,
                e
            );
            return;
        }
    };
    if session.is_joined() {
        tracing::warn!(
            "'{}' already joined '{}', ignoring joinRoom",
            session.identity,
            session.room.as_deref().unwrap_or_default()
        );
        return;
    }

    let now = state.clock.now_millis();
    let (assigned, joined_at) = {
        let mut registry = state.registry.lock().await;
        registry.join_or_create(&data.room, &data.client_id, now)
    };

    // Re-key the routing entry from the provisional identity to the
    // client-supplied one. Identities are self-asserted; a duplicate claim
    // replaces the previous routing entry (last writer wins).
    {
        let mut sessions = state.sessions.lock().await;
        if let Some(handle) = sessions.remove(&session.identity) {
            if sessions.insert(data.client_id.clone(), handle).is_some() {
                tracing::warn!("identity '{}' re-claimed by a new connection", data.client_id);
            }
        }
    }
    session.join(data.client_id, assigned.clone());

    tracing::info!("'{}' joined room '{}'", session.identity, assigned);

    let reply = Envelope::connect_success(&session.identity, joined_at);
    if let Err(e) = unicast(state, &reply).await {
        tracing::warn!("failed to acknowledge join for '{}': {}", session.identity, e);
    }

    // Every member, including the new joiner, receives the refreshed
    // membership.
    let occupants = { state.registry.lock().await.snapshot(&assigned) };
    if let Some(occupants) = occupants {
        broadcast(state, &assigned, &Envelope::occupants_changed(&occupants), None).await;
    }
}
