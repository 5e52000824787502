//! WebSocket connection handling: accept, frame dispatch, teardown.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::{Notify, mpsc, watch};
use uuid::Uuid;

use crate::protocol::{Envelope, TYPE_JOIN_ROOM, TYPE_PONG};

use super::heartbeat::heartbeat_loop;
use super::router;
use super::session::{Session, SessionState};
use super::state::{AppState, OUTBOUND_BUFFER, SessionHandle};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Spawns a task that drains the session's outbound queue into the
/// WebSocket sink.
fn pusher_loop(
    mut rx: mpsc::Receiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    })
}

/// Drive one connection from accept to teardown.
///
/// The inbound loop processes frames strictly in arrival order. Graceful
/// close, transport error, and heartbeat expiry all exit the loop and funnel
/// into the same cleanup path.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (ws_sender, mut ws_receiver) = socket.split();

    // Provisional identity until the client asserts its own via joinRoom.
    let mut session = Session::new(Uuid::new_v4().to_string());
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    {
        let mut sessions = state.sessions.lock().await;
        sessions.insert(
            session.identity.clone(),
            SessionHandle {
                sender: tx.clone(),
                conn_id: session.conn_id,
            },
        );
    }
    tracing::info!("connection accepted as '{}'", session.identity);

    let send_task = pusher_loop(rx, ws_sender);

    let (pong_tx, pong_rx) = mpsc::channel(1);
    let (identity_tx, identity_rx) = watch::channel(session.identity.clone());
    let expired = Arc::new(Notify::new());
    let heartbeat_task = tokio::spawn(heartbeat_loop(
        state.heartbeat,
        tx,
        pong_rx,
        identity_rx,
        expired.clone(),
    ));

    loop {
        tokio::select! {
            _ = expired.notified() => {
                tracing::info!("closing '{}' after missed heartbeat", session.identity);
                break;
            }
            msg = ws_receiver.next() => {
                let Some(msg) = msg else {
                    break;
                };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::error!("WebSocket error for '{}': {}", session.identity, e);
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => {
                        handle_frame(&state, &mut session, &identity_tx, &pong_tx, &text).await;
                    }
                    Message::Close(_) => {
                        tracing::info!("client '{}' requested close", session.identity);
                        break;
                    }
                    Message::Ping(_) => {
                        // Transport-level ping; answered by the WebSocket
                        // layer and irrelevant to session liveness.
                    }
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    heartbeat_task.abort();
    cleanup(&state, &mut session).await;
}

/// Parse one inbound frame and route it. `joinRoom` and `pong` take the
/// session's own control path; everything else goes to the router carrying
/// the envelope's routing mode. A malformed frame is dropped, never fatal.
pub(crate) async fn handle_frame(
    state: &AppState,
    session: &mut Session,
    identity_tx: &watch::Sender<String>,
    pong_tx: &mpsc::Sender<()>,
    text: &str,
) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("dropping malformed frame from '{}': {}", session.identity, e);
            return;
        }
    };

    match envelope.kind.as_str() {
        TYPE_JOIN_ROOM => {
            router::handle_join(state, session, envelope).await;
            // Heartbeat pings must address the adopted identity.
            let _ = identity_tx.send(session.identity.clone());
        }
        TYPE_PONG => {
            let _ = pong_tx.try_send(());
        }
        _ => router::dispatch(state, session, envelope).await,
    }
}

/// Release everything a connection holds: the room slot first (notifying
/// remaining occupants), then the routing entry.
///
/// The terminal session state guards a second invocation, and the `conn_id`
/// guard keeps a stale session from removing an entry whose identity was
/// re-claimed by a newer connection.
pub(crate) async fn cleanup(state: &AppState, session: &mut Session) {
    if session.state == SessionState::Closed {
        return;
    }
    session.close();

    let Some(room) = session.room.as_deref() else {
        tracing::info!("'{}' disconnected before joining a room", session.identity);
        state.sessions.lock().await.remove(&session.identity);
        return;
    };

    let occupants = {
        let mut registry = state.registry.lock().await;
        registry.leave(room, &session.identity);
        registry.snapshot(room)
    };
    tracing::info!("'{}' disconnected from room '{}'", session.identity, room);

    if let Some(occupants) = occupants {
        router::broadcast(state, room, &Envelope::occupants_changed(&occupants), None).await;
    }

    let mut sessions = state.sessions.lock().await;
    if sessions
        .get(&session.identity)
        .is_some_and(|handle| handle.conn_id == session.conn_id)
    {
        sessions.remove(&session.identity);
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::FixedClock;
    use crate::registry::RoomRegistry;
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn test_state() -> AppState {
        AppState::new(RoomRegistry::with_capacity(10))
            .with_clock(std::sync::Arc::new(FixedClock::new(5000)))
    }

    async fn register(state: &AppState, session: &Session) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        state.sessions.lock().await.insert(
            session.identity.clone(),
            SessionHandle {
                sender: tx,
                conn_id: session.conn_id,
            },
        );
        rx
    }

    fn control_channels() -> (watch::Sender<String>, mpsc::Sender<()>, mpsc::Receiver<()>) {
        let (identity_tx, _identity_rx) = watch::channel(String::new());
        let (pong_tx, pong_rx) = mpsc::channel(1);
        (identity_tx, pong_tx, pong_rx)
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_without_side_effects() {
        // given:
        let state = test_state();
        let mut session = Session::new("provisional".to_string());
        let _rx = register(&state, &session).await;
        let (identity_tx, pong_tx, _pong_rx) = control_channels();

        // when:
        handle_frame(&state, &mut session, &identity_tx, &pong_tx, "{{nope").await;
        handle_frame(&state, &mut session, &identity_tx, &pong_tx, r#"{"from":"x"}"#).await;

        // then: session untouched, no rooms created
        assert!(!session.is_joined());
        assert_eq!(state.registry.lock().await.room_count(), 0);
        assert!(state.sessions.lock().await.contains_key("provisional"));
    }

    #[tokio::test]
    async fn test_pong_frame_reaches_heartbeat() {
        // given:
        let state = test_state();
        let mut session = Session::new("provisional".to_string());
        let _rx = register(&state, &session).await;
        let (identity_tx, pong_tx, mut pong_rx) = control_channels();

        // when:
        let frame = json!({ "from": "provisional", "type": "pong", "data": null }).to_string();
        handle_frame(&state, &mut session, &identity_tx, &pong_tx, &frame).await;

        // then:
        assert!(pong_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_join_frame_updates_heartbeat_identity() {
        // given:
        let state = test_state();
        let mut session = Session::new("provisional".to_string());
        let _rx = register(&state, &session).await;
        let (identity_tx, pong_tx, _pong_rx) = control_channels();
        let mut identity_rx = identity_tx.subscribe();

        // when:
        let frame = json!({
            "from": "alice",
            "type": "joinRoom",
            "data": { "room": "lobby", "clientId": "alice" },
            "msgType": "joinedRoom"
        })
        .to_string();
        handle_frame(&state, &mut session, &identity_tx, &pong_tx, &frame).await;

        // then:
        assert_eq!(*identity_rx.borrow_and_update(), "alice");
        assert_eq!(session.room.as_deref(), Some("lobby"));
    }

    #[tokio::test]
    async fn test_cleanup_releases_room_and_notifies_remaining() {
        // given: alice and bob joined "lobby"
        let state = test_state();
        let mut alice = Session::new("a-prov".to_string());
        alice.join("alice".to_string(), "lobby".to_string());
        let mut bob = Session::new("b-prov".to_string());
        bob.join("bob".to_string(), "lobby".to_string());
        let _alice_rx = register(&state, &alice).await;
        let mut bob_rx = register(&state, &bob).await;
        {
            let mut registry = state.registry.lock().await;
            registry.join_or_create("lobby", "alice", 1000);
            registry.join_or_create("lobby", "bob", 1001);
        }

        // when:
        cleanup(&state, &mut alice).await;

        // then: alice's slot is gone and bob saw the refresh
        let occupants = state.registry.lock().await.snapshot("lobby").unwrap();
        assert!(!occupants.contains_key("alice"));
        let refresh: Value = serde_json::from_str(&bob_rx.try_recv().unwrap()).unwrap();
        assert_eq!(refresh["type"], "occupantsChanged");
        assert!(refresh["data"]["occupants"].get("alice").is_none());
        assert!(!state.sessions.lock().await.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        // given:
        let state = test_state();
        let mut session = Session::new("prov".to_string());
        session.join("alice".to_string(), "lobby".to_string());
        let _rx = register(&state, &session).await;
        {
            let mut registry = state.registry.lock().await;
            registry.join_or_create("lobby", "alice", 1000);
        }

        // when: transport close and heartbeat expiry race into cleanup
        cleanup(&state, &mut session).await;
        cleanup(&state, &mut session).await;

        // then: room reclaimed exactly once, no panic, no stale entries,
        // and the session landed in its terminal state
        assert_eq!(state.registry.lock().await.room_count(), 0);
        assert!(state.sessions.lock().await.is_empty());
        assert_eq!(session.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_cleanup_spares_reclaimed_identity() {
        // given: a newer connection re-claimed "alice"
        let state = test_state();
        let mut stale = Session::new("stale-prov".to_string());
        stale.join("alice".to_string(), "lobby".to_string());
        let (tx, _rx) = mpsc::channel(8);
        state.sessions.lock().await.insert(
            "alice".to_string(),
            SessionHandle {
                sender: tx,
                conn_id: Uuid::new_v4(), // belongs to the newer connection
            },
        );

        // when: the stale session tears down
        cleanup(&state, &mut stale).await;

        // then: the live entry survives
        assert!(state.sessions.lock().await.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_cleanup_before_join_removes_routing_entry_only() {
        // given:
        let state = test_state();
        let mut session = Session::new("prov".to_string());
        let _rx = register(&state, &session).await;

        // when:
        cleanup(&state, &mut session).await;

        // then:
        assert!(state.sessions.lock().await.is_empty());
        assert_eq!(state.registry.lock().await.room_count(), 0);
    }
}
