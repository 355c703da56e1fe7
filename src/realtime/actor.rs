//! Per-connection actor: owns the socket from handshake to close.
//!
//! Lifecycle per connection: register in the session registry, broadcast the
//! new online roster, run reader/writer/heartbeat tasks, and on any exit path
//! deregister, leave all rooms, and broadcast the roster again.

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::realtime::events::{ClientEvent, ServerEvent};
use crate::realtime::registry::{ConnectionId, Identity};
use crate::realtime::Topic;
use crate::state::AppState;

/// Application-level heartbeat: a `ping` event every 30 seconds. The pong is
/// observability only — liveness enforcement is the idle timeout below.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Transport-level liveness: if nothing arrives from the client within this
/// window (a live client at minimum answers pings), the connection is
/// force-closed. Deliberately longer than the ping interval.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches client events
///
/// The mpsc channel allows any part of the system to push messages to this
/// client by cloning the sender.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let conn_id: ConnectionId = Uuid::new_v4();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    if let Err(e) = state.sessions.register(conn_id, identity.clone(), tx.clone()) {
        // Connection ids are freshly generated v4 UUIDs; a collision here
        // means a programmer error, not a client condition.
        tracing::error!(conn_id = %conn_id, error = %e, "Session registration failed");
        return;
    }

    tracing::info!(
        conn_id = %conn_id,
        user_id = %identity.user_id,
        "WebSocket actor started"
    );

    // Everyone (including the new connection) gets the updated roster
    broadcast_online(&state);

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Spawn heartbeat task: application-level ping on a fixed interval
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;
            let ping = ServerEvent::Ping {
                timestamp: Utc::now().timestamp_millis(),
            };
            let Ok(json) = serde_json::to_string(&ping) else {
                break;
            };
            if ping_tx.send(Message::Text(json.into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }
        }
    });

    // Reader loop: process incoming WebSocket messages until close or idle
    loop {
        match timeout(IDLE_TIMEOUT, ws_receiver.next()).await {
            Ok(Some(Ok(msg))) => match msg {
                Message::Text(text) => {
                    dispatch_client_event(&state, conn_id, &identity, text.as_str()).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(conn_id = %conn_id, "Ignoring binary frame (protocol is JSON text)");
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Pong(_) => {
                    state.sessions.touch(conn_id);
                }
                Message::Close(frame) => {
                    tracing::info!(conn_id = %conn_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Ok(Some(Err(e))) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
            Ok(None) => {
                tracing::info!(conn_id = %conn_id, "WebSocket stream ended");
                break;
            }
            Err(_) => {
                tracing::info!(conn_id = %conn_id, "Idle timeout, closing connection");
                break;
            }
        }
    }

    // Cleanup: abort writer and heartbeat tasks, leave every room,
    // deregister, then tell everyone who is still online.
    writer_handle.abort();
    ping_handle.abort();

    state.rooms.leave_all(conn_id);
    state.sessions.deregister(conn_id);
    broadcast_online(&state);

    tracing::info!(
        conn_id = %conn_id,
        user_id = %identity.user_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

/// Broadcast the current online roster to every live connection.
/// Runs after each register and deregister; O(online) per event, which is
/// fine at team scale.
pub fn broadcast_online(state: &AppState) {
    let roster = state.sessions.online_users();
    if let Err(e) = state.rooms.broadcast_all(&ServerEvent::OnlineUsers(roster)) {
        tracing::warn!(error = %e, "Failed to broadcast online roster");
    }
}

/// Check the REST visibility predicate (owner, member, or admin) for a
/// project-room join. A failed store lookup counts as "not visible".
async fn can_see_project(state: &AppState, identity: &Identity, project_id: &str) -> bool {
    let db = state.db.clone();
    let user_id = identity.user_id.clone();
    let is_admin = identity.role == "admin";
    let project_id = project_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        crate::projects::visible_to(&conn, &project_id, &user_id, is_admin).ok()
    })
    .await
    .ok()
    .flatten()
    .unwrap_or(false)
}

/// Parse and dispatch one inbound text frame. Malformed frames are logged
/// and dropped; the connection stays active.
async fn dispatch_client_event(
    state: &AppState,
    conn_id: ConnectionId,
    identity: &Identity,
    text: &str,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "Malformed client event, dropping");
            return;
        }
    };

    match event {
        ClientEvent::JoinProject { project_id } => {
            // Project rooms carry task/comment broadcasts; only users who can
            // see the project over REST may subscribe.
            if !can_see_project(state, identity, &project_id).await {
                tracing::warn!(
                    conn_id = %conn_id,
                    user_id = %identity.user_id,
                    project_id = %project_id,
                    "Refused join to an inaccessible project room"
                );
                return;
            }
            state.rooms.join(conn_id, Topic::project(&project_id));
            tracing::debug!(conn_id = %conn_id, project_id = %project_id, "Joined project room");
        }
        ClientEvent::LeaveProject { project_id } => {
            state.rooms.leave(conn_id, &Topic::project(project_id));
        }
        ClientEvent::JoinUser { user_id } => {
            // Personal rooms carry notifications; only the owner (or an
            // admin) may listen in.
            if user_id != identity.user_id && identity.role != "admin" {
                tracing::warn!(
                    conn_id = %conn_id,
                    user_id = %identity.user_id,
                    target = %user_id,
                    "Refused join to another user's personal room"
                );
                return;
            }
            state.rooms.join(conn_id, Topic::user(user_id));
        }
        ClientEvent::LeaveUser { user_id } => {
            state.rooms.leave(conn_id, &Topic::user(user_id));
        }
        ClientEvent::StartTyping { topic } => {
            let Some(parsed) = Topic::parse(&topic) else {
                tracing::warn!(conn_id = %conn_id, topic = %topic, "startTyping with bad topic, dropping");
                return;
            };
            let event = ServerEvent::UserTyping {
                user_id: identity.user_id.clone(),
                display_name: identity.display_name.clone(),
                topic: parsed.to_string(),
            };
            if let Err(e) = state.rooms.publish(&parsed, &event, Some(conn_id)) {
                tracing::warn!(conn_id = %conn_id, error = %e, "Failed to publish typing event");
            }
        }
        ClientEvent::StopTyping { topic } => {
            let Some(parsed) = Topic::parse(&topic) else {
                tracing::warn!(conn_id = %conn_id, topic = %topic, "stopTyping with bad topic, dropping");
                return;
            };
            let event = ServerEvent::UserStoppedTyping {
                user_id: identity.user_id.clone(),
                topic: parsed.to_string(),
            };
            if let Err(e) = state.rooms.publish(&parsed, &event, Some(conn_id)) {
                tracing::warn!(conn_id = %conn_id, error = %e, "Failed to publish typing event");
            }
        }
        ClientEvent::Pong { timestamp } => {
            state.sessions.touch(conn_id);
            tracing::trace!(conn_id = %conn_id, timestamp, "Heartbeat pong");
        }
    }
}
