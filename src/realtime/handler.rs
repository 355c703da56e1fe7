use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::middleware::{self, CredentialError};
use crate::realtime::actor;
use crate::realtime::registry::Identity;
use crate::state::AppState;

/// Query parameters for WebSocket connection.
/// Browsers cannot set headers on WebSocket requests, so auth rides in
/// `?token=`. The value is accepted raw or `Bearer `-prefixed.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid or missing
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates before the connection becomes
/// active: on failure the socket is upgraded and immediately closed with a
/// descriptive reason, and no registry entry is ever created.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match middleware::verify_bearer(&state.jwt_secret, params.token.as_deref()) {
        Ok(claims) => {
            tracing::info!(user_id = %claims.sub, "WebSocket connection authenticated");
            let identity = Identity {
                user_id: claims.sub,
                display_name: claims.name,
                role: claims.role,
            };
            ws.on_upgrade(move |socket| handle_authenticated(socket, state, identity))
        }
        Err(err) => {
            let close_code = match err {
                CredentialError::Expired => CLOSE_TOKEN_EXPIRED,
                CredentialError::Invalid | CredentialError::Missing => CLOSE_TOKEN_INVALID,
            };
            let reason = err.to_string();

            tracing::warn!(close_code, reason = %reason, "WebSocket auth failed");

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

/// Handle an authenticated WebSocket connection by spawning the actor.
async fn handle_authenticated(socket: WebSocket, state: AppState, identity: Identity) {
    actor::run_connection(socket, state, identity).await;
}
