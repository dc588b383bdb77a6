use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        rejection::QueryRejection,
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::tasks::UserId;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
///
/// Token issuance/validation lives in the fronting auth layer, which
/// resolves the peer to a user id before the upgrade reaches this
/// handler; `user` carries that already-authorized identity.
#[derive(Debug, Deserialize)]
pub struct WsIdentityQuery {
    pub user: i64,
}

/// Close code sent when the upgrade arrives without a resolved identity.
const CLOSE_NO_IDENTITY: u16 = 4001;

/// GET /ws?user=<id>
/// WebSocket upgrade endpoint for task notifications.
/// Without a usable identity, upgrades then immediately closes with 4001.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    identity: Result<Query<WsIdentityQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Response {
    match identity {
        Ok(Query(query)) => {
            let user = UserId(query.user);
            tracing::info!(user = %user, "WebSocket connection accepted");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user))
        }
        Err(rejection) => {
            tracing::warn!(
                close_code = CLOSE_NO_IDENTITY,
                error = %rejection,
                "WebSocket upgrade without resolved identity"
            );

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(|mut socket: WebSocket| async move {
                let close_frame = CloseFrame {
                    code: CLOSE_NO_IDENTITY,
                    reason: "Identity required".into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
