use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::middleware::bearer_token;
use crate::auth::{AuthError, CLOSE_ROOM_FORBIDDEN};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// The bearer token may come as ?token=JWT or in the Authorization header.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Pick the credential: query parameter first, then `Authorization: Bearer`.
pub fn extract_credential(query: &WsAuthQuery, headers: &HeaderMap) -> Option<String> {
    query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers))
        .map(str::to_string)
}

/// GET /ws/{room_id}?token=JWT
/// Authenticates the credential and authorizes the room before upgrading.
/// Refusals still upgrade, then immediately close with the matching code, and
/// never touch the registry.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let resolved = match extract_credential(&params, &headers) {
        Some(credential) => state.authenticator.resolve(&credential).await,
        None => Err(AuthError::MissingCredential),
    };

    let identity = match resolved {
        Ok(identity) => identity,
        Err(err) => {
            let (close_code, reason) = err.close_frame();
            tracing::warn!(
                room_id = %room_id,
                close_code = close_code,
                error = %err,
                "WebSocket auth failed"
            );
            return reject(ws, close_code, reason);
        }
    };

    if !state.authorizer.check(&identity.id, &room_id).await {
        tracing::warn!(
            user_id = %identity.id,
            room_id = %room_id,
            "WebSocket room authorization failed"
        );
        return reject(ws, CLOSE_ROOM_FORBIDDEN, "Not a member of this room");
    }

    tracing::info!(
        user_id = %identity.id,
        username = %identity.username,
        room_id = %room_id,
        "WebSocket connection authenticated"
    );
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, identity, room_id))
}

/// Upgrade the connection, then immediately close with the error code.
fn reject(ws: WebSocketUpgrade, close_code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: close_code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
