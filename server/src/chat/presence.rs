//! REST views over live room presence.
//!
//! Both endpoints read snapshots from the connection registry; nothing here
//! is persisted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::auth::Identity;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RoomPresenceResponse {
    pub room_id: String,
    pub users: Vec<Identity>,
}

/// GET /api/rooms/{room_id}/presence — Identities currently connected to the room. JWT auth required.
/// Callers need the same room access a socket join would.
pub async fn get_room_presence(
    State(state): State<AppState>,
    claims: Claims,
    Path(room_id): Path<String>,
) -> Result<Json<RoomPresenceResponse>, (StatusCode, String)> {
    if !state.authorizer.check(&claims.sub, &room_id).await {
        tracing::warn!(user_id = %claims.sub, room_id = %room_id, "Presence read refused");
        return Err((StatusCode::FORBIDDEN, "Not a member of this room".to_string()));
    }

    let users = state.registry.room_members(&room_id);
    Ok(Json(RoomPresenceResponse { room_id, users }))
}

#[derive(Debug, Serialize)]
pub struct MyRoomsResponse {
    pub rooms: Vec<String>,
}

/// GET /api/presence/rooms — Rooms the caller has a live socket to. JWT auth required.
pub async fn get_my_rooms(State(state): State<AppState>, claims: Claims) -> Json<MyRoomsResponse> {
    Json(MyRoomsResponse {
        rooms: state.registry.rooms_of(&claims.sub),
    })
}
