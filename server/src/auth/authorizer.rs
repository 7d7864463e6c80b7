use async_trait::async_trait;

use crate::codec::ObjectId;
use crate::db::{models, DbPool};

/// Decides whether an authenticated identity may open a socket to a room.
#[async_trait]
pub trait RoomAuthorizer: Send + Sync {
    async fn check(&self, identity_id: &str, room_id: &str) -> bool;
}

/// Authorises against persisted room membership.
///
/// The lobby room admits every resolved identity. Any other room id must be a
/// canonical object id naming an existing room the identity belongs to.
pub struct MembershipAuthorizer {
    db: DbPool,
    lobby_room_id: String,
}

impl MembershipAuthorizer {
    pub fn new(db: DbPool, lobby_room_id: impl Into<String>) -> Self {
        Self {
            db,
            lobby_room_id: lobby_room_id.into(),
        }
    }
}

#[async_trait]
impl RoomAuthorizer for MembershipAuthorizer {
    async fn check(&self, identity_id: &str, room_id: &str) -> bool {
        if room_id == self.lobby_room_id {
            return true;
        }

        if room_id.parse::<ObjectId>().is_err() {
            tracing::debug!(room_id = %room_id, "Rejecting malformed room id");
            return false;
        }

        let db = self.db.clone();
        let room = room_id.to_string();
        let user = identity_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| format!("DB lock: {e}"))?;
            if !models::room_exists(&conn, &room).map_err(|e| e.to_string())? {
                return Ok::<_, String>(false);
            }
            models::is_room_member(&conn, &room, &user).map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(allowed)) => allowed,
            Ok(Err(err)) => {
                tracing::warn!(room_id = %room_id, error = %err, "Room authorization query failed");
                false
            }
            Err(err) => {
                tracing::warn!(room_id = %room_id, error = %err, "Room authorization task failed");
                false
            }
        }
    }
}
