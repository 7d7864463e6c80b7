use std::sync::Arc;

use crate::auth::{Authenticator, RoomAuthorizer};
use crate::config::WsConfig;
use crate::db::DbPool;
use crate::ws::{BroadcastEngine, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live connections per (user, room)
    pub registry: Arc<ConnectionRegistry>,
    /// Event delivery over `registry`
    pub engine: BroadcastEngine,
    /// Resolves socket credentials to identities
    pub authenticator: Arc<dyn Authenticator>,
    /// Gatekeeper for room joins
    pub authorizer: Arc<dyn RoomAuthorizer>,
    /// WebSocket liveness and limits
    pub ws: WsConfig,
}

impl AppState {
    /// Wire the default collaborators: JWT authentication and persisted
    /// room membership with `lobby_room_id` open to everyone.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, lobby_room_id: &str, ws: WsConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            authenticator: Arc::new(crate::auth::JwtAuthenticator::new(
                jwt_secret.clone(),
                db.clone(),
            )),
            authorizer: Arc::new(crate::auth::MembershipAuthorizer::new(
                db.clone(),
                lobby_room_id,
            )),
            engine: BroadcastEngine::new(registry.clone()),
            registry,
            db,
            jwt_secret,
            ws,
        }
    }
}
