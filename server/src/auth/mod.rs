//! Credential resolution and room authorisation.
//!
//! The socket layer consumes these through two narrow traits:
//! [`Authenticator`] turns a bearer credential into an [`Identity`] and
//! [`RoomAuthorizer`] decides whether that identity may join a room.

pub mod authenticator;
pub mod authorizer;
pub mod jwt;
pub mod middleware;

use serde::{Deserialize, Serialize};

pub use authenticator::{Authenticator, JwtAuthenticator};
pub use authorizer::{MembershipAuthorizer, RoomAuthorizer};

/// WebSocket close codes for refused connections.
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_ROOM_FORBIDDEN: u16 = 4003;

/// An authenticated user as seen by the socket layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    /// Placeholder for a sender whose display info is not cached.
    pub fn unknown(id: &str) -> Self {
        Self::new(id, "unknown")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("token expired")]
    Expired,
    #[error("token invalid: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("identity lookup failed: {0}")]
    Lookup(String),
}

impl AuthError {
    /// Close code and reason sent to the client before the socket is dropped.
    pub fn close_frame(&self) -> (u16, &'static str) {
        match self {
            Self::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
            _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
        }
    }
}
