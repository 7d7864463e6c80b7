//! Outbound event envelope codec.
//!
//! Every frame sent to a client is a JSON object with at least `type` and
//! `timestamp`; event fields and any extra named fields are merged in after
//! passing through [`value::normalize`].

pub mod value;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::auth::Identity;

pub use value::{decimal_as_float, normalize, InvalidObjectId, ObjectId, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("event did not serialize to a JSON object")]
    NotAnObject,
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Server-to-client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    UserJoined { user: Identity },
    UserLeft { user: Identity },
    RoomUsers { users: Vec<Identity> },
    Message {
        payload: Value,
        sender: Identity,
        room_id: String,
    },
    Pong {},
    Notification { data: Value },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::RoomUsers { .. } => "room_users",
            Self::Message { .. } => "message",
            Self::Pong {} => "pong",
            Self::Notification { .. } => "notification",
        }
    }
}

/// An event plus its envelope fields, ready to encode.
#[derive(Debug, Clone)]
pub struct Envelope {
    event: Event,
    timestamp: Timestamp,
    extra: Map<String, Value>,
}

impl Envelope {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            timestamp: Timestamp::now(),
            extra: Map::new(),
        }
    }

    pub fn at(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Attach an extra top-level field. `type` and `timestamp` cannot be overridden.
    pub fn with_field<T>(mut self, name: &str, value: &T) -> Self
    where
        T: Serialize + std::fmt::Debug + ?Sized,
    {
        self.extra.insert(name.to_string(), normalize(value));
        self
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn to_value(&self) -> Result<Value, CodecError> {
        let Value::Object(mut body) = serde_json::to_value(&self.event)? else {
            return Err(CodecError::NotAnObject);
        };
        for (name, value) in &self.extra {
            if name != "type" && name != "timestamp" {
                body.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        body.insert(
            "timestamp".to_string(),
            Value::String(self.timestamp.to_wire_string()),
        );
        Ok(Value::Object(body))
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }
}

/// Encode an event stamped with the current time.
pub fn encode(event: Event) -> Result<String, CodecError> {
    Envelope::new(event).encode()
}
