use serde_json::{Map, Value};

use crate::auth::Identity;
use crate::codec::{normalize, ObjectId, Timestamp};
use crate::ws::broadcast::BroadcastEngine;

/// A decoded client text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Chat message; `extra` carries any additional client fields.
    Message {
        content: String,
        extra: Map<String, Value>,
    },
    Ping,
    Leave,
}

/// What the serve loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Leave,
}

/// Decode a text frame.
///
/// JSON objects are dispatched on their `type` field. Anything that is not a
/// JSON object is taken as the content of a chat message. Returns `None` for
/// objects with an unknown type or a message without string content.
pub fn parse_frame(text: &str) -> Option<ClientFrame> {
    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(text) else {
        return Some(ClientFrame::Message {
            content: text.to_string(),
            extra: Map::new(),
        });
    };

    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return None,
    };

    match kind.as_str() {
        "message" => match fields.remove("content") {
            Some(Value::String(content)) => Some(ClientFrame::Message {
                content,
                extra: fields,
            }),
            _ => None,
        },
        "ping" => Some(ClientFrame::Ping),
        "leave" => Some(ClientFrame::Leave),
        _ => None,
    }
}

/// Build the payload relayed for a chat message.
pub fn chat_payload(content: &str, extra: Map<String, Value>) -> Value {
    let mut payload = Map::new();
    payload.insert("id".to_string(), normalize(&ObjectId::new()));
    payload.insert("content".to_string(), Value::String(content.to_string()));
    payload.insert("created_at".to_string(), normalize(&Timestamp::now()));
    for (key, value) in extra {
        payload.entry(key).or_insert(value);
    }
    Value::Object(payload)
}

/// Handle an incoming text frame for `identity` connected to `room_id`.
pub fn handle_text_frame(
    text: &str,
    engine: &BroadcastEngine,
    identity: &Identity,
    room_id: &str,
    max_message_chars: usize,
) -> Flow {
    let Some(frame) = parse_frame(text) else {
        tracing::debug!(
            user_id = %identity.id,
            "Ignoring unrecognized frame: {}",
            text.chars().take(100).collect::<String>()
        );
        return Flow::Continue;
    };

    match frame {
        ClientFrame::Message { content, extra } => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                tracing::debug!(user_id = %identity.id, "Dropping empty message");
                return Flow::Continue;
            }
            if trimmed.chars().count() > max_message_chars {
                tracing::debug!(
                    user_id = %identity.id,
                    limit = max_message_chars,
                    "Dropping oversized message"
                );
                return Flow::Continue;
            }

            let report = engine.broadcast_chat_message(
                room_id,
                chat_payload(trimmed, extra),
                &identity.id,
            );
            tracing::debug!(
                user_id = %identity.id,
                room_id = %room_id,
                delivered = report.delivered,
                "Chat message relayed"
            );
            Flow::Continue
        }
        ClientFrame::Ping => {
            engine.ping(&identity.id, room_id);
            Flow::Continue
        }
        ClientFrame::Leave => {
            tracing::info!(user_id = %identity.id, room_id = %room_id, "Client left room");
            Flow::Leave
        }
    }
}
