//! Event delivery on top of the [`ConnectionRegistry`].
//!
//! Every method reports what happened through [`Delivery`] or
//! [`BroadcastReport`]; dead peers are evicted by the registry and never
//! surface as errors here.

use std::sync::Arc;

use serde_json::Value;

use crate::auth::Identity;
use crate::codec::{Envelope, Event};
use crate::ws::registry::ConnectionRegistry;

/// Outcome of a point-to-point send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No live connection for the target; nothing was sent.
    NotConnected,
    /// The send failed and the registration was evicted.
    Failed,
    /// The event was refused before any send (encoding or validation).
    Rejected,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

/// Outcome of a room fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members in the snapshot, after exclusion.
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("notification must be a JSON object")]
    NotAnObject,
    #[error("notification has neither a title nor a message/content body")]
    MissingText,
}

/// Validation gate for notifications: an object carrying a non-empty `title`
/// or a non-empty `message`/`content`.
pub fn validate_notification(notification: &Value) -> Result<(), NotificationError> {
    let fields = notification
        .as_object()
        .ok_or(NotificationError::NotAnObject)?;
    let has_text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    };

    if has_text("title") || has_text("message") || has_text("content") {
        Ok(())
    } else {
        Err(NotificationError::MissingText)
    }
}

/// Sends structured events to one connection, a room, or a user.
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `event` to the single connection for (identity, room).
    pub fn send_to(&self, identity_id: &str, room_id: &str, event: Event) -> Delivery {
        self.send_envelope(identity_id, room_id, &Envelope::new(event))
    }

    pub fn send_envelope(&self, identity_id: &str, room_id: &str, envelope: &Envelope) -> Delivery {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    user_id = %identity_id,
                    event = envelope.event().kind(),
                    error = %err,
                    "Failed to encode event"
                );
                return Delivery::Rejected;
            }
        };

        let delivery = self.registry.send_text(identity_id, room_id, &text);
        if delivery == Delivery::Failed {
            tracing::info!(
                user_id = %identity_id,
                room_id = %room_id,
                event = envelope.event().kind(),
                "Delivery failed, connection dropped"
            );
        }
        delivery
    }

    /// Send `event` to every member of the room except `exclude`.
    ///
    /// Membership is snapshotted once up front: identities that join while
    /// the fan-out runs receive nothing from this call, and members that
    /// leave mid-way are skipped.
    pub fn broadcast_to_room(
        &self,
        room_id: &str,
        event: Event,
        exclude: Option<&str>,
    ) -> BroadcastReport {
        self.broadcast_envelope(room_id, &Envelope::new(event), exclude)
    }

    pub fn broadcast_envelope(
        &self,
        room_id: &str,
        envelope: &Envelope,
        exclude: Option<&str>,
    ) -> BroadcastReport {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    room_id = %room_id,
                    event = envelope.event().kind(),
                    error = %err,
                    "Failed to encode broadcast"
                );
                return BroadcastReport::default();
            }
        };

        let members = self.registry.member_ids(room_id);
        let mut report = BroadcastReport::default();
        for member in members.iter().filter(|m| Some(m.as_str()) != exclude) {
            report.recipients += 1;
            match self.registry.send_text(member, room_id, &text) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::NotConnected | Delivery::Rejected => {}
            }
        }

        if report.failed > 0 {
            tracing::info!(
                room_id = %room_id,
                event = envelope.event().kind(),
                delivered = report.delivered,
                failed = report.failed,
                "Broadcast dropped dead connections"
            );
        }
        report
    }

    /// Relay a chat message from `sender_id` to the rest of the room.
    /// The sender is excluded; their client already shows the message.
    pub fn broadcast_chat_message(
        &self,
        room_id: &str,
        payload: Value,
        sender_id: &str,
    ) -> BroadcastReport {
        let sender = self
            .registry
            .identity(sender_id)
            .unwrap_or_else(|| Identity::unknown(sender_id));
        let event = Event::Message {
            payload,
            sender,
            room_id: room_id.to_string(),
        };
        self.broadcast_to_room(room_id, event, Some(sender_id))
    }

    /// Deliver a notification to one of the identity's live connections.
    ///
    /// Rooms are tried in order until one send succeeds, so a user connected
    /// to several rooms receives the notification once. An identity with no
    /// connections yields [`Delivery::NotConnected`].
    pub fn notify_user(&self, identity_id: &str, notification: Value) -> Delivery {
        if let Err(err) = validate_notification(&notification) {
            tracing::warn!(user_id = %identity_id, error = %err, "Rejected notification");
            return Delivery::Rejected;
        }

        let rooms = self.registry.rooms_of(identity_id);
        if rooms.is_empty() {
            tracing::debug!(user_id = %identity_id, "User offline, notification not sent");
            return Delivery::NotConnected;
        }

        let envelope = Envelope::new(Event::Notification { data: notification });
        let mut outcome = Delivery::NotConnected;
        for room_id in &rooms {
            match self.send_envelope(identity_id, room_id, &envelope) {
                Delivery::Delivered => return Delivery::Delivered,
                Delivery::Rejected => return Delivery::Rejected,
                Delivery::Failed => outcome = Delivery::Failed,
                Delivery::NotConnected => {}
            }
        }
        outcome
    }

    /// Liveness echo: answer with `pong`.
    pub fn ping(&self, identity_id: &str, room_id: &str) -> Delivery {
        self.send_to(identity_id, room_id, Event::Pong {})
    }
}
