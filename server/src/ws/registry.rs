//! In-memory registry of live socket connections.
//!
//! Tracks identity -> room -> connection, room -> connected identities, and
//! the display info of every identity with at least one live connection.
//! All three maps live behind one mutex so connect, disconnect and the
//! membership snapshots taken by broadcasts never observe a torn state.
//!
//! At most one connection is registered per (identity, room) pair; a newer
//! connection for the same pair closes and replaces the older one.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::auth::Identity;
use crate::codec::{self, Event};
use crate::ws::broadcast::Delivery;
use crate::ws::connection::{Connection, ConnectionId};

/// Close code sent to a connection replaced by a newer one for the same room.
pub const CLOSE_SUPERSEDED: u16 = 4000;

type SharedConnection = Arc<dyn Connection>;

#[derive(Default)]
struct RegistryState {
    /// identity id -> room id -> connection
    connections: HashMap<String, HashMap<String, SharedConnection>>,
    /// room id -> identity ids with a live connection to the room
    rooms: HashMap<String, BTreeSet<String>>,
    /// identity id -> last known display info
    identities: HashMap<String, Identity>,
}

/// A registration whose last send failed and must be evicted.
#[derive(Debug)]
struct Stale {
    identity_id: String,
    room_id: String,
    connection_id: ConnectionId,
}

/// Result of [`ConnectionRegistry::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// An older connection for the same (identity, room) was closed.
    pub superseded: bool,
    /// Number of other members that received `user_joined`.
    pub notified: usize,
}

/// Result of removing a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectOutcome {
    /// `user_left` went out to the remaining members.
    pub announced: bool,
    /// The room had no members left and was dropped.
    pub room_closed: bool,
    /// The identity had no connections left and its info was purged.
    pub identity_purged: bool,
}

impl RegistryState {
    fn connection(&self, identity_id: &str, room_id: &str) -> Option<SharedConnection> {
        self.connections
            .get(identity_id)
            .and_then(|rooms| rooms.get(room_id))
            .cloned()
    }

    fn room_identities(&self, room_id: &str) -> Vec<Identity> {
        self.rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| self.identities.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Send `text` to every member of `room_id` except `exclude`.
    /// Failed sends are queued on `stale`; returns the number delivered.
    fn fan_out(
        &self,
        room_id: &str,
        text: &str,
        exclude: Option<&str>,
        stale: &mut Vec<Stale>,
    ) -> usize {
        let Some(members) = self.rooms.get(room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for member in members.iter().filter(|m| Some(m.as_str()) != exclude) {
            let Some(connection) = self.connection(member, room_id) else {
                continue;
            };
            match connection.send(text) {
                Ok(()) => delivered += 1,
                Err(_) => stale.push(Stale {
                    identity_id: member.clone(),
                    room_id: room_id.to_string(),
                    connection_id: connection.id(),
                }),
            }
        }
        delivered
    }
}

fn encode_event(event: Event) -> Option<String> {
    let kind = event.kind();
    match codec::encode(event) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(event = kind, error = %err, "Failed to encode event");
            None
        }
    }
}

/// Registry of live connections. Construct one per server (or per test) and
/// share it behind an `Arc`.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` as the live connection for (identity, room).
    ///
    /// Any connection already registered for the pair is closed first (close
    /// errors are ignored). Once registered, the other members receive
    /// `user_joined` and the new connection receives `room_users`. The whole
    /// sequence runs under the registry lock.
    pub fn connect(
        &self,
        connection: Arc<dyn Connection>,
        identity: Identity,
        room_id: &str,
    ) -> ConnectOutcome {
        let mut stale = Vec::new();

        let outcome = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let identity_id = identity.id.clone();

            let previous = state
                .connections
                .entry(identity_id.clone())
                .or_default()
                .insert(room_id.to_string(), Arc::clone(&connection));
            let superseded = match previous {
                Some(previous) => {
                    if let Err(err) = previous.close(CLOSE_SUPERSEDED, "Superseded by a new connection") {
                        tracing::debug!(
                            user_id = %identity_id,
                            room_id = %room_id,
                            error = %err,
                            "Closing superseded connection failed"
                        );
                    }
                    true
                }
                None => false,
            };

            state
                .rooms
                .entry(room_id.to_string())
                .or_default()
                .insert(identity_id.clone());
            state.identities.insert(identity_id.clone(), identity.clone());

            let notified = encode_event(Event::UserJoined { user: identity })
                .map(|text| state.fan_out(room_id, &text, Some(identity_id.as_str()), &mut stale))
                .unwrap_or(0);

            let roster = Event::RoomUsers {
                users: state.room_identities(room_id),
            };
            if let Some(text) = encode_event(roster) {
                if connection.send(&text).is_err() {
                    stale.push(Stale {
                        identity_id: identity_id.clone(),
                        room_id: room_id.to_string(),
                        connection_id: connection.id(),
                    });
                }
            }

            tracing::debug!(
                user_id = %identity_id,
                room_id = %room_id,
                superseded,
                notified,
                "Connection registered"
            );

            ConnectOutcome { superseded, notified }
        };

        self.evict(stale);
        outcome
    }

    /// Remove whatever connection is registered for (identity, room).
    /// Returns `None` when nothing was registered.
    pub fn disconnect(&self, identity_id: &str, room_id: &str) -> Option<DisconnectOutcome> {
        let mut stale = Vec::new();
        let outcome = self.remove(identity_id, room_id, None, &mut stale);
        self.evict(stale);
        outcome
    }

    /// Remove the registration for (identity, room) only if it still belongs
    /// to `connection_id`. Socket cleanup uses this so that a superseded
    /// socket shutting down leaves its replacement in place.
    pub fn release(
        &self,
        identity_id: &str,
        room_id: &str,
        connection_id: ConnectionId,
    ) -> Option<DisconnectOutcome> {
        let mut stale = Vec::new();
        let outcome = self.remove(identity_id, room_id, Some(connection_id), &mut stale);
        self.evict(stale);
        outcome
    }

    pub fn is_member(&self, identity_id: &str, room_id: &str) -> bool {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .is_some_and(|members| members.contains(identity_id))
    }

    /// Snapshot of the display info of everyone connected to `room_id`.
    pub fn room_members(&self, room_id: &str) -> Vec<Identity> {
        self.state.lock().room_identities(room_id)
    }

    /// Snapshot of the identity ids connected to `room_id`.
    pub fn member_ids(&self, room_id: &str) -> Vec<String> {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms `identity_id` currently has a live connection to, sorted.
    pub fn rooms_of(&self, identity_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .state
            .lock()
            .connections
            .get(identity_id)
            .map(|rooms| rooms.keys().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Cached display info for an identity with at least one live connection.
    pub fn identity(&self, identity_id: &str) -> Option<Identity> {
        self.state.lock().identities.get(identity_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.state
            .lock()
            .connections
            .values()
            .map(HashMap::len)
            .sum()
    }

    /// Send an already-encoded frame to the connection for (identity, room).
    /// A failed send evicts that registration before returning.
    pub fn send_text(&self, identity_id: &str, room_id: &str, text: &str) -> Delivery {
        let connection = self.state.lock().connection(identity_id, room_id);
        let Some(connection) = connection else {
            return Delivery::NotConnected;
        };

        match connection.send(text) {
            Ok(()) => Delivery::Delivered,
            Err(err) => {
                tracing::debug!(
                    user_id = %identity_id,
                    room_id = %room_id,
                    error = %err,
                    "Send failed, evicting connection"
                );
                self.evict(vec![Stale {
                    identity_id: identity_id.to_string(),
                    room_id: room_id.to_string(),
                    connection_id: connection.id(),
                }]);
                Delivery::Failed
            }
        }
    }

    fn remove(
        &self,
        identity_id: &str,
        room_id: &str,
        expected: Option<ConnectionId>,
        stale: &mut Vec<Stale>,
    ) -> Option<DisconnectOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let rooms = state.connections.get_mut(identity_id)?;
        let current = rooms.get(room_id)?;
        if expected.is_some_and(|id| id != current.id()) {
            return None;
        }
        rooms.remove(room_id);

        let identity_purged = rooms.is_empty();
        let info = if identity_purged {
            state.connections.remove(identity_id);
            state.identities.remove(identity_id)
        } else {
            state.identities.get(identity_id).cloned()
        };

        let remaining = match state.rooms.get_mut(room_id) {
            Some(members) => {
                members.remove(identity_id);
                members.len()
            }
            None => 0,
        };
        let room_closed = remaining == 0;
        if room_closed {
            state.rooms.remove(room_id);
        }

        let mut announced = false;
        if !room_closed {
            if let Some(text) = info.and_then(|user| encode_event(Event::UserLeft { user })) {
                state.fan_out(room_id, &text, None, stale);
                announced = true;
            }
        }

        tracing::debug!(
            user_id = %identity_id,
            room_id = %room_id,
            announced,
            room_closed,
            identity_purged,
            "Connection unregistered"
        );

        Some(DisconnectOutcome {
            announced,
            room_closed,
            identity_purged,
        })
    }

    /// Evict registrations whose sends failed. Each eviction may announce
    /// `user_left` and surface further dead peers, so work through a queue.
    fn evict(&self, mut stale: Vec<Stale>) {
        while let Some(entry) = stale.pop() {
            tracing::debug!(
                user_id = %entry.identity_id,
                room_id = %entry.room_id,
                "Evicting dead connection"
            );
            self.remove(
                &entry.identity_id,
                &entry.room_id,
                Some(entry.connection_id),
                &mut stale,
            );
        }
    }
}
