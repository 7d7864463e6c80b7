//! Integration tests for the connection registry: join/leave announcements,
//! supersede on reconnect, room garbage collection and eviction of dead peers.

mod common;

use chatroom_server::ws::ConnectionRegistry;
use common::{identity, ids, MockConnection};
use rand::Rng;

#[test]
fn test_join_and_leave_scenario() {
    let registry = ConnectionRegistry::new();
    let conn_a = MockConnection::new();
    let conn_b = MockConnection::new();

    registry.connect(conn_a.handle(), identity("a"), "r1");
    assert_eq!(ids(&serde_json::to_value(registry.room_members("r1")).unwrap()), vec!["a"]);

    registry.connect(conn_b.handle(), identity("b"), "r1");

    let joined = conn_a.events("user_joined");
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0]["user"]["id"], "b");
    assert_eq!(joined[0]["user"]["username"], "user-b");

    let roster = conn_b.events("room_users");
    assert_eq!(roster.len(), 1);
    assert_eq!(ids(&roster[0]["users"]), vec!["a", "b"]);
    assert!(conn_b.events("user_joined").is_empty(), "joiner must not hear its own join");

    let outcome = registry.disconnect("b", "r1").expect("b was registered");
    assert!(outcome.announced);
    assert!(!outcome.room_closed);
    assert!(outcome.identity_purged);

    let left = conn_a.events("user_left");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["user"]["id"], "b");
    assert_eq!(
        registry.room_members("r1").iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
        vec!["a"]
    );

    let outcome = registry.disconnect("a", "r1").expect("a was registered");
    assert!(outcome.room_closed);
    assert!(!outcome.announced);
    assert!(registry.room_members("r1").is_empty());
    assert_eq!(registry.room_count(), 0);
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn test_first_joiner_gets_roster_of_self() {
    let registry = ConnectionRegistry::new();
    let conn = MockConnection::new();

    let outcome = registry.connect(conn.handle(), identity("solo"), "r1");
    assert!(!outcome.superseded);
    assert_eq!(outcome.notified, 0);

    let roster = conn.events("room_users");
    assert_eq!(roster.len(), 1);
    assert_eq!(ids(&roster[0]["users"]), vec!["solo"]);
}

#[test]
fn test_reconnect_supersedes_exactly_once() {
    let registry = ConnectionRegistry::new();
    let first = MockConnection::new();
    let second = MockConnection::new();

    registry.connect(first.handle(), identity("a"), "r1");
    let outcome = registry.connect(second.handle(), identity("a"), "r1");

    assert!(outcome.superseded);
    assert_eq!(first.close_count(), 1);
    assert_eq!(second.close_count(), 0);
    assert_eq!(registry.connection_count(), 1);
    assert_eq!(registry.member_ids("r1"), vec!["a"]);

    // Traffic now reaches only the newer connection
    first.clear();
    let other = MockConnection::new();
    registry.connect(other.handle(), identity("b"), "r1");
    assert!(first.frames().is_empty());
    assert_eq!(second.events("user_joined").len(), 1);
}

#[test]
fn test_release_ignores_superseded_connection() {
    let registry = ConnectionRegistry::new();
    let first = MockConnection::new();
    let second = MockConnection::new();
    let first_id = chatroom_server::ws::Connection::id(&first);

    registry.connect(first.handle(), identity("a"), "r1");
    registry.connect(second.handle(), identity("a"), "r1");

    // The old socket's cleanup must not evict its replacement
    assert!(registry.release("a", "r1", first_id).is_none());
    assert!(registry.is_member("a", "r1"));

    let second_id = chatroom_server::ws::Connection::id(&second);
    assert!(registry.release("a", "r1", second_id).is_some());
    assert!(!registry.is_member("a", "r1"));
}

#[test]
fn test_membership_tracks_last_operation() {
    let mut rng = rand::rng();

    for _ in 0..50 {
        let registry = ConnectionRegistry::new();
        let mut connected = false;

        for _ in 0..20 {
            if rng.random_bool(0.5) {
                registry.connect(MockConnection::new().handle(), identity("a"), "r1");
                connected = true;
            } else {
                registry.disconnect("a", "r1");
                connected = false;
            }
            assert_eq!(registry.is_member("a", "r1"), connected);
            assert_eq!(registry.rooms_of("a").is_empty(), !connected);
            assert_eq!(registry.identity("a").is_some(), connected);
        }
    }
}

#[test]
fn test_disconnect_unknown_pair_is_noop() {
    let registry = ConnectionRegistry::new();
    assert!(registry.disconnect("ghost", "nowhere").is_none());

    registry.connect(MockConnection::new().handle(), identity("a"), "r1");
    assert!(registry.disconnect("a", "r2").is_none());
    assert!(registry.disconnect("b", "r1").is_none());
    assert!(registry.is_member("a", "r1"));
}

#[test]
fn test_multi_room_identity_keeps_info_until_last_room() {
    let registry = ConnectionRegistry::new();
    let in_r1 = MockConnection::new();
    let watcher = MockConnection::new();

    registry.connect(watcher.handle(), identity("w"), "r2");
    registry.connect(in_r1.handle(), identity("a"), "r1");
    registry.connect(MockConnection::new().handle(), identity("a"), "r2");
    assert_eq!(registry.rooms_of("a"), vec!["r1", "r2"]);

    let outcome = registry.disconnect("a", "r1").unwrap();
    assert!(!outcome.identity_purged);
    assert!(registry.identity("a").is_some());
    assert_eq!(registry.rooms_of("a"), vec!["r2"]);

    let outcome = registry.disconnect("a", "r2").unwrap();
    assert!(outcome.identity_purged);
    assert!(outcome.announced);
    assert!(registry.identity("a").is_none());
    assert_eq!(watcher.events("user_left").len(), 1);
}

#[test]
fn test_dead_peer_evicted_during_join_announcement() {
    let registry = ConnectionRegistry::new();
    let dead = MockConnection::new();
    let alive = MockConnection::new();

    registry.connect(dead.handle(), identity("dead"), "r1");
    registry.connect(alive.handle(), identity("alive"), "r1");
    dead.fail_sends();
    alive.clear();

    let newcomer = MockConnection::new();
    registry.connect(newcomer.handle(), identity("new"), "r1");

    assert!(!registry.is_member("dead", "r1"));
    assert!(registry.identity("dead").is_none());
    assert_eq!(registry.member_ids("r1"), vec!["alive", "new"]);

    // Remaining members hear that the dead peer left
    let left: Vec<_> = alive.events("user_left");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["user"]["id"], "dead");
    assert_eq!(newcomer.events("user_left").len(), 1);
}

#[test]
fn test_failed_roster_send_evicts_the_newcomer() {
    let registry = ConnectionRegistry::new();
    let watcher = MockConnection::new();
    registry.connect(watcher.handle(), identity("w"), "r1");

    let broken = MockConnection::new();
    broken.fail_sends();
    registry.connect(broken.handle(), identity("b"), "r1");

    assert!(!registry.is_member("b", "r1"));
    assert_eq!(watcher.events("user_joined").len(), 1);
    assert_eq!(watcher.events("user_left").len(), 1);
}

#[test]
fn test_send_text_reports_missing_pair() {
    let registry = ConnectionRegistry::new();
    assert_eq!(
        registry.send_text("a", "r1", "{}"),
        chatroom_server::ws::Delivery::NotConnected
    );
}
