//! Shared helpers for registry and broadcast tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chatroom_server::auth::Identity;
use chatroom_server::ws::{Connection, ConnectionError, ConnectionId};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

type SendHook = Box<dyn FnOnce() + Send>;

struct MockInner {
    id: ConnectionId,
    frames: Mutex<Vec<String>>,
    send_attempts: AtomicUsize,
    closes: AtomicUsize,
    failing: AtomicBool,
    on_send: Mutex<Option<SendHook>>,
}

/// In-memory connection that records every frame it is asked to send.
#[derive(Clone)]
pub struct MockConnection {
    inner: Arc<MockInner>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                id: Uuid::now_v7(),
                frames: Mutex::new(Vec::new()),
                send_attempts: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                on_send: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self) -> Arc<dyn Connection> {
        Arc::new(self.clone())
    }

    /// Every frame received so far, parsed as JSON.
    pub fn frames(&self) -> Vec<Value> {
        self.inner
            .frames
            .lock()
            .iter()
            .map(|f| serde_json::from_str(f).expect("frame is JSON"))
            .collect()
    }

    /// Frames whose `type` equals `kind`.
    pub fn events(&self, kind: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|f| f["type"] == kind)
            .collect()
    }

    pub fn clear(&self) {
        self.inner.frames.lock().clear();
    }

    pub fn send_attempts(&self) -> usize {
        self.inner.send_attempts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Make every subsequent send fail as if the peer had gone away.
    pub fn fail_sends(&self) {
        self.inner.failing.store(true, Ordering::SeqCst);
    }

    /// Run `hook` at the start of the next send.
    pub fn on_next_send(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.on_send.lock() = Some(Box::new(hook));
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn send(&self, text: &str) -> Result<(), ConnectionError> {
        self.inner.send_attempts.fetch_add(1, Ordering::SeqCst);
        let hook = self.inner.on_send.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.inner.frames.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self, _code: u16, _reason: &str) -> Result<(), ConnectionError> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn identity(id: &str) -> Identity {
    Identity::new(id, format!("user-{id}"))
}

/// Ids of the users listed in a `room_users` or similar array.
pub fn ids(users: &Value) -> Vec<String> {
    users
        .as_array()
        .expect("array of users")
        .iter()
        .map(|u| u["id"].as_str().expect("user id").to_string())
        .collect()
}
