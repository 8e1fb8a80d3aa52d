// Presence registry: which users have live WebSocket connections, and the
// outbound event channels used to reach them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::Message;

// ---------------------------------------------------------------------------
// Gateway events
// ---------------------------------------------------------------------------

/// Events pushed to connected WebSocket clients. Serialized as JSON text
/// frames with a `type` discriminator.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// Full roster of currently online user ids. Sent to every client
    /// whenever a user comes online or goes fully offline.
    #[serde(rename = "ONLINE_USERS")]
    OnlineUsers { users: Vec<i64> },

    /// A chat message addressed to the receiving user.
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage { message: Message },
}

// ---------------------------------------------------------------------------
// PresenceRegistry
// ---------------------------------------------------------------------------

/// Connected sockets keyed by user id. A user may hold several connections
/// (multiple tabs); they count as online while at least one remains.
///
/// The inner mutex is a std `Mutex` and is never held across an await point;
/// sends go through unbounded channels so they cannot block.
pub struct PresenceRegistry {
    inner: Mutex<HashMap<i64, HashMap<u64, mpsc::UnboundedSender<GatewayEvent>>>>,
    next_conn: AtomicU64,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, HashMap<u64, mpsc::UnboundedSender<GatewayEvent>>>> {
        self.inner.lock().expect("presence mutex poisoned")
    }

    /// Register a new connection for `user_id`. Returns the connection id
    /// to pass back to [`deregister`](Self::deregister) when it closes.
    pub fn register(&self, user_id: i64, tx: mpsc::UnboundedSender<GatewayEvent>) -> u64 {
        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        self.lock().entry(user_id).or_default().insert(conn_id, tx);
        conn_id
    }

    /// Remove a connection. Returns `true` when this was the user's last
    /// socket and they are now offline.
    pub fn deregister(&self, user_id: i64, conn_id: u64) -> bool {
        let mut map = self.lock();
        let Some(conns) = map.get_mut(&user_id) else {
            return false;
        };
        conns.remove(&conn_id);
        if conns.is_empty() {
            map.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// Sorted ids of all users with at least one live connection.
    pub fn online_users(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.lock().contains_key(&user_id)
    }

    /// Send an event to every connected socket. Dead channels are skipped;
    /// their connections are cleaned up by their own deregister.
    pub fn broadcast(&self, event: &GatewayEvent) {
        for conns in self.lock().values() {
            for tx in conns.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Send an event to every socket of one user. Returns the number of
    /// sockets the event was queued to; zero means the user is offline.
    pub fn send_to_user(&self, user_id: i64, event: &GatewayEvent) -> usize {
        let map = self.lock();
        let Some(conns) = map.get(&user_id) else {
            return 0;
        };
        conns
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }
}
