//! State of one live dashboard connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::queue::{Enqueue, OutboundQueue};

/// Opaque identifier handed out when a connection is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected client: its outbound queue and liveness bookkeeping.
///
/// Topic subscriptions are not stored here; the registry owns them so that
/// lookups and mutations happen under a single lock.
pub struct Connection {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    last_seen: Mutex<DateTime<Utc>>,
    alive: AtomicBool,
    missed_heartbeats: AtomicU32,
    queue: OutboundQueue,
    ping: Notify,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(remote_addr: Option<SocketAddr>, queue_capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectionId::new(),
            remote_addr,
            connected_at: now,
            last_seen: Mutex::new(now),
            alive: AtomicBool::new(true),
            missed_heartbeats: AtomicU32::new(0),
            queue: OutboundQueue::new(queue_capacity),
            ping: Notify::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.lock()
    }

    /// Enqueues a serialized frame without blocking.
    pub fn send(&self, frame: Arc<str>) -> Enqueue {
        self.queue.push(frame)
    }

    /// Next frame for the write loop; `None` once the connection is closed.
    pub async fn next_frame(&self) -> Option<Arc<str>> {
        self.queue.next().await
    }

    pub fn dropped_messages(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn pending_messages(&self) -> usize {
        self.queue.len()
    }

    /// Records client activity (pong, PING message, any inbound frame).
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
        self.missed_heartbeats.store(0, Ordering::Relaxed);
        *self.last_seen.lock() = Utc::now();
    }

    /// Returns whether the client was active since the previous call and
    /// resets the flag.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn record_missed_heartbeat(&self) -> u32 {
        self.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn reset_missed_heartbeats(&self) {
        self.missed_heartbeats.store(0, Ordering::Relaxed);
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats.load(Ordering::Relaxed)
    }

    /// Asks the write loop to emit a protocol-level ping.
    pub fn request_ping(&self) {
        self.ping.notify_one();
    }

    pub async fn ping_requested(&self) {
        self.ping.notified().await
    }

    /// Stops delivery, releases the queue and wakes every [`Connection::closed`]
    /// waiter. Idempotent.
    pub fn close(&self) {
        self.queue.close();
        self.closed.cancel();
    }

    /// Resolves once the connection has been closed from the server side.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
