//! Bounded per-connection outbound queue with drop-oldest overflow.
//!
//! Publishers push serialized frames without ever waiting; the connection's
//! write loop is the single consumer and awaits [`OutboundQueue::next`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// The queue was full; the oldest frame was discarded to make room.
    DroppedOldest,
    /// The queue was closed; the frame was discarded.
    Closed,
}

struct QueueState {
    frames: VecDeque<Arc<str>>,
    closed: bool,
}

pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Notify,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, frame: Arc<str>) -> Enqueue {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Enqueue::Closed;
            }
            let outcome = if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::DroppedOldest
            } else {
                Enqueue::Queued
            };
            state.frames.push_back(frame);
            outcome
        };
        self.ready.notify_one();
        outcome
    }

    /// Waits for the next frame. Returns `None` once the queue is closed,
    /// even if frames were still pending.
    ///
    /// Cancel safe: a frame is only removed on the poll that returns it.
    pub async fn next(&self) -> Option<Arc<str>> {
        loop {
            let notified = self.ready.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
            }
            notified.await;
        }
    }

    /// Closes the queue and releases every pending frame.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.frames.clear();
            state.frames.shrink_to_fit();
        }
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames discarded by drop-oldest since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
