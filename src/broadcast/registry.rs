//! Connection registry: the single source of truth for who is connected and
//! which topics each connection listens to.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;

use super::connection::{Connection, ConnectionId};
use super::topic::{parse_topics, Topic};
use crate::error_handling::types::BroadcastError;

struct Entry {
    connection: Arc<Connection>,
    topics: BTreeSet<Topic>,
}

/// Tracks every live connection together with its subscription set.
///
/// All reads and writes go through one `RwLock`, so a publisher looking up
/// subscribers always sees a consistent view; the lock is never held across
/// an `.await`.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<Connection>) -> ConnectionId {
        let id = connection.id();
        let mut entries = self.entries.write();
        entries.insert(
            id,
            Entry {
                connection,
                topics: BTreeSet::new(),
            },
        );
        info!("[conn {}] registered ({} live)", id, entries.len());
        id
    }

    /// Removes the connection and closes its queue. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.entries.write().remove(&id);
        match removed {
            Some(entry) => {
                entry.connection.close();
                info!("[conn {}] unregistered", id);
                Some(entry.connection)
            }
            None => {
                debug!("[conn {}] unregister ignored: not registered", id);
                None
            }
        }
    }

    /// Adds the recognised topics to the connection's subscription set.
    ///
    /// Valid names are applied even when others are rejected; the rejected
    /// names are then reported through `InvalidTopic`.
    pub fn subscribe<S: AsRef<str>>(
        &self,
        id: ConnectionId,
        topics: &[S],
    ) -> Result<BTreeSet<Topic>, BroadcastError> {
        self.update(id, topics, |set, topic| {
            set.insert(topic);
        })
    }

    /// Removes the recognised topics from the connection's subscription set,
    /// with the same partial-success policy as [`ConnectionRegistry::subscribe`].
    pub fn unsubscribe<S: AsRef<str>>(
        &self,
        id: ConnectionId,
        topics: &[S],
    ) -> Result<BTreeSet<Topic>, BroadcastError> {
        self.update(id, topics, |set, topic| {
            set.remove(&topic);
        })
    }

    fn update<S: AsRef<str>>(
        &self,
        id: ConnectionId,
        topics: &[S],
        apply: impl Fn(&mut BTreeSet<Topic>, Topic),
    ) -> Result<BTreeSet<Topic>, BroadcastError> {
        let (valid, rejected) = parse_topics(topics);
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or(BroadcastError::UnknownConnection(id))?;
        for topic in valid {
            apply(&mut entry.topics, topic);
        }
        debug!("[conn {}] subscriptions now {:?}", id, entry.topics);
        if rejected.is_empty() {
            Ok(entry.topics.clone())
        } else {
            Err(BroadcastError::InvalidTopic(rejected))
        }
    }

    pub fn subscriptions(&self, id: ConnectionId) -> Option<BTreeSet<Topic>> {
        self.entries.read().get(&id).map(|e| e.topics.clone())
    }

    pub fn connections_for(&self, topic: Topic) -> HashSet<ConnectionId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.topics.contains(&topic))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Subscribed connections for `topic`, in a stable order.
    pub(crate) fn subscribers(&self, topic: Topic) -> Vec<Arc<Connection>> {
        let entries = self.entries.read();
        let mut subscribers: Vec<Arc<Connection>> = entries
            .values()
            .filter(|e| e.topics.contains(&topic))
            .map(|e| Arc::clone(&e.connection))
            .collect();
        subscribers.sort_by_key(|c| c.id());
        subscribers
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.entries.read().get(&id).map(|e| Arc::clone(&e.connection))
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.entries
            .read()
            .values()
            .map(|e| Arc::clone(&e.connection))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and removes every connection. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Entry> = self.entries.write().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.connection.close();
        }
        info!("closed {} connection(s)", drained.len());
        drained.len()
    }
}
