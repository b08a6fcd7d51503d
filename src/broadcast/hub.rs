use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use serde_json::Value;

use super::connection::{Connection, ConnectionId};
use super::envelope::{Envelope, EnvelopeBuilder, EventKind};
use super::registry::ConnectionRegistry;
use super::router::{PublishReport, TopicRouter};
use crate::error_handling::types::BroadcastError;

/// Process-wide handle over the registry and router.
///
/// Cloning is cheap; every clone refers to the same connections.
#[derive(Clone)]
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    router: Arc<TopicRouter>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(TopicRouter::new(Arc::clone(&registry)));
        Self {
            registry,
            router,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Accepts a new connection with an empty subscription set.
    pub fn connect(&self, remote_addr: Option<SocketAddr>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(remote_addr, self.queue_capacity));
        self.registry.register(Arc::clone(&connection));
        connection
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.registry.unregister(id);
    }

    pub fn publish(&self, envelope: Envelope) -> Result<PublishReport, BroadcastError> {
        self.router.publish(envelope)
    }

    pub fn publish_event(
        &self,
        kind: EventKind,
        data: Value,
    ) -> Result<PublishReport, BroadcastError> {
        self.publish(EnvelopeBuilder::build(kind, data))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Closes every connection. Write loops observe the closed queue and end.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.close_all();
        info!("broadcast hub shut down, {} connection(s) closed", closed);
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn clones_share_connections() {
        let hub = BroadcastHub::new(8);
        let other = hub.clone();
        let conn = hub.connect(None);
        other.registry().subscribe(conn.id(), &["sessions"]).unwrap();

        let report = other
            .publish_event(EventKind::NewSession, json!({"id": "s-1"}))
            .unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(hub.connection_count(), 1);

        let frame = conn.next_frame().await.unwrap();
        let wire: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(wire["type"], "NEW_SESSION");
        assert_eq!(wire["topic"], "sessions");
    }

    #[tokio::test]
    async fn disconnect_stops_delivery_immediately() {
        let hub = BroadcastHub::new(8);
        let conn = hub.connect(None);
        hub.registry().subscribe(conn.id(), &["terminal"]).unwrap();
        hub.disconnect(conn.id());

        let report = hub
            .publish_event(EventKind::TerminalLog, json!({"message": "x"}))
            .unwrap();
        assert_eq!(report.recipients, 0);
        assert!(conn.is_closed());
        assert!(conn.next_frame().await.is_none());
    }

    #[test]
    fn shutdown_closes_everything() {
        let hub = BroadcastHub::new(8);
        let a = hub.connect(None);
        let b = hub.connect(None);
        assert_eq!(hub.shutdown(), 2);
        assert!(a.is_closed() && b.is_closed());
        assert_eq!(hub.connection_count(), 0);
    }
}
