//! Topic router: fans an envelope out to every current subscriber.
//!
//! Publishing never waits on a consumer. Each subscriber has a bounded
//! queue; when it is full the oldest frame is dropped for that subscriber
//! only. Envelopes for the same topic are published one at a time (per-topic
//! lane lock), which gives every subscriber the publish order and keeps
//! timestamps non-decreasing per topic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;

use super::envelope::Envelope;
use super::queue::Enqueue;
use super::registry::ConnectionRegistry;
use super::topic::Topic;
use crate::error_handling::types::BroadcastError;

/// Outcome of one publish call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishReport {
    pub recipients: usize,
    /// Subscribers whose queue overflowed during this publish.
    pub overflowed: Vec<BroadcastError>,
}

#[derive(Default)]
struct Lane {
    last_timestamp: Option<DateTime<Utc>>,
    published: u64,
}

pub struct TopicRouter {
    registry: Arc<ConnectionRegistry>,
    lanes: [Mutex<Lane>; 4],
}

impl TopicRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            lanes: Default::default(),
        }
    }

    /// Delivers `envelope` to every connection subscribed to its topic at
    /// the time of the call.
    ///
    /// The envelope timestamp is raised to the last timestamp published on
    /// the same topic if the clock went backwards.
    pub fn publish(&self, mut envelope: Envelope) -> Result<PublishReport, BroadcastError> {
        let topic = envelope.topic;
        let mut lane = self.lanes[topic.index()].lock();

        if let Some(last) = lane.last_timestamp {
            if envelope.timestamp < last {
                envelope.timestamp = last;
            }
        }
        let frame: Arc<str> = Arc::from(envelope.to_json()?);

        let subscribers = self.registry.subscribers(topic);
        let mut report = PublishReport {
            recipients: subscribers.len(),
            overflowed: Vec::new(),
        };
        for connection in subscribers {
            match connection.send(Arc::clone(&frame)) {
                Enqueue::Queued => {}
                Enqueue::DroppedOldest => {
                    let overflow = BroadcastError::QueueOverflow {
                        connection: connection.id(),
                        dropped: connection.dropped_messages(),
                    };
                    warn!("[conn {}] {}", connection.id(), overflow);
                    report.overflowed.push(overflow);
                }
                Enqueue::Closed => {
                    debug!("[conn {}] skipped: closing", connection.id());
                    report.recipients -= 1;
                }
            }
        }

        lane.last_timestamp = Some(envelope.timestamp);
        lane.published += 1;
        debug!(
            "published {} on {} to {} subscriber(s)",
            envelope.kind, topic, report.recipients
        );
        Ok(report)
    }

    /// Number of envelopes published on `topic` since startup.
    pub fn published(&self, topic: Topic) -> u64 {
        self.lanes[topic.index()].lock().published
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::connection::Connection;
    use crate::broadcast::envelope::{EnvelopeBuilder, EventKind};
    use chrono::Duration;
    use serde_json::{json, Value};

    fn setup() -> (Arc<ConnectionRegistry>, TopicRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = TopicRouter::new(Arc::clone(&registry));
        (registry, router)
    }

    fn connect(registry: &ConnectionRegistry, capacity: usize, topics: &[&str]) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(None, capacity));
        let id = registry.register(Arc::clone(&conn));
        registry.subscribe(id, topics).unwrap();
        conn
    }

    async fn drain(conn: &Connection) -> Vec<Value> {
        let mut out = Vec::new();
        while conn.pending_messages() > 0 {
            let frame = conn.next_frame().await.unwrap();
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn delivers_only_to_topic_subscribers() {
        let (registry, router) = setup();
        let sessions = connect(&registry, 8, &["sessions"]);
        let terminal = connect(&registry, 8, &["terminal"]);

        let report = router
            .publish(EnvelopeBuilder::build(EventKind::NewSession, json!({"id": 1})))
            .unwrap();

        assert_eq!(report.recipients, 1);
        assert_eq!(drain(&sessions).await.len(), 1);
        assert!(drain(&terminal).await.is_empty());
        assert_eq!(router.published(Topic::Sessions), 1);
    }

    #[tokio::test]
    async fn preserves_publish_order_per_topic() {
        let (registry, router) = setup();
        let conn = connect(&registry, 16, &["intelligence"]);
        for n in 0..5 {
            router
                .publish(EnvelopeBuilder::build(EventKind::NewCapture, json!({ "n": n })))
                .unwrap();
        }
        let order: Vec<i64> = drain(&conn)
            .await
            .iter()
            .map(|v| v["data"]["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn clamps_timestamps_to_be_non_decreasing() {
        let (registry, router) = setup();
        let conn = connect(&registry, 8, &["stats"]);
        let now = Utc::now();
        router
            .publish(EnvelopeBuilder::build_at(EventKind::StatsUpdate, json!(1), now))
            .unwrap();
        router
            .publish(EnvelopeBuilder::build_at(
                EventKind::StatsUpdate,
                json!(2),
                now - Duration::seconds(5),
            ))
            .unwrap();
        let frames = drain(&conn).await;
        let first: DateTime<Utc> = serde_json::from_value(frames[0]["timestamp"].clone()).unwrap();
        let second: DateTime<Utc> =
            serde_json::from_value(frames[1]["timestamp"].clone()).unwrap();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let (registry, router) = setup();
        let slow = connect(&registry, 2, &["terminal"]);
        let fast = connect(&registry, 64, &["terminal"]);

        let mut overflows = 0;
        for n in 0..10 {
            let report = router
                .publish(EnvelopeBuilder::build(EventKind::TerminalLog, json!({ "n": n })))
                .unwrap();
            assert_eq!(report.recipients, 2);
            overflows += report.overflowed.len();
        }

        assert_eq!(overflows, 8);
        assert_eq!(slow.dropped_messages(), 8);
        assert_eq!(fast.dropped_messages(), 0);

        let fast_frames = drain(&fast).await;
        assert_eq!(fast_frames.len(), 10);
        let slow_frames: Vec<i64> = drain(&slow)
            .await
            .iter()
            .map(|v| v["data"]["n"].as_i64().unwrap())
            .collect();
        assert_eq!(slow_frames, vec![8, 9]);
    }

    #[tokio::test]
    async fn unsubscribed_connection_receives_nothing() {
        let (registry, router) = setup();
        let conn = connect(&registry, 8, &["intelligence"]);
        registry.unsubscribe(conn.id(), &["intelligence"]).unwrap();
        let report = router
            .publish(EnvelopeBuilder::build(EventKind::NewCapture, json!({})))
            .unwrap();
        assert_eq!(report.recipients, 0);
        assert!(drain(&conn).await.is_empty());
    }

    #[test]
    fn publish_with_no_subscribers_is_fine() {
        let (_registry, router) = setup();
        let report = router
            .publish(EnvelopeBuilder::build(EventKind::StatsUpdate, json!({})))
            .unwrap();
        assert_eq!(report, PublishReport::default());
    }
}
