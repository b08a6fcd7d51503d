//! Heartbeat supervision of dashboard connections.
//!
//! Every tick the supervisor checks whether each connection showed any
//! activity (pong, `PING`, any inbound frame) since the previous tick, then
//! asks its write loop to send a fresh protocol ping. A connection that stays
//! silent for more than `max_missed` consecutive ticks is force-unregistered,
//! which closes its queue and ends its write loop.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::connection::ConnectionId;
use super::registry::ConnectionRegistry;
use crate::error_handling::types::BroadcastError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LivenessReport {
    pub pinged: usize,
    pub evicted: Vec<ConnectionId>,
}

pub struct LivenessSupervisor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    max_missed: u32,
}

impl LivenessSupervisor {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration, max_missed: u32) -> Self {
        Self {
            registry,
            interval,
            max_missed: max_missed.max(1),
        }
    }

    /// One heartbeat round.
    pub fn sweep(&self) -> LivenessReport {
        let mut report = LivenessReport::default();
        for connection in self.registry.all() {
            if connection.take_alive() {
                connection.reset_missed_heartbeats();
            } else {
                let missed = connection.record_missed_heartbeat();
                if missed > self.max_missed {
                    let err = BroadcastError::HeartbeatTimeout(connection.id());
                    warn!("[conn {}] {} after {} missed heartbeat(s)", connection.id(), err, missed);
                    self.registry.unregister(connection.id());
                    report.evicted.push(connection.id());
                    continue;
                }
                debug!("[conn {}] missed heartbeat {}/{}", connection.id(), missed, self.max_missed);
            }
            connection.request_ping();
            report.pinged += 1;
        }
        report
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "liveness supervisor started (interval {:?}, retry budget {})",
            self.interval, self.max_missed
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so new connections get a full window.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep();
                    if !report.evicted.is_empty() {
                        info!("evicted {} dead connection(s)", report.evicted.len());
                    }
                }
                _ = cancel.cancelled() => {
                    info!("liveness supervisor stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::connection::Connection;

    fn setup(max_missed: u32) -> (Arc<ConnectionRegistry>, LivenessSupervisor) {
        let registry = Arc::new(ConnectionRegistry::new());
        let supervisor =
            LivenessSupervisor::new(Arc::clone(&registry), Duration::from_millis(10), max_missed);
        (registry, supervisor)
    }

    #[test]
    fn silent_connection_is_evicted_after_retry_budget() {
        let (registry, supervisor) = setup(2);
        let conn = Arc::new(Connection::new(None, 4));
        let id = registry.register(Arc::clone(&conn));

        // Fresh connections start alive.
        assert_eq!(supervisor.sweep().pinged, 1);
        assert!(supervisor.sweep().evicted.is_empty());
        assert!(supervisor.sweep().evicted.is_empty());
        let report = supervisor.sweep();

        assert_eq!(report.evicted, vec![id]);
        assert!(registry.get(id).is_none());
        assert!(conn.is_closed());
    }

    #[test]
    fn responsive_connection_survives() {
        let (registry, supervisor) = setup(1);
        let conn = Arc::new(Connection::new(None, 4));
        let id = registry.register(Arc::clone(&conn));
        for _ in 0..10 {
            let report = supervisor.sweep();
            assert!(report.evicted.is_empty());
            conn.mark_alive();
        }
        assert!(registry.get(id).is_some());
        assert_eq!(conn.missed_heartbeats(), 0);
    }

    #[test]
    fn one_dead_connection_does_not_touch_others() {
        let (registry, supervisor) = setup(1);
        let dead = Arc::new(Connection::new(None, 4));
        let live = Arc::new(Connection::new(None, 4));
        registry.register(Arc::clone(&dead));
        let live_id = registry.register(Arc::clone(&live));

        for _ in 0..3 {
            supervisor.sweep();
            live.mark_alive();
        }

        assert!(dead.is_closed());
        assert!(!live.is_closed());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(live_id).is_some());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (_registry, supervisor) = setup(1);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { supervisor.run(cancel).await })
        };
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor stopped")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_evicts_on_its_own() {
        let (registry, supervisor) = setup(1);
        let conn = Arc::new(Connection::new(None, 4));
        registry.register(Arc::clone(&conn));
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { supervisor.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(conn.is_closed());
        assert!(registry.is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }
}
