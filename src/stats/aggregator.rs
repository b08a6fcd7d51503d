use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::cache::{StatsCache, SNAPSHOT_KEY};
use super::snapshot::StatsSnapshot;
use super::StatsSource;
use crate::broadcast::{BroadcastHub, EventKind};
use crate::error_handling::types::StatsError;

/// Requests an early recomputation. Pokes that arrive while a tick is
/// pending coalesce into one.
#[derive(Clone, Default)]
pub struct StatsTrigger(Arc<Notify>);

impl StatsTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poke(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn fired(&self) {
        self.0.notified().await
    }
}

pub struct StatsAggregator {
    source: Arc<dyn StatsSource>,
    cache: Arc<dyn StatsCache>,
    hub: BroadcastHub,
    interval: Duration,
    cache_ttl: Duration,
    trigger: StatsTrigger,
}

impl StatsAggregator {
    pub fn new(
        source: Arc<dyn StatsSource>,
        cache: Arc<dyn StatsCache>,
        hub: BroadcastHub,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            hub,
            interval,
            // A cached snapshot stays valid until the next scheduled tick.
            cache_ttl: interval,
            trigger: StatsTrigger::new(),
        }
    }

    pub fn trigger(&self) -> StatsTrigger {
        self.trigger.clone()
    }

    /// Recomputes, caches and publishes one snapshot.
    ///
    /// Nothing is published when the source or the cache fails.
    pub async fn tick(&self) -> Result<StatsSnapshot, StatsError> {
        let snapshot = self.source.snapshot(Utc::now())?;
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| StatsError::SourceUnavailable(e.to_string()))?;
        self.cache.set(SNAPSHOT_KEY, json, self.cache_ttl).await?;

        let data = serde_json::to_value(&snapshot)
            .map_err(|e| StatsError::SourceUnavailable(e.to_string()))?;
        let report = self.hub.publish_event(EventKind::StatsUpdate, data)?;
        debug!(
            "stats published to {} subscriber(s): {} active, {} captures in window",
            report.recipients, snapshot.active_sessions, snapshot.captures_in_window
        );
        Ok(snapshot)
    }

    /// Latest snapshot for readers: the cached one when present, otherwise
    /// computed on the spot (without publishing).
    pub async fn current(&self) -> Result<StatsSnapshot, StatsError> {
        match self.cache.get(SNAPSHOT_KEY).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => warn!("discarding unreadable cached stats: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!("stats cache read failed: {}", e),
        }
        self.source.snapshot(Utc::now())
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("stats aggregator started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.fired() => debug!("stats recomputation triggered by event"),
                _ = cancel.cancelled() => {
                    info!("stats aggregator stopped");
                    return;
                }
            }
            if let Err(e) = self.tick().await {
                warn!("stats tick skipped: {}", e);
            }
        }
    }
}
