use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::{BroadcastHub, LivenessSupervisor};
use crate::configuration::types::StorageConfig;
use crate::configuration::{Config, StorageBackend};
use crate::error_handling::types::*;
use crate::session_management::{
    EventDispatcher, IntelligenceExtractor, InterceptionService, SessionManager,
};
use crate::stats::{AggregateCounters, InMemoryStatsCache, StatsAggregator};
use crate::storage::database_storage::DatabaseStorage;
use crate::storage::file_storage::FileStorage;
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::Storage;
use crate::web_interface::{ApiContext, WebServer};

pub struct Controller {
    pub config: Config,
    hub: BroadcastHub,
    service: InterceptionService,
    aggregator: Arc<StatsAggregator>,
    cancel: CancellationToken,
}

impl Controller {
    /// Opens storage, restores open sessions and wires the subsystems
    /// together. Nothing is served until [`Controller::run`].
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;

        let storage = open_storage(&config.storage).await?;
        let hub = BroadcastHub::new(config.broadcast.queue_capacity);
        let counters = Arc::new(AggregateCounters::new(config.stats.capture_window_minutes));
        let aggregator = Arc::new(StatsAggregator::new(
            counters.clone(),
            Arc::new(InMemoryStatsCache::new()),
            hub.clone(),
            config.stats_interval(),
        ));

        let manager = SessionManager::new(storage, counters, config.session_settings());
        manager.restore().await.map_err(|e| {
            error!("Unable to restore sessions: {}", e);
            ControllerError::InitializationFailed(e.to_string())
        })?;

        let extractor = IntelligenceExtractor::new()
            .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?;
        let service = InterceptionService::new(
            Arc::new(manager),
            EventDispatcher::new(hub.clone(), Some(aggregator.trigger())),
            extractor,
        );

        Ok(Self {
            config,
            hub,
            service,
            aggregator,
            cancel: CancellationToken::new(),
        })
    }

    pub fn service(&self) -> &InterceptionService {
        &self.service
    }

    /// Cancelling this token has the same effect as [`Controller::shutdown`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serves until Ctrl-C or until the cancel token fires.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let addr = self.config.socket_addr()?;
        let ctx = ApiContext {
            service: self.service.clone(),
            aggregator: self.aggregator.clone(),
            api_key: self.config.server.api_key.as_deref().map(Arc::from),
            started_at: Instant::now(),
        };
        let web = WebServer::new(
            ctx,
            self.config.send_timeout(),
            self.config.server.dashboard_enabled,
        );
        let (_, server) = web.bind(addr, self.cancel.clone())?;

        let mut tasks: Vec<JoinHandle<()>> = vec![tokio::spawn(server)];

        let aggregator = self.aggregator.clone();
        let token = self.cancel.clone();
        tasks.push(tokio::spawn(async move { aggregator.run(token).await }));

        let liveness = LivenessSupervisor::new(
            self.hub.registry().clone(),
            self.config.heartbeat_interval(),
            self.config.liveness.max_missed_heartbeats,
        );
        let token = self.cancel.clone();
        tasks.push(tokio::spawn(async move { liveness.run(token).await }));

        tasks.push(tokio::spawn(reap(
            self.service.clone(),
            self.config.sweep_interval(),
            self.config.storage_retention(),
            self.cancel.clone(),
        )));

        info!("snare is running");
        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(e) => error!("Unable to listen for interrupt: {}", e),
            },
            _ = self.cancel.cancelled() => info!("Shutdown requested"),
        }
        self.shutdown();

        for task in tasks {
            if let Err(e) = task.await {
                warn!("background task ended abnormally: {}", e);
            }
        }
        info!("snare stopped");
        Ok(())
    }

    /// Stops every loop and closes all dashboard connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let closed = self.hub.shutdown();
        debug!("closed {} dashboard connection(s)", closed);
    }
}

async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, ControllerError> {
    let storage: Arc<dyn Storage> = match (&config.backend, &config.path) {
        (StorageBackend::Memory, _) => Arc::new(MemoryStorage::with_terminal_capacity(
            config.terminal_capacity,
        )),
        (StorageBackend::File, Some(path)) => Arc::new(
            FileStorage::with_terminal_capacity(path, config.terminal_capacity).await?,
        ),
        (StorageBackend::Database, Some(path)) => Arc::new(DatabaseStorage::new_file(path).await?),
        (backend, None) => {
            return Err(ControllerError::ConfigurationError(ConfigError::MissingValue(
                format!("storage.path is required for the {:?} backend", backend),
            )))
        }
    };
    info!("Using {:?} storage", config.backend);
    Ok(storage)
}

/// Closes idle sessions, evicts settled ones from memory and, when a
/// retention is configured, purges old closed sessions from storage.
async fn reap(
    service: InterceptionService,
    interval: Duration,
    retention: Option<chrono::Duration>,
    cancel: CancellationToken,
) {
    info!("session reaper started (interval {:?})", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => {
                info!("session reaper stopped");
                return;
            }
        }
        let now = Utc::now();
        let report = service.sweep(now).await;
        if !report.events.is_empty() || report.evicted > 0 {
            info!(
                "reaper closed {} idle session(s), evicted {} from memory",
                report.events.len(),
                report.evicted
            );
        }
        let Some(retention) = retention else { continue };
        let Some(cutoff) = purge_cutoff(now, retention) else {
            warn!(
                "retention of {} days reaches past the calendar, skipping purge",
                retention.num_days()
            );
            continue;
        };
        match service.manager().purge(cutoff).await {
            Ok(0) => {}
            Ok(n) => info!("purged {} closed session(s) past retention", n),
            Err(e) => warn!("storage purge failed: {}", e),
        }
    }
}

fn purge_cutoff(now: DateTime<Utc>, retention: chrono::Duration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(retention)
}
