//! Rolling statistics.
//!
//! The session manager keeps [`counters::AggregateCounters`] up to date as
//! transitions commit; the [`aggregator::StatsAggregator`] turns them into an
//! immutable [`snapshot::StatsSnapshot`] on a fixed interval or when poked by
//! a qualifying event, caches it and broadcasts it on the `stats` topic.

use chrono::{DateTime, Utc};

use crate::error_handling::types::StatsError;

pub mod aggregator;
pub mod cache;
pub mod counters;
pub mod snapshot;

pub use aggregator::{StatsAggregator, StatsTrigger};
pub use cache::{InMemoryStatsCache, StatsCache, SNAPSHOT_KEY};
pub use counters::AggregateCounters;
pub use snapshot::{DailyCount, StatsSnapshot};

/// Anything able to produce a point-in-time snapshot.
pub trait StatsSource: Send + Sync {
    fn snapshot(&self, now: DateTime<Utc>) -> Result<StatsSnapshot, StatsError>;
}
