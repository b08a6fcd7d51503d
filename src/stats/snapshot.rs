use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub sessions: u64,
}

/// Point-in-time rollup broadcast wholesale on every stats tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_sessions: u64,
    pub pending_sessions: u64,
    pub total_sessions: u64,
    pub total_captures: u64,
    pub captures_in_window: u64,
    pub capture_window_minutes: u64,
    /// Sessions created per day over the last seven days, oldest first.
    pub weekly_interceptions: Vec<DailyCount>,
    pub generated_at: DateTime<Utc>,
}
