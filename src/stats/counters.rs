//! Aggregate counters maintained incrementally by the session manager.
//!
//! Every mutation is O(1) amortized. Reading a snapshot only advances the
//! capture window and copies a handful of numbers, so a stats tick never
//! scans sessions or captures.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;

use super::snapshot::{DailyCount, StatsSnapshot};
use super::StatsSource;
use crate::error_handling::types::StatsError;
use crate::session_management::{InterceptionSession, SessionState};

const WEEK_DAYS: i64 = 7;

struct CounterState {
    pending: u64,
    active: u64,
    total_sessions: u64,
    total_captures: u64,
    /// (minute since epoch, captures in that minute), oldest first.
    capture_buckets: VecDeque<(i64, u64)>,
    captures_in_window: u64,
    sessions_per_day: BTreeMap<NaiveDate, u64>,
}

pub struct AggregateCounters {
    window_minutes: i64,
    state: Mutex<CounterState>,
}

fn minute_of(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

impl CounterState {
    fn expire(&mut self, now_minute: i64, window_minutes: i64) {
        let oldest_kept = now_minute - window_minutes + 1;
        while let Some(&(minute, count)) = self.capture_buckets.front() {
            if minute >= oldest_kept {
                break;
            }
            self.captures_in_window -= count;
            self.capture_buckets.pop_front();
        }
    }

    fn leave(&mut self, state: SessionState) {
        match state {
            SessionState::Pending => self.pending = self.pending.saturating_sub(1),
            SessionState::Active => self.active = self.active.saturating_sub(1),
            SessionState::Closed => {}
        }
    }

    fn enter(&mut self, state: SessionState) {
        match state {
            SessionState::Pending => self.pending += 1,
            SessionState::Active => self.active += 1,
            SessionState::Closed => {}
        }
    }
}

impl AggregateCounters {
    pub fn new(capture_window_minutes: u64) -> Self {
        Self {
            window_minutes: capture_window_minutes.max(1) as i64,
            state: Mutex::new(CounterState {
                pending: 0,
                active: 0,
                total_sessions: 0,
                total_captures: 0,
                capture_buckets: VecDeque::new(),
                captures_in_window: 0,
                sessions_per_day: BTreeMap::new(),
            }),
        }
    }

    pub fn window_minutes(&self) -> u64 {
        self.window_minutes as u64
    }

    pub fn session_created(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.pending += 1;
        state.total_sessions += 1;
        *state.sessions_per_day.entry(at.date_naive()).or_insert(0) += 1;
    }

    pub fn session_transitioned(&self, from: SessionState, to: SessionState) {
        if from == to {
            return;
        }
        let mut state = self.state.lock();
        state.leave(from);
        state.enter(to);
    }

    pub fn capture_recorded(&self, at: DateTime<Utc>) {
        let minute = minute_of(at);
        let mut state = self.state.lock();
        state.total_captures += 1;
        // Late captures land in the newest bucket rather than reordering.
        let joins_newest =
            matches!(state.capture_buckets.back(), Some(&(last, _)) if last >= minute);
        if joins_newest {
            if let Some(newest) = state.capture_buckets.back_mut() {
                newest.1 += 1;
            }
        } else {
            state.capture_buckets.push_back((minute, 1));
        }
        state.captures_in_window += 1;
    }

    /// Rebuilds session totals from persisted sessions at startup.
    ///
    /// Only lifetime totals, open-state counts and per-day counts can be
    /// recovered; the capture window starts empty.
    pub fn seed<'a>(&self, sessions: impl IntoIterator<Item = &'a InterceptionSession>) {
        let mut state = self.state.lock();
        for session in sessions {
            state.total_sessions += 1;
            state.total_captures += session.capture_count;
            state.enter(session.state);
            *state
                .sessions_per_day
                .entry(session.created_at.date_naive())
                .or_insert(0) += 1;
        }
    }

    pub fn open_sessions(&self) -> u64 {
        let state = self.state.lock();
        state.pending + state.active
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let mut state = self.state.lock();
        state.expire(minute_of(now), self.window_minutes);

        let today = now.date_naive();
        let first_day = today - Duration::days(WEEK_DAYS - 1);
        state.sessions_per_day.retain(|day, _| *day >= first_day);
        let weekly_interceptions = (0..WEEK_DAYS)
            .map(|offset| {
                let date = first_day + Duration::days(offset);
                DailyCount {
                    date,
                    sessions: state.sessions_per_day.get(&date).copied().unwrap_or(0),
                }
            })
            .collect();

        StatsSnapshot {
            active_sessions: state.active,
            pending_sessions: state.pending,
            total_sessions: state.total_sessions,
            total_captures: state.total_captures,
            captures_in_window: state.captures_in_window,
            capture_window_minutes: self.window_minutes as u64,
            weekly_interceptions,
            generated_at: now,
        }
    }
}

impl StatsSource for AggregateCounters {
    fn snapshot(&self, now: DateTime<Utc>) -> Result<StatsSnapshot, StatsError> {
        Ok(self.snapshot_at(now))
    }
}
