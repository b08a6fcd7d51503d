//! Builders for `SessionFilter` values.
//!
//! Each builder takes an optional criterion so request parameters can be
//! chained straight in; `None` leaves the criterion unset.

use chrono::{DateTime, Utc};

pub use crate::storage::types::SessionFilter;
use crate::session_management::SessionState;

impl SessionFilter {
    pub fn in_state(mut self, state: Option<SessionState>) -> Self {
        self.state = state;
        self
    }

    pub fn for_scammer(mut self, scammer_ref: Option<String>) -> Self {
        self.scammer_ref = scammer_ref;
        self
    }

    /// Sessions created in `[from, to]`; either bound may be open.
    pub fn created_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = from;
        self.created_before = to;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::InterceptionSession;
    use chrono::Duration;

    fn session(state: SessionState, scammer: Option<&str>, age_mins: i64) -> InterceptionSession {
        let mut s = InterceptionSession::new(
            scammer.map(String::from),
            Utc::now() - Duration::minutes(age_mins),
        );
        s.state = state;
        s
    }

    #[test]
    fn default_filter_matches_everything() {
        let filter = SessionFilter::default();
        assert!(filter.matches(&session(SessionState::Closed, None, 5)));
    }

    #[test]
    fn criteria_combine() {
        let filter = SessionFilter::default()
            .in_state(Some(SessionState::Active))
            .for_scammer(Some("+919876543210".into()));
        assert!(filter.matches(&session(SessionState::Active, Some("+919876543210"), 1)));
        assert!(!filter.matches(&session(SessionState::Pending, Some("+919876543210"), 1)));
        assert!(!filter.matches(&session(SessionState::Active, None, 1)));
    }

    #[test]
    fn apply_sorts_newest_first_and_limits() {
        let sessions = vec![
            session(SessionState::Active, None, 30),
            session(SessionState::Active, None, 1),
            session(SessionState::Active, None, 10),
        ];
        let newest = sessions[1].id;
        let out = SessionFilter::default()
            .in_state(Some(SessionState::Active))
            .with_limit(Some(2))
            .apply(sessions);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, newest);
        assert!(out[0].created_at >= out[1].created_at);
    }

    #[test]
    fn created_between_is_inclusive_window() {
        let now = Utc::now();
        let from = Some(now - Duration::minutes(15));
        let filter = SessionFilter::default().created_between(from, Some(now));
        assert!(filter.matches(&session(SessionState::Pending, None, 10)));
        assert!(!filter.matches(&session(SessionState::Pending, None, 20)));

        let open_ended = SessionFilter::default().created_between(from, None);
        assert!(open_ended.matches(&session(SessionState::Pending, None, -5)));
    }
}
