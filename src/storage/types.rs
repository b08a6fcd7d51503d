use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session_management::{InterceptionSession, SessionState};

/// Criteria for listing sessions. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFilter {
    pub state: Option<SessionState>,
    pub scammer_ref: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn matches(&self, session: &InterceptionSession) -> bool {
        if let Some(state) = self.state {
            if session.state != state {
                return false;
            }
        }
        if let Some(ref scammer) = self.scammer_ref {
            if session.scammer_ref.as_ref() != Some(scammer) {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if session.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if session.created_at > before {
                return false;
            }
        }
        true
    }

    /// Filters, sorts newest first and truncates to `limit`.
    pub fn apply(&self, sessions: Vec<InterceptionSession>) -> Vec<InterceptionSession> {
        let mut out: Vec<InterceptionSession> =
            sessions.into_iter().filter(|s| self.matches(s)).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}
