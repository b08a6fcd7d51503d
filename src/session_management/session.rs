use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SessionState;

/// One engagement with a scammer, from first contact to close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptionSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    /// Identifier of the scammer when known (phone number, handle...).
    pub scammer_ref: Option<String>,
    pub message_count: u64,
    pub capture_count: u64,
    pub last_activity_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

impl InterceptionSession {
    pub fn new(scammer_ref: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            state: SessionState::Pending,
            scammer_ref,
            message_count: 0,
            capture_count: 0,
            last_activity_at: now,
            closed_at: None,
            close_reason: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Time of the last change relevant to retention: close time for closed
    /// sessions, last activity otherwise.
    pub fn settled_at(&self) -> DateTime<Utc> {
        self.closed_at.unwrap_or(self.last_activity_at)
    }
}
