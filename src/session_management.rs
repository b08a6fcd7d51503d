//! Session management core module.
//!
//! Owns the lifecycle of interception sessions and the intelligence captured
//! within them. The [`session_manager::SessionManager`] validates and commits
//! every transition, then hands back the resulting domain event; the
//! [`dispatcher`] turns those events into broadcast envelopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Intelligence records extracted from a session.
pub mod capture;
/// Domain event dispatch and the service facade used by the web layer.
pub mod dispatcher;
/// Domain events and terminal log lines.
pub mod events;
/// Regex based extraction of identifiers from scammer messages.
pub mod extractor;
/// Session data structure.
pub mod session;
/// Session state machine.
pub mod session_manager;

pub use capture::{CaptureDraft, CaptureKind, IntelligenceCapture};
pub use dispatcher::{EventDispatcher, IngestOutcome, InterceptionService};
pub use events::{DomainEvent, LogLevel, TerminalLine};
pub use extractor::IntelligenceExtractor;
pub use session::InterceptionSession;
pub use session_manager::{SessionManager, SessionSettings, SweepReport, Transition};

/// Lifecycle state of an interception session.
///
/// `Pending -> Active -> Closed`, with `Pending -> Closed` also allowed.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    Active,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "PENDING",
            SessionState::Active => "ACTIVE",
            SessionState::Closed => "CLOSED",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    /// Case-insensitive, so query strings like `?state=active` work.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(SessionState::Pending),
            "ACTIVE" => Ok(SessionState::Active),
            "CLOSED" => Ok(SessionState::Closed),
            _ => Err(format!("unknown session state '{}'", s)),
        }
    }
}
