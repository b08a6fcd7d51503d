use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::capture::IntelligenceCapture;
use super::session::InterceptionSession;
use crate::broadcast::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "success" => Ok(LogLevel::Success),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// A terminal-style line shown in the dashboard's live console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalLine {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

impl TerminalLine {
    pub fn new(
        session_id: Option<Uuid>,
        level: LogLevel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            level,
            message: message.into(),
            logged_at: now,
        }
    }
}

/// Something that happened after a committed state change.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    SessionCreated(InterceptionSession),
    CaptureRecorded(IntelligenceCapture),
    TerminalLogged(TerminalLine),
    SessionClosed(InterceptionSession),
}

impl DomainEvent {
    /// Envelope kind for events that reach dashboard clients.
    ///
    /// Session closes are not broadcast on their own; they only feed stats.
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            DomainEvent::SessionCreated(_) => Some(EventKind::NewSession),
            DomainEvent::CaptureRecorded(_) => Some(EventKind::NewCapture),
            DomainEvent::TerminalLogged(_) => Some(EventKind::TerminalLog),
            DomainEvent::SessionClosed(_) => None,
        }
    }

    /// Whether the event should trigger an early stats recomputation.
    pub fn affects_stats(&self) -> bool {
        matches!(
            self,
            DomainEvent::SessionCreated(_) | DomainEvent::SessionClosed(_)
        )
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            DomainEvent::SessionCreated(session) | DomainEvent::SessionClosed(session) => {
                serde_json::to_value(session)
            }
            DomainEvent::CaptureRecorded(capture) => serde_json::to_value(capture),
            DomainEvent::TerminalLogged(line) => serde_json::to_value(line),
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::SessionCreated(session) | DomainEvent::SessionClosed(session) => {
                Some(session.id)
            }
            DomainEvent::CaptureRecorded(capture) => Some(capture.session_id),
            DomainEvent::TerminalLogged(line) => line.session_id,
        }
    }
}
