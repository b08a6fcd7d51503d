use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::session_management::{InterceptionSession, IntelligenceCapture, LogLevel};

/// API error payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateSessionRequest {
    pub scammer_ref: Option<String>,
}

/// Body of `POST /api/sessions/:id/messages`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MessageRequest {
    /// Message text, scanned for identifiers.
    pub text: String,
    /// Activate a PENDING session on this message. When false the session
    /// must already be ACTIVE.
    pub auto_activate: bool,
}

impl Default for MessageRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            auto_activate: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub session: InterceptionSession,
    pub captures: Vec<IntelligenceCapture>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CloseRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TerminalRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default = "default_level")]
    pub level: LogLevel,
    pub message: String,
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

/// Body of `POST /api/events`: an event named by an external producer.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub recipients: usize,
    pub overflowed: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionsQuery {
    pub state: Option<String>,
    pub scammer_ref: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TerminalQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub resident_sessions: usize,
    pub uptime_secs: u64,
}
