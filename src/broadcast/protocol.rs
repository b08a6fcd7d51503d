//! Control messages exchanged over a dashboard connection.
//!
//! Envelopes are the data plane; these are the control plane. Topic names
//! stay plain strings on the way in so that one unknown name does not make
//! the whole request unparseable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::topic::Topic;
use crate::error_handling::types::BroadcastError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Ping,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Replies the server sends in response to client control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    Pong { timestamp: DateTime<Utc> },
    Subscribed { topics: Vec<Topic> },
    Unsubscribed { topics: Vec<Topic> },
    Error { code: String, message: String },
}

impl ControlReply {
    pub fn pong() -> Self {
        ControlReply::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ControlReply::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn from_broadcast_error(err: &BroadcastError) -> Self {
        let code = match err {
            BroadcastError::InvalidTopic(_) => "INVALID_TOPIC",
            BroadcastError::UnknownEventKind(_) => "UNKNOWN_EVENT_KIND",
            BroadcastError::ReservedEventKind(_) => "RESERVED_EVENT_KIND",
            BroadcastError::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            BroadcastError::QueueOverflow { .. } => "QUEUE_OVERFLOW",
            BroadcastError::HeartbeatTimeout(_) => "HEARTBEAT_TIMEOUT",
            BroadcastError::Serialization(_) => "SERIALIZATION",
        };
        Self::error(code, err.to_string())
    }

    pub fn to_json(&self) -> Result<String, BroadcastError> {
        serde_json::to_string(self).map_err(|e| BroadcastError::Serialization(e.to_string()))
    }
}
