//! The uniform wire unit delivered to dashboard clients.
//!
//! Every domain event leaves the process wrapped in an [`Envelope`]:
//!
//! ```json
//! {"type":"NEW_CAPTURE","topic":"intelligence","data":{...},"timestamp":"2026-10-16T09:12:44.120Z"}
//! ```
//!
//! The event kind alone decides the topic, so a `NEW_SESSION` can never be
//! routed anywhere but `sessions`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::topic::Topic;
use crate::error_handling::types::BroadcastError;

/// Outbound event kinds, serialized as the envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    NewSession,
    NewCapture,
    TerminalLog,
    StatsUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::NewSession,
        EventKind::NewCapture,
        EventKind::TerminalLog,
        EventKind::StatsUpdate,
    ];

    /// Kinds that announce stored records. They are only ever built from
    /// a committed transition, never from a name received from outside.
    pub fn requires_commit(&self) -> bool {
        !matches!(self, EventKind::StatsUpdate)
    }

    /// The only topic this kind may be published on.
    pub fn topic(&self) -> Topic {
        match self {
            EventKind::NewSession => Topic::Sessions,
            EventKind::NewCapture => Topic::Intelligence,
            EventKind::TerminalLog => Topic::Terminal,
            EventKind::StatsUpdate => Topic::Stats,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewSession => "NEW_SESSION",
            EventKind::NewCapture => "NEW_CAPTURE",
            EventKind::TerminalLog => "TERMINAL_LOG",
            EventKind::StatsUpdate => "STATS_UPDATE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = BroadcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BroadcastError::UnknownEventKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub topic: Topic,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String, BroadcastError> {
        serde_json::to_string(self).map_err(|e| BroadcastError::Serialization(e.to_string()))
    }
}

/// Builds envelopes from event kinds and payloads.
///
/// The builder holds no state: the timestamp comes from the wall clock (or
/// the caller, for [`EnvelopeBuilder::build_at`]). Per-topic monotonicity
/// is enforced later by the router, which publishes each topic in order.
pub struct EnvelopeBuilder;

impl EnvelopeBuilder {
    pub fn build(kind: EventKind, data: Value) -> Envelope {
        Self::build_at(kind, data, Utc::now())
    }

    pub fn build_at(kind: EventKind, data: Value, timestamp: DateTime<Utc>) -> Envelope {
        Envelope {
            kind,
            topic: kind.topic(),
            data,
            timestamp,
        }
    }

    /// Builds an envelope from names received over an integration boundary.
    ///
    /// Fails with `UnknownEventKind` for kinds outside the fixed set, and with
    /// `InvalidTopic` when a topic is given that is unknown or does not match
    /// the one implied by the kind.
    pub fn build_named(
        kind: &str,
        topic: Option<&str>,
        data: Value,
    ) -> Result<Envelope, BroadcastError> {
        let kind: EventKind = kind.parse()?;
        if let Some(name) = topic {
            let requested: Topic = name.parse()?;
            if requested != kind.topic() {
                return Err(BroadcastError::InvalidTopic(vec![name.to_string()]));
            }
        }
        Ok(Self::build(kind, data))
    }
}
