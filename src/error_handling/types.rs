use std::fmt;

use uuid::Uuid;

use crate::broadcast::ConnectionId;
use crate::session_management::SessionState;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    MissingValue(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing configuration value: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Failures of the broadcast layer (registry, router, envelope builder).
///
/// Only `UnknownEventKind` and `Serialization` are programming errors; the
/// rest are recovered locally by the component that raises them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// One or more topic names outside the fixed set. Carries the rejected names.
    InvalidTopic(Vec<String>),
    UnknownEventKind(String),
    /// A kind that only a committed state transition may emit.
    ReservedEventKind(String),
    UnknownConnection(ConnectionId),
    QueueOverflow { connection: ConnectionId, dropped: u64 },
    HeartbeatTimeout(ConnectionId),
    Serialization(String),
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::InvalidTopic(names) => {
                write!(f, "Invalid topic(s): {}", names.join(", "))
            }
            BroadcastError::UnknownEventKind(kind) => write!(f, "Unknown event kind: {}", kind),
            BroadcastError::ReservedEventKind(kind) => {
                write!(f, "Event kind {} is emitted only by committed changes", kind)
            }
            BroadcastError::UnknownConnection(id) => write!(f, "Unknown connection: {}", id),
            BroadcastError::QueueOverflow { connection, dropped } => write!(
                f,
                "Outbound queue overflow on {} ({} dropped)",
                connection, dropped
            ),
            BroadcastError::HeartbeatTimeout(id) => write!(f, "Heartbeat timeout on {}", id),
            BroadcastError::Serialization(e) => write!(f, "Envelope serialization failed: {}", e),
        }
    }
}

impl std::error::Error for BroadcastError {}

#[derive(Debug)]
pub enum SessionError {
    NotFound(Uuid),
    InvalidTransition {
        session_id: Uuid,
        state: SessionState,
        action: &'static str,
    },
    SessionLimitReached,
    StorageError(StorageError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound(id) => write!(f, "Session not found: {}", id),
            SessionError::InvalidTransition {
                session_id,
                state,
                action,
            } => write!(
                f,
                "Cannot {} session {} in state {}",
                action, session_id, state
            ),
            SessionError::SessionLimitReached => write!(f, "Session limit reached"),
            SessionError::StorageError(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::StorageError(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    SourceUnavailable(String),
    CacheUnavailable(String),
    Broadcast(BroadcastError),
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::SourceUnavailable(e) => write!(f, "Aggregate source unavailable: {}", e),
            StatsError::CacheUnavailable(e) => write!(f, "Stats cache unavailable: {}", e),
            StatsError::Broadcast(e) => write!(f, "Stats publish failed: {}", e),
        }
    }
}

impl std::error::Error for StatsError {}

impl From<BroadcastError> for StatsError {
    fn from(err: BroadcastError) -> Self {
        StatsError::Broadcast(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_topic_lists_every_rejected_name() {
        let err = BroadcastError::InvalidTopic(vec!["alerts".into(), "logs".into()]);
        assert_eq!(err.to_string(), "Invalid topic(s): alerts, logs");
    }

    #[test]
    fn invalid_transition_names_action_and_state() {
        let id = Uuid::nil();
        let err = SessionError::InvalidTransition {
            session_id: id,
            state: SessionState::Closed,
            action: "record a message on",
        };
        assert_eq!(
            err.to_string(),
            format!("Cannot record a message on session {} in state CLOSED", id)
        );
    }

    #[test]
    fn storage_error_converts_into_session_error() {
        let err: SessionError = StorageError::WriteFailed.into();
        assert!(matches!(err, SessionError::StorageError(StorageError::WriteFailed)));
    }
}
