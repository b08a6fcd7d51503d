use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// HTTP and WebSocket listener.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// When set, every write route requires a matching `x-api-key` header.
    pub api_key: Option<String>,
    pub dashboard_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("127.0.0.1"),
            port: 8080,
            api_key: None,
            dashboard_enabled: true,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Outbound frames buffered per connection before the oldest is dropped.
    pub queue_capacity: usize,
    /// Longest a single WebSocket write may take before the connection is
    /// considered dead.
    pub send_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            send_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub heartbeat_interval_secs: u64,
    /// Consecutive silent heartbeat rounds tolerated before eviction.
    pub max_missed_heartbeats: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            max_missed_heartbeats: 2,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Between 30 and 300 seconds.
    pub interval_secs: u64,
    pub capture_window_minutes: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            capture_window_minutes: 15,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// 0 means unlimited.
    pub max_open_sessions: usize,
    /// 0 means sessions are never closed for inactivity.
    pub inactivity_timeout_secs: u64,
    pub closed_retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_open_sessions: 0,
            inactivity_timeout_secs: 1_800,
            closed_retention_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Database,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for `file`, SQLite file for `database`.
    pub path: Option<PathBuf>,
    /// Closed sessions older than this are purged from storage. 0 keeps
    /// everything.
    pub retention_days: u64,
    /// Terminal lines kept by the `memory` backend.
    pub terminal_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            retention_days: 0,
            terminal_capacity: 10_000,
        }
    }
}
