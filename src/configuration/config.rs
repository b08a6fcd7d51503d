use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::session_management::SessionSettings;
use clap::Parser;
use log::debug;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

const STATS_INTERVAL_RANGE: RangeInclusive<u64> = 30..=300;

const DAY_SECS: u64 = 86_400;
const MAX_SESSION_SECS: u64 = 30 * DAY_SECS;
const MAX_RETENTION_DAYS: u64 = 3_650;
const MAX_HEARTBEAT_SECS: u64 = 3_600;
const MAX_SEND_TIMEOUT_MS: u64 = 60_000;
const MAX_CAPTURE_WINDOW_MINUTES: u64 = 1_440;
const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Upper bounds checked by [`Config::validate`], as (field, value, max).
fn upper_bounds(config: &Config) -> [(&'static str, u64, u64); 8] {
    let (sessions, broadcast) = (&config.sessions, &config.broadcast);
    [
        ("sessions.inactivity_timeout_secs", sessions.inactivity_timeout_secs, MAX_SESSION_SECS),
        ("sessions.closed_retention_secs", sessions.closed_retention_secs, MAX_SESSION_SECS),
        ("sessions.sweep_interval_secs", sessions.sweep_interval_secs, DAY_SECS),
        ("storage.retention_days", config.storage.retention_days, MAX_RETENTION_DAYS),
        ("liveness.heartbeat_interval_secs", config.liveness.heartbeat_interval_secs, MAX_HEARTBEAT_SECS),
        ("broadcast.send_timeout_ms", broadcast.send_timeout_ms, MAX_SEND_TIMEOUT_MS),
        ("stats.capture_window_minutes", config.stats.capture_window_minutes, MAX_CAPTURE_WINDOW_MINUTES),
        ("broadcast.queue_capacity", broadcast.queue_capacity as u64, MAX_QUEUE_CAPACITY as u64),
    ]
}

/// Command-line arguments.
///
/// Every argument can also come from a `SNARE_*` environment variable; the
/// values given here override the ones read from the configuration file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "snare")]
#[command(version)]
#[command(about = "Real-time relay for decoy engagement telemetry")]
pub struct CliArgs {
    /// Path of the TOML configuration file. Defaults apply when omitted.
    #[arg(env = "SNARE_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// IP address the HTTP/WebSocket server binds to
    ///
    /// # Command Line
    /// Use `--bind-address <ADDRESS>` or `SNARE_BIND_ADDRESS`
    #[arg(long, env = "SNARE_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Port of the HTTP/WebSocket server
    #[arg(long, env = "SNARE_PORT")]
    pub port: Option<u16>,

    /// Storage directory (file backend) or SQLite file (database backend)
    #[arg(long, env = "SNARE_STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Shared secret required on write routes
    #[arg(long, env = "SNARE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// Application configuration.
///
/// Loaded from a TOML file where every section and field is optional:
///
/// ```toml
/// [server]
/// bind_address = "0.0.0.0"
/// port = 8080
///
/// [stats]
/// interval_secs = 60
///
/// [storage]
/// backend = "database"
/// path = "/var/lib/snare/snare.db"
/// ```
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub broadcast: BroadcastConfig,
    pub liveness: LivenessConfig,
    pub stats: StatsConfig,
    pub sessions: SessionsConfig,
    pub storage: StorageConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Builds the effective configuration: file (if any), then CLI and
    /// environment overrides, then validation.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(address) = &args.bind_address {
            self.server.bind_address = address.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(path) = &args.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(key) = &args.api_key {
            self.server.api_key = Some(key.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;
        if matches!(&self.server.api_key, Some(key) if key.is_empty()) {
            return Err(ConfigError::MissingValue("server.api_key is empty".into()));
        }
        if self.broadcast.queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "broadcast.queue_capacity must be at least 1".into(),
            ));
        }
        if self.broadcast.send_timeout_ms == 0 {
            return Err(ConfigError::NotInRange(
                "broadcast.send_timeout_ms must be at least 1".into(),
            ));
        }
        if self.liveness.heartbeat_interval_secs == 0 || self.liveness.max_missed_heartbeats == 0 {
            return Err(ConfigError::NotInRange(
                "liveness interval and retry budget must be at least 1".into(),
            ));
        }
        if !STATS_INTERVAL_RANGE.contains(&self.stats.interval_secs) {
            return Err(ConfigError::NotInRange(format!(
                "stats.interval_secs = {} (expected {}..={})",
                self.stats.interval_secs,
                STATS_INTERVAL_RANGE.start(),
                STATS_INTERVAL_RANGE.end()
            )));
        }
        if self.stats.capture_window_minutes == 0 {
            return Err(ConfigError::NotInRange(
                "stats.capture_window_minutes must be at least 1".into(),
            ));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(ConfigError::NotInRange(
                "sessions.sweep_interval_secs must be at least 1".into(),
            ));
        }
        if self.storage.backend != StorageBackend::Memory && self.storage.path.is_none() {
            return Err(ConfigError::MissingValue(format!(
                "storage.path is required for the {:?} backend",
                self.storage.backend
            )));
        }
        for (field, value, max) in upper_bounds(self) {
            if value > max {
                return Err(ConfigError::NotInRange(format!(
                    "{} = {} (at most {})",
                    field, value, max
                )));
            }
        }
        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BadIPFormatting(self.server.bind_address.clone()))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.server.port))
    }

    /// Durations that do not fit a `chrono::Duration` are treated as
    /// unset. [`Config::validate`] keeps them far below that point.
    pub fn session_settings(&self) -> SessionSettings {
        let timeout = self.sessions.inactivity_timeout_secs;
        SessionSettings {
            max_open_sessions: self.sessions.max_open_sessions,
            inactivity_timeout: (timeout > 0).then(|| seconds(timeout)).flatten(),
            closed_retention: seconds(self.sessions.closed_retention_secs)
                .unwrap_or_else(|| SessionSettings::default().closed_retention),
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats.interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.heartbeat_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast.send_timeout_ms)
    }

    /// `None` when storage retention is disabled.
    pub fn storage_retention(&self) -> Option<chrono::Duration> {
        let days = self.storage.retention_days;
        if days == 0 {
            return None;
        }
        i64::try_from(days).ok().and_then(chrono::Duration::try_days)
    }
}

fn seconds(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}
