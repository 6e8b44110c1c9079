//! Daemon configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! the `BEACON_BIND` environment variable, then CLI overrides applied by the
//! binary. Every field may be omitted from the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::DEFAULT_MAX_CONNECTIONS;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "BEACON_CONFIG";

/// Environment variable overriding the listen address.
pub const BIND_ENV: &str = "BEACON_BIND";

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid bind address {value:?}: {error}")]
    InvalidBindAddr { value: String, error: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

/// Tunables for the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub bind_addr: SocketAddr,
    pub sweep_interval_secs: u64,
    pub notification_interval_secs: u64,
    pub drain_poll_interval_ms: u64,
    pub drain_wait_budget_secs: u64,
    /// Polls between shutdown notices
    pub drain_notice_every: u32,
    pub force_signal_threshold: u32,
    pub message_preview_len: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            sweep_interval_secs: 30,
            notification_interval_secs: 10,
            drain_poll_interval_ms: 1000,
            drain_wait_budget_secs: 30,
            drain_notice_every: 10,
            force_signal_threshold: 3,
            message_preview_len: 50,
            read_timeout_secs: 300,
            write_timeout_secs: 10,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl DaemonConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Loads defaults, then `path` (or `$BEACON_CONFIG`), then `$BEACON_BIND`.
    ///
    /// The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.or(env_path.as_deref()) {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        if let Ok(bind) = std::env::var(BIND_ENV) {
            config.set_bind_addr(&bind)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Overrides the listen address from a string.
    pub fn set_bind_addr(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.bind_addr = raw.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::InvalidBindAddr {
                value: raw.to_string(),
                error: e.to_string(),
            }
        })?;
        Ok(())
    }

    /// Rejects zero intervals, timeouts, cadence, capacity and threshold.
    ///
    /// A zero drain budget is allowed and means "force-close on first poll".
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 8] = [
            ("sweep_interval_secs", self.sweep_interval_secs == 0),
            ("notification_interval_secs", self.notification_interval_secs == 0),
            ("drain_poll_interval_ms", self.drain_poll_interval_ms == 0),
            ("drain_notice_every", self.drain_notice_every == 0),
            ("force_signal_threshold", self.force_signal_threshold == 0),
            ("read_timeout_secs", self.read_timeout_secs == 0),
            ("write_timeout_secs", self.write_timeout_secs == 0),
            ("max_connections", self.max_connections == 0),
        ];

        match checks.iter().find(|(_, bad)| *bad) {
            Some(&(field, _)) => Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn notification_interval(&self) -> Duration {
        Duration::from_secs(self.notification_interval_secs)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn drain_wait_budget(&self) -> Duration {
        Duration::from_secs(self.drain_wait_budget_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}
