//! Daemon configuration.
//!
//! Read from a TOML file whose path is the first command-line argument or
//! `RELAYHUB_CONFIG`. Every field is optional; missing ones take defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use relayhub::{HubConfig, OverflowPolicy};
use relayhub_server::{ServerConfig, WS_MAX_MESSAGE_SIZE};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "RELAYHUB_CONFIG";

/// What to do with a client whose outbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowSetting {
    Evict,
    DropNewest,
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Largest accepted WebSocket message, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Frames queued per client before the overflow policy applies.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    #[serde(default = "default_overflow")]
    pub overflow_policy: OverflowSetting,

    /// Deliver broadcasts back to the client that sent them.
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,

    /// Seconds between keepalive probes.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Seconds of silence before a peer is declared dead.
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,

    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Seconds between hub statistics log lines (0 = off).
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_bind() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

fn default_max_message_size() -> usize {
    WS_MAX_MESSAGE_SIZE
}

fn default_outbox_capacity() -> usize {
    relayhub::OUTBOX_CAPACITY
}

fn default_overflow() -> OverflowSetting {
    OverflowSetting::Evict
}

fn default_true() -> bool {
    true
}

fn default_keepalive_secs() -> u64 {
    relayhub::KEEPALIVE_PERIOD.as_secs()
}

fn default_pong_wait_secs() -> u64 {
    relayhub::PONG_WAIT.as_secs()
}

fn default_write_timeout_secs() -> u64 {
    relayhub::WRITE_TIMEOUT.as_secs()
}

fn default_drain_timeout_secs() -> u64 {
    relayhub::DRAIN_TIMEOUT.as_secs()
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_message_size: default_max_message_size(),
            outbox_capacity: default_outbox_capacity(),
            overflow_policy: default_overflow(),
            echo_to_sender: default_true(),
            keepalive_secs: default_keepalive_secs(),
            pong_wait_secs: default_pong_wait_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Config {
    /// Loads the configuration file, or returns defaults if there is none.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::debug!(path = %path.display(), "configuration loaded");
                Ok(config)
            }
            Some(path) => {
                tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbox_capacity: self.outbox_capacity,
            keepalive_period: Duration::from_secs(self.keepalive_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            echo_to_sender: self.echo_to_sender,
            overflow_policy: match self.overflow_policy {
                OverflowSetting::Evict => OverflowPolicy::Evict,
                OverflowSetting::DropNewest => OverflowPolicy::DropNewest,
            },
            ..HubConfig::default()
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            max_message_size: self.max_message_size,
        }
    }
}

/// Resolves the configuration path from the command line or environment.
pub fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.overflow_policy, OverflowSetting::Evict);
        assert!(config.echo_to_sender);
        assert_eq!(config.keepalive_secs, 25);
        assert_eq!(config.pong_wait_secs, 60);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            bind = "127.0.0.1:9000"
            overflow_policy = "drop_newest"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.overflow_policy, OverflowSetting::DropNewest);
        assert_eq!(config.outbox_capacity, 256);
        assert!(config.echo_to_sender);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            outbox_capacity: 8,
            echo_to_sender: false,
            stats_interval_secs: 0,
            ..Config::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.outbox_capacity, 8);
        assert!(!parsed.echo_to_sender);
        assert_eq!(parsed.stats_interval_secs, 0);
    }

    #[test]
    fn hub_config_conversion() {
        let config = Config {
            keepalive_secs: 5,
            pong_wait_secs: 15,
            overflow_policy: OverflowSetting::DropNewest,
            ..Config::default()
        };
        let hub = config.hub_config();
        assert_eq!(hub.keepalive_period, Duration::from_secs(5));
        assert_eq!(hub.pong_wait, Duration::from_secs(15));
        assert_eq!(hub.overflow_policy, OverflowPolicy::DropNewest);
    }

    #[test]
    fn load_from_file_and_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relayhub.toml");
        std::fs::write(&path, "outbox_capacity = 32\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.outbox_capacity, 32);

        let missing = tmp.path().join("absent.toml");
        let config = Config::load(Some(&missing)).unwrap();
        assert_eq!(config.outbox_capacity, 256);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "outbox_capacity = \"lots\"\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
