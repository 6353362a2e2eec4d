//! vigil.toml configuration parser.
//!
//! A [`ServiceConfig`] doubles as the shape of one live registration
//! entry: the JSON pushed over the registration socket deserializes
//! into the same type the static config file does.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity reported alongside every status update.
    pub instance_id: String,
    /// Statically configured services, keyed by service name.
    pub services: HashMap<String, ServiceConfig>,
    /// Local port the registration server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Seconds an ephemeral registration stays live without a heartbeat.
    #[serde(default = "default_expiry_secs")]
    pub ephemeral_service_expiry: u64,
}

/// Which probe drives a service's health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// TCP connect to `host:port`.
    #[default]
    Tcp,
    /// HTTP GET against `uri`, healthy on 2xx.
    Http,
    /// Shell command, healthy on exit status 0.
    Script,
}

/// One service to watch — from the config file or a registration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Port the service listens on. Also part of the watcher key.
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub check: CheckKind,
    /// Per-probe deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Consecutive successes required to report up.
    #[serde(default = "default_threshold")]
    pub rise: u32,
    /// Consecutive failures required to report down.
    #[serde(default = "default_threshold")]
    pub fall: u32,
    /// HTTP path to probe. Required when `check = "http"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Command to run. Required when `check = "script"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Opaque passthrough (reporter hints etc.), preserved as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_listen_port() -> u16 {
    1025
}

fn default_expiry_secs() -> u64 {
    60
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout() -> f64 {
    0.1
}

fn default_threshold() -> u32 {
    1
}

impl Config {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.instance_id.is_empty() {
            return Err(ConfigError::MissingField("instance_id"));
        }
        for (name, service) in &self.services {
            service.validate(name)?;
        }
        Ok(())
    }
}

impl ServiceConfig {
    /// Validate thresholds and the probe-specific required fields.
    pub fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.rise == 0 || self.fall == 0 {
            return Err(ConfigError::invalid(name, "rise and fall must be at least 1"));
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ConfigError::invalid(name, "timeout must be a positive number of seconds"));
        }
        match self.check {
            CheckKind::Http if self.uri.is_none() => {
                Err(ConfigError::invalid(name, "http check requires `uri`"))
            }
            CheckKind::Script if self.command.is_none() => {
                Err(ConfigError::invalid(name, "script check requires `command`"))
            }
            _ => Ok(()),
        }
    }

    /// Probe deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}
