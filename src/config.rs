//! Configuration management for the FTP control core
//!
//! Settings come from an optional TOML file layered with `FTPD_` prefixed
//! environment variables. Every value has a default so the server can start
//! with no file at all.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

pub use config::ConfigError;

/// Default configuration file looked up when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config";

/// Complete server configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listener: ListenerConfig,
    pub connections: ConnectionConfig,
    pub transfer: TransferConfig,
}

/// Control-connection endpoint settings, consumed by the `Listener`
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ListenerConfig {
    /// IP address the control endpoint binds to
    pub bind_address: String,

    /// Port for the control connection (0 picks an ephemeral port)
    pub control_port: u16,

    /// Longest accepted command line, in bytes
    pub max_command_length: usize,

    /// Text sent with the 220 greeting
    pub greeting: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            control_port: 2121,
            max_command_length: 512,
            greeting: "Service ready".to_string(),
        }
    }
}

/// Session admission and maintenance policy, consumed by the `ConnectionService`
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Idle timeout assigned to sessions before login (0 disables it)
    pub default_idle_secs: u64,

    /// Period of the idle sweep. 0 disables the recurring timer.
    pub scheduler_interval_secs: u64,

    /// Ceiling on concurrently logged-in sessions
    pub max_logins: usize,

    /// Ceiling on concurrently logged-in anonymous sessions
    pub max_anonymous_logins: usize,

    pub anonymous_login_enabled: bool,

    /// Create a missing home directory on login instead of refusing it
    pub create_home: bool,

    /// Root directory given to sessions before login and to default accounts
    pub default_root: String,

    pub admin_name: String,

    /// Provision the administrator and anonymous accounts on startup
    pub create_default_users: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_idle_secs: 300,
            scheduler_interval_secs: 60,
            max_logins: 10,
            max_anonymous_logins: 10,
            anonymous_login_enabled: true,
            create_home: true,
            default_root: "./ftp_root".to_string(),
            admin_name: "admin".to_string(),
            create_default_users: true,
        }
    }
}

/// Data-channel settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransferConfig {
    /// Address passive listeners bind to and advertise
    pub passive_address: String,

    /// Port range for PASV data connections
    pub passive_port_min: u16,
    pub passive_port_max: u16,

    /// How long a transfer waits for its data connection
    pub connection_timeout_secs: u64,

    pub buffer_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            passive_address: "127.0.0.1".to_string(),
            passive_port_min: 2122,
            passive_port_max: 2222,
            connection_timeout_secs: 10,
            buffer_size: 8192,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path` (extension optional) with environment
    /// overrides such as `FTPD_CONNECTIONS__MAX_LOGINS=20`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("FTPD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.control_port == 0 {
            return Err(ConfigError::Message("Control port cannot be 0".into()));
        }

        if self.listener.max_command_length == 0 {
            return Err(ConfigError::Message(
                "max_command_length must be greater than 0".into(),
            ));
        }

        if self.connections.default_root.is_empty() {
            return Err(ConfigError::Message("default_root cannot be empty".into()));
        }

        if self.connections.max_logins == 0 {
            return Err(ConfigError::Message(
                "max_logins must be greater than 0".into(),
            ));
        }

        if self.connections.max_anonymous_logins > self.connections.max_logins {
            return Err(ConfigError::Message(
                "max_anonymous_logins cannot exceed max_logins".into(),
            ));
        }

        if self.transfer.passive_ip().is_none() {
            return Err(ConfigError::Message(format!(
                "passive_address '{}' is not an IP address",
                self.transfer.passive_address
            )));
        }

        if self.transfer.passive_port_min >= self.transfer.passive_port_max {
            return Err(ConfigError::Message(
                "passive_port_min must be less than passive_port_max".into(),
            ));
        }

        Ok(())
    }
}

impl ListenerConfig {
    /// Bind address and control port as a socket address string
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }
}

impl ConnectionConfig {
    pub fn default_root_path(&self) -> PathBuf {
        PathBuf::from(&self.default_root)
    }

    /// Sweep period, or `None` when the recurring timer is disabled
    pub fn scheduler_interval(&self) -> Option<Duration> {
        (self.scheduler_interval_secs > 0).then(|| Duration::from_secs(self.scheduler_interval_secs))
    }
}

impl TransferConfig {
    pub fn passive_ip(&self) -> Option<IpAddr> {
        self.passive_address.parse().ok()
    }

    pub fn passive_port_range(&self) -> std::ops::Range<u16> {
        self.passive_port_min..self.passive_port_max
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}
