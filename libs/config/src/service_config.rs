//! Server configuration
//!
//! Sections mirror the runtime components: `listener`, `connection`,
//! `protocol` and `logging`.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use network::{ConnectionSettings, ListenerSettings};
use protocol::{PoolStrategy, ProtocolSettings};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// File read when no explicit path is given (optional)
pub const DEFAULT_CONFIG_PATH: &str = "config/servo.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "SERVO";

/// Main server configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ServoConfig {
    pub listener: ListenerConfig,
    pub connection: ConnectionConfig,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    pub address: String,
    pub port: u16,
    pub backlog: i32,
    pub reap_interval_ms: u64,
    pub accept_poll_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3717,
            backlog: 100,
            reap_interval_ms: 50,
            accept_poll_ms: 20,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_received_bytes: usize,
    pub poll_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_received_bytes: 1024 * 1024,
            poll_interval_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    pub syncword: u32,
    pub recycle_capacity: usize,
    pub max_packet_pool: usize,
    pub strategy: PoolStrategy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let defaults = ProtocolSettings::default();
        Self {
            syncword: defaults.syncword,
            recycle_capacity: defaults.recycle_capacity,
            max_packet_pool: defaults.max_packet_pool,
            strategy: defaults.strategy,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `network=debug,info`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ServoConfig {
    /// Load configuration with environment overrides.
    ///
    /// An explicit `path` must exist; without one, [`DEFAULT_CONFIG_PATH`] is
    /// read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = match path {
            Some(path) => {
                info!("Loading config: {:?}", path);
                Config::builder().add_source(File::from(path).required(true))
            }
            None => {
                debug!("Looking for optional config: {}", DEFAULT_CONFIG_PATH);
                Config::builder().add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false))
            }
        };

        // Override with environment variables (SERVO_ prefix)
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        self.listener_address()?;
        if self.listener.backlog <= 0 {
            bail!("listener.backlog must be positive");
        }
        if self.listener.reap_interval_ms == 0 {
            bail!("listener.reap_interval_ms must be non-zero");
        }
        if self.listener.accept_poll_ms == 0 {
            bail!("listener.accept_poll_ms must be non-zero");
        }
        if self.connection.poll_interval_ms == 0 {
            bail!("connection.poll_interval_ms must be non-zero");
        }
        if self.connection.max_received_bytes == 0 {
            bail!("connection.max_received_bytes must be non-zero");
        }
        if self.protocol.recycle_capacity == 0 {
            bail!("protocol.recycle_capacity must be non-zero");
        }
        if self.protocol.max_packet_pool == 0 {
            bail!("protocol.max_packet_pool must be non-zero");
        }
        Ok(())
    }

    fn listener_address(&self) -> Result<IpAddr> {
        self.listener
            .address
            .parse()
            .with_context(|| format!("Invalid listener.address '{}'", self.listener.address))
    }

    pub fn listener_settings(&self) -> Result<ListenerSettings> {
        Ok(ListenerSettings {
            address: self.listener_address()?,
            port: self.listener.port,
            backlog: self.listener.backlog,
            reap_interval: Duration::from_millis(self.listener.reap_interval_ms),
            accept_poll: Duration::from_millis(self.listener.accept_poll_ms),
        })
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_received_bytes: self.connection.max_received_bytes,
            poll_interval: Duration::from_millis(self.connection.poll_interval_ms),
        }
    }

    pub fn protocol_settings(&self) -> ProtocolSettings {
        ProtocolSettings {
            syncword: self.protocol.syncword,
            recycle_capacity: self.protocol.recycle_capacity,
            max_packet_pool: self.protocol.max_packet_pool,
            strategy: self.protocol.strategy,
        }
    }
}
