//! # Servo Configuration
//!
//! Loads [`ServoConfig`] from an optional TOML file, then applies `SERVO_`
//! environment overrides (`__` between nested keys, e.g.
//! `SERVO_LISTENER__PORT=4000`). Every field has a default, so an empty or
//! missing file yields a working configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use servo_config::ServoConfig;
//!
//! let config = ServoConfig::load(None)?;
//! config.validate()?;
//! let listener = config.listener_settings()?;
//! let protocol = config.protocol_settings();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod service_config;

pub use service_config::{
    ConnectionConfig, ListenerConfig, LoggingConfig, ProtocolConfig, ServoConfig,
    DEFAULT_CONFIG_PATH, ENV_PREFIX,
};
