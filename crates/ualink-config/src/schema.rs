// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration file schema.
//!
//! ```text
//! UalinkConfig
//! ├── client: ClientConfig
//! └── logging: LoggingConfig
//! ```
//!
//! # Example
//!
//! ```yaml
//! client:
//!   endpoint_url: "opc.tcp://plc-01:4840"
//!   security_policy: basic256_sha256
//!   security_mode: sign_and_encrypt
//!   session_timeout: 10m
//!
//! logging:
//!   level: debug
//!   format: json
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ualink_client::ClientConfig;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Root Configuration
// =============================================================================

/// Root of a ualink configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UalinkConfig {
    /// OPC UA client settings.
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UalinkConfig {
    /// Creates a configuration for `client` with default logging.
    pub fn new(client: ClientConfig) -> Self {
        Self {
            client,
            logging: LoggingConfig::default(),
        }
    }

    /// Validates every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.client.validate()?;
        self.logging.validate()
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include event targets in logs.
    #[serde(default = "default_enabled")]
    pub with_target: bool,

    /// Include file/line in logs.
    #[serde(default)]
    pub with_file: bool,

    /// Include thread IDs in logs.
    #[serde(default)]
    pub with_thread_ids: bool,
}

fn default_enabled() -> bool {
    true
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.format == LogFormat::Compact && self.with_file {
            return Err(ConfigError::validation(
                "logging.with_file",
                "file locations are not shown in compact format",
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            with_target: true,
            with_file: false,
            with_thread_ids: false,
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive of this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::validation(
                "logging.level",
                format!("unknown level '{other}'"),
            )),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
    /// Minimal single-line output.
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, LogLevel::Info);
        assert_eq!(logging.format, LogFormat::Text);
        assert!(logging.with_target);
        assert!(logging.validate().is_ok());
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_compact_with_file_rejected() {
        let logging = LoggingConfig {
            format: LogFormat::Compact,
            with_file: true,
            ..Default::default()
        };
        assert!(matches!(
            logging.validate(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_checks_client() {
        let config = UalinkConfig::new(ClientConfig::new("http://not-opc"));
        assert!(matches!(config.validate(), Err(ConfigError::Client(_))));

        let config = UalinkConfig::new(ClientConfig::new("opc.tcp://localhost:4840"));
        assert!(config.validate().is_ok());
    }
}
