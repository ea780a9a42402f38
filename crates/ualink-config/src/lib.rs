// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink-config
//!
//! File-based configuration and logging setup for ualink clients.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ualink_config::{init_logging, load_config};
//!
//! let config = load_config("ualink.yaml").unwrap();
//! init_logging(&config.logging).unwrap();
//!
//! println!("Endpoint: {}", config.client.endpoint_url);
//! ```
//!
//! ## Formats
//!
//! YAML, TOML and JSON, chosen by file extension. Durations use
//! humantime notation (`4s`, `10m`, `1h`).
//!
//! ## Environment Variables
//!
//! Values in config files can reference environment variables:
//!
//! ```yaml
//! client:
//!   endpoint_url: "opc.tcp://${PLC_HOST:localhost}:4840"
//! ```
//!
//! Selected values can be overridden directly:
//!
//! ```text
//! UALINK_ENDPOINT_URL=opc.tcp://plc-02:4840
//! UALINK_SECURITY_MODE=sign
//! UALINK_SESSION_TIMEOUT_MS=600000
//! UALINK_CHANNEL_LIFETIME_MS=300000
//! UALINK_LOG_LEVEL=debug
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod logging;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader, DEFAULT_ENV_PREFIX};
pub use logging::{build_filter, init_logging};
pub use schema::{LogFormat, LogLevel, LoggingConfig, UalinkConfig};
