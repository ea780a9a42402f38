// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built configurations, nodes and values shared by the suites.

use std::time::Duration;

use ualink_client::testing::MOCK_ENDPOINT;
use ualink_client::{ClientConfig, DataValue, NodeId};

// =============================================================================
// Config Fixtures
// =============================================================================

/// Client configurations and configuration file contents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Configuration pointing at the mock server.
    pub fn client_config() -> ClientConfig {
        ClientConfig::builder()
            .endpoint(MOCK_ENDPOINT)
            .application_name("Test Client")
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_secs(1))
            .build()
            .expect("fixture config is valid")
    }

    /// Configuration with username credentials.
    pub fn username_config(username: &str, password: &str) -> ClientConfig {
        let mut config = Self::client_config();
        config.username = Some(username.to_string());
        config.password = Some(password.to_string());
        config
    }

    /// A complete YAML file.
    pub fn yaml() -> &'static str {
        r#"
client:
  endpoint_url: "opc.tcp://mock-server:4840"
  application_name: Packaging Line
  session_timeout: 20m
  secure_channel_lifetime: 10m
  max_inflight_publish: 3
  locale_ids: [en, de]

logging:
  level: debug
  format: compact
"#
    }

    /// A complete TOML file.
    pub fn toml() -> &'static str {
        r#"
[client]
endpoint_url = "opc.tcp://mock-server:4840"
application_name = "Packaging Line"
session_timeout = "20m"
secure_channel_lifetime = "10m"
max_inflight_publish = 3
locale_ids = ["en", "de"]

[logging]
level = "debug"
format = "compact"
"#
    }

    /// A complete JSON file.
    pub fn json() -> &'static str {
        r#"{
  "client": {
    "endpoint_url": "opc.tcp://mock-server:4840",
    "application_name": "Packaging Line",
    "session_timeout": "20m",
    "secure_channel_lifetime": "10m",
    "max_inflight_publish": 3,
    "locale_ids": ["en", "de"]
  },
  "logging": { "level": "debug", "format": "compact" }
}"#
    }
}

// =============================================================================
// Node Fixtures
// =============================================================================

/// Node ids of a small plant model.
pub struct NodeFixtures;

impl NodeFixtures {
    /// Temperature sensor.
    pub fn temperature() -> NodeId {
        NodeId::string(2, "Line1.Temperature")
    }

    /// Pressure sensor.
    pub fn pressure() -> NodeId {
        NodeId::string(2, "Line1.Pressure")
    }

    /// Flow meter.
    pub fn flow() -> NodeId {
        NodeId::string(2, "Line1.Flow")
    }

    /// Writable setpoint.
    pub fn setpoint() -> NodeId {
        NodeId::string(2, "Line1.Setpoint")
    }

    /// A node the server does not know.
    pub fn missing() -> NodeId {
        NodeId::string(2, "Line9.Missing")
    }

    /// `count` numbered sensors.
    pub fn sensors(count: usize) -> Vec<NodeId> {
        (0..count)
            .map(|i| NodeId::string(2, format!("Line1.Sensor{i:03}")))
            .collect()
    }
}

// =============================================================================
// Value Fixtures
// =============================================================================

/// Data values.
pub struct ValueFixtures;

impl ValueFixtures {
    /// An `Int32` value with good status.
    pub fn int(value: i32) -> DataValue {
        DataValue::new(value)
    }

    /// A `Double` value with good status.
    pub fn double(value: f64) -> DataValue {
        DataValue::new(value)
    }
}
