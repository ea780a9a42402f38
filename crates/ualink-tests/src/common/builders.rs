// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Builders
//!
//! Builders for scripted mock servers and on-disk configuration files.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use ualink_client::testing::MockServer;
use ualink_client::{DataValue, MessageSecurityMode, NodeId, SecurityPolicy, StatusCode};
use ualink_config::ConfigFormat;

use super::mocks::MirrorPolicy;

// =============================================================================
// MockServerBuilder
// =============================================================================

/// Scripts a [`MockServer`] before the client connects.
#[derive(Default)]
pub struct MockServerBuilder {
    channel_lifetime_ms: Option<u32>,
    session_timeout_ms: Option<f64>,
    lifetime_count: Option<u32>,
    values: Vec<(NodeId, DataValue)>,
    rejected_items: Vec<(NodeId, StatusCode)>,
    certificate: Option<Vec<u8>>,
}

impl MockServerBuilder {
    /// Creates a builder for a plain None/None server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Revises every channel lifetime to `ms`.
    pub fn channel_lifetime_ms(mut self, ms: u32) -> Self {
        self.channel_lifetime_ms = Some(ms);
        self
    }

    /// Revises every session timeout to `ms`.
    pub fn session_timeout_ms(mut self, ms: f64) -> Self {
        self.session_timeout_ms = Some(ms);
        self
    }

    /// Revises every subscription lifetime count.
    pub fn lifetime_count(mut self, count: u32) -> Self {
        self.lifetime_count = Some(count);
        self
    }

    /// Adds a readable node.
    pub fn value(mut self, node_id: NodeId, value: DataValue) -> Self {
        self.values.push((node_id, value));
        self
    }

    /// Rejects monitored items on `node_id`.
    pub fn reject_item(mut self, node_id: NodeId, status: StatusCode) -> Self {
        self.rejected_items.push((node_id, status));
        self
    }

    /// Offers a Sign/Basic256Sha256 endpoint with `certificate`, signed by
    /// a [`MirrorPolicy`].
    pub fn secured(mut self, certificate: impl Into<Vec<u8>>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// Builds the server.
    pub fn build(self) -> MockServer {
        let server = MockServer::new();
        if let Some(ms) = self.channel_lifetime_ms {
            server.set_channel_lifetime(ms);
        }
        if let Some(ms) = self.session_timeout_ms {
            server.set_session_timeout(ms);
        }
        if let Some(count) = self.lifetime_count {
            server.set_lifetime_count(count);
        }
        for (node_id, value) in self.values {
            server.set_value(node_id, value);
        }
        for (node_id, status) in self.rejected_items {
            server.reject_item(node_id, status);
        }
        if let Some(certificate) = self.certificate {
            let policy = MirrorPolicy::new(Vec::new());
            server.set_endpoints(vec![MockServer::endpoint(
                MessageSecurityMode::Sign,
                policy.uri(),
            )]);
            server.set_server_certificate(certificate);
            server.set_signer(Arc::new(policy));
        }
        server
    }
}

// =============================================================================
// ConfigFileBuilder
// =============================================================================

/// Writes configuration files into a temporary directory.
pub struct ConfigFileBuilder {
    dir: TempDir,
}

impl ConfigFileBuilder {
    /// Creates a builder with a fresh directory.
    pub fn new() -> Self {
        Self {
            dir: super::temp_test_dir("ualink-config"),
        }
    }

    /// Writes `content` as `ualink.<ext>` and returns its path.
    pub fn write(&self, content: &str, format: ConfigFormat) -> PathBuf {
        self.write_named(&format!("ualink.{}", format.extension()), content)
    }

    /// Writes `content` under an explicit file name.
    pub fn write_named(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("failed to write config file");
        path
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
