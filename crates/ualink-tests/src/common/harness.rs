// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! A client wired to an in-process mock server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ualink_client::testing::MockServer;
use ualink_client::{
    Client, ClientConfig, MessageSecurityMode, SecurityPolicyKind, Subscription,
    SubscriptionParameters,
};

use super::fixtures::ConfigFixtures;
use super::mocks::{MirrorPolicy, MirrorPolicyFactory, RecordingHandler};

/// Certificate the secured harness client presents.
pub const CLIENT_CERTIFICATE: &[u8] = b"client-certificate";

/// Default upper bound for a single awaited step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// TestHarness
// =============================================================================

/// Mock server plus a client bound to it.
pub struct TestHarness {
    /// The scripted server.
    pub server: MockServer,
    /// The client under test.
    pub client: Arc<Client>,
}

impl TestHarness {
    /// Creates a harness around a fresh server.
    pub fn new() -> Self {
        Self::with_server(MockServer::new())
    }

    /// Creates a harness around `server` with the default client config.
    pub fn with_server(server: MockServer) -> Self {
        Self::with_config(server, ConfigFixtures::client_config())
    }

    /// Creates a harness around `server` with `config`.
    pub fn with_config(server: MockServer, config: ClientConfig) -> Self {
        super::init_test_logging();
        let client = Client::builder(config)
            .connection(Arc::new(server.clone()))
            .build()
            .expect("client builds");
        Self {
            server,
            client: Arc::new(client),
        }
    }

    /// Creates a harness whose client uses a Sign/Basic256Sha256 channel
    /// backed by [`MirrorPolicy`].
    pub fn secured(server: MockServer) -> Self {
        let mut config = ConfigFixtures::client_config();
        config.security_policy = SecurityPolicyKind::Basic256Sha256;
        config.security_mode = MessageSecurityMode::Sign;
        Self::secured_with_config(server, config)
    }

    /// Like [`secured`](Self::secured) with an explicit config.
    pub fn secured_with_config(server: MockServer, config: ClientConfig) -> Self {
        super::init_test_logging();
        let client = Client::builder(config)
            .connection(Arc::new(server.clone()))
            .security_policy(Arc::new(MirrorPolicy::new(CLIENT_CERTIFICATE.to_vec())))
            .policy_factory(Arc::new(MirrorPolicyFactory))
            .build()
            .expect("client builds");
        Self {
            server,
            client: Arc::new(client),
        }
    }

    /// Creates a harness and connects it.
    pub async fn connected() -> Self {
        let harness = Self::new();
        harness.connect().await;
        harness
    }

    /// Connects the client.
    ///
    /// # Panics
    ///
    /// Panics if the handshake fails.
    pub async fn connect(&self) {
        within(self.client.connect())
            .await
            .expect("handshake succeeds");
    }

    /// Creates a subscription that records into a fresh handler.
    pub async fn subscription(&self) -> (Arc<Subscription>, Arc<RecordingHandler>) {
        let handler = RecordingHandler::new();
        let subscription = within(
            self.client
                .create_subscription(Duration::from_millis(100), handler.clone()),
        )
        .await
        .expect("subscription created");
        (subscription, handler)
    }

    /// Creates a subscription with explicit parameters.
    pub async fn subscription_with(
        &self,
        parameters: &SubscriptionParameters,
    ) -> (Arc<Subscription>, Arc<RecordingHandler>) {
        let handler = RecordingHandler::new();
        let subscription = within(
            self.client
                .create_subscription_with(parameters, handler.clone()),
        )
        .await
        .expect("subscription created");
        (subscription, handler)
    }

    /// Disconnects, ignoring teardown errors.
    pub async fn shutdown(&self) {
        let _ = within(self.client.disconnect()).await;
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaits `future`, panicking after [`STEP_TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(STEP_TIMEOUT, future)
        .await
        .expect("step timed out")
}
