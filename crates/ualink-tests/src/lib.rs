// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ualink Integration Tests
//!
//! Shared utilities plus the cross-module suites under `tests/`.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ualink-tests
//! cargo test -p ualink-tests --test integration_handshake
//! cargo test -p ualink-tests --test integration_renewal
//! cargo test -p ualink-tests --test integration_subscription
//! cargo test -p ualink-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! ### Handshake (`integration_handshake.rs`)
//! - Handshake order and rollback
//! - Server signature and certificate checks
//! - User identity tokens
//! - Teardown order
//!
//! ### Renewal (`integration_renewal.rs`)
//! - Renewal before 70% of the shorter lifetime
//! - Liveness reads and failure reporting
//!
//! ### Subscriptions (`integration_subscription.rs`)
//! - Handle uniqueness and rollback
//! - Notifications racing item creation
//! - Unknown handles and failing handlers
//! - Partial failures and deletion
//!
//! ### Config (`integration_config.rs`)
//! - Loading YAML, TOML and JSON files
//! - Environment overrides
//! - Connecting with a loaded configuration
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use ualink_tests::common::{NodeFixtures, TestHarness, ValueFixtures};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::connected().await;
//!     let (subscription, handler) = harness.subscription().await;
//!     subscription
//!         .subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value)
//!         .await
//!         .unwrap();
//!     harness.server.push_data_change(subscription.id(), vec![(200, ValueFixtures::int(1))]);
//!     handler.wait_for(1).await;
//! }
//! ```

pub mod common;

pub use common::*;
