// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Assertion helpers with failure messages that show the recorded traffic.

use std::collections::HashSet;

use ualink_client::client::subscription::MonitoredItemRegistration;
use ualink_client::testing::MockServer;
use ualink_client::{StatusCode, UaError};

// =============================================================================
// Wire traffic
// =============================================================================

/// Asserts the server saw exactly `expected`, in order.
pub fn assert_traffic(server: &MockServer, expected: &[&str]) {
    let actual = server.event_names();
    assert_eq!(
        actual, expected,
        "unexpected wire traffic\n  expected: {expected:?}\n  actual:   {actual:?}"
    );
}

/// Asserts `expected` appears in the server traffic as a subsequence.
pub fn assert_traffic_contains(server: &MockServer, expected: &[&str]) {
    let actual = server.event_names();
    let mut remaining = expected.iter().peekable();
    for name in &actual {
        if remaining.peek() == Some(&name) {
            remaining.next();
        }
    }
    assert!(
        remaining.peek().is_none(),
        "traffic does not contain {expected:?} in order\n  actual: {actual:?}"
    );
}

/// Asserts the last recorded events are `expected`.
pub fn assert_traffic_ends_with(server: &MockServer, expected: &[&str]) {
    let actual = server.event_names();
    assert!(
        actual.ends_with(expected),
        "traffic does not end with {expected:?}\n  actual: {actual:?}"
    );
}

// =============================================================================
// Handles
// =============================================================================

/// Asserts client and server handles are unique across `registrations`.
pub fn assert_unique_handles(registrations: &[MonitoredItemRegistration]) {
    let mut clients = HashSet::new();
    let mut servers = HashSet::new();
    for registration in registrations {
        assert!(
            clients.insert(registration.client_handle),
            "client handle {} registered twice",
            registration.client_handle
        );
        if let Some(server) = registration.server_handle {
            assert!(
                servers.insert(server),
                "server handle {} registered twice",
                server.value()
            );
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Asserts `result` failed with a bad `status`.
pub fn assert_status<T: std::fmt::Debug>(result: Result<T, UaError>, status: StatusCode) {
    match result {
        Ok(value) => panic!("expected {status}, got Ok({value:?})"),
        Err(e) => assert!(e.is_status(status), "expected {status}, got {e}"),
    }
}
