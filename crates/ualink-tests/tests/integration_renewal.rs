// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Channel renewal timing with a paused clock.

use std::time::Duration;

use tokio::time::sleep;

use ualink_client::testing::MockFailure;
use ualink_client::{ConnectionState, DataValue, NodeId, RenewalStatus, StatusCode};
use ualink_tests::common::*;

async fn wait_terminal(harness: &TestHarness) -> RenewalStatus {
    let mut receiver = harness.client.watch_renewal().expect("renewal started");
    let status = receiver
        .wait_for(RenewalStatus::is_terminal)
        .await
        .expect("renewal status sender alive")
        .clone();
    status
}

#[tokio::test(start_paused = true)]
async fn test_channel_renewed_at_seventy_percent_of_lifetime() {
    let server = MockServerBuilder::new().channel_lifetime_ms(10_000).build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;

    sleep(Duration::from_millis(6_900)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 2);
    assert_eq!(harness.server.count("Read"), 1);
    assert_eq!(harness.client.renewal_status().renewals(), Some(1));

    let tokens = harness.server.installed_tokens();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].channel_id, tokens[1].channel_id);
    assert_ne!(tokens[0].token_id, tokens[1].token_id);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_session_creation_does_not_delay_renewal() {
    let server = MockServerBuilder::new().channel_lifetime_ms(10_000).build();
    let harness = TestHarness::with_server(server);
    harness.server.hold("CreateSession");

    let (connected, ()) = tokio::join!(harness.client.connect(), async {
        sleep(Duration::from_secs(3)).await;
        harness.server.release("CreateSession");
        harness.server.unhold("CreateSession");
    });
    connected.unwrap();

    // The token was issued at t=0, so renewal is due at t=7 s.
    sleep(Duration::from_millis(3_900)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 1);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 2);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_renewal_keeps_going() {
    let server = MockServerBuilder::new().channel_lifetime_ms(10_000).build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;

    sleep(Duration::from_millis(7_000 * 3 + 100)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 4);
    assert_eq!(harness.client.renewal_status().renewals(), Some(3));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_revised_session_timeout_shortens_interval() {
    let server = MockServerBuilder::new().session_timeout_ms(5_000.0).build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;

    let session = harness.client.session_info().expect("session");
    assert_eq!(session.session_timeout, Duration::from_secs(5));

    sleep(Duration::from_millis(3_400)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 1);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 2);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_renewal_is_reported() {
    let server = MockServerBuilder::new().channel_lifetime_ms(1_000).build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;
    harness
        .server
        .fail_next("OpenSecureChannel", MockFailure::Status(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID));

    let status = wait_terminal(&harness).await;
    assert!(matches!(status, RenewalStatus::Failed(_)));
    assert_eq!(harness.server.count("Read"), 0);

    // The loop does not restart on its own.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 2);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_halted_server_fails_liveness_read() {
    let server = MockServerBuilder::new()
        .channel_lifetime_ms(1_000)
        .value(
            NodeId::SERVER_STATUS_STATE,
            DataValue::from_status(StatusCode::BAD_SERVER_HALTED),
        )
        .build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;

    let status = wait_terminal(&harness).await;
    match status {
        RenewalStatus::Failed(message) => assert!(!message.is_empty()),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(harness.server.count("Read"), 1);
    // The session itself is untouched until the application reacts.
    assert_eq!(harness.client.state(), ConnectionState::SessionActive);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_renewal() {
    let server = MockServerBuilder::new().channel_lifetime_ms(10_000).build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;

    sleep(Duration::from_secs(2)).await;
    within(harness.client.disconnect()).await.unwrap();
    assert_eq!(harness.client.renewal_status(), RenewalStatus::Stopped);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_restarts_renewal() {
    let server = MockServerBuilder::new().channel_lifetime_ms(10_000).build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;
    within(harness.client.disconnect()).await.unwrap();

    harness.connect().await;
    sleep(Duration::from_millis(7_100)).await;
    assert_eq!(harness.server.count("OpenSecureChannel"), 3);
    assert_eq!(harness.client.renewal_status().renewals(), Some(1));

    harness.shutdown().await;
}
