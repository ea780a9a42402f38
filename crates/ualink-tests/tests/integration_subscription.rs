// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription, monitored item and notification routing tests.

use std::sync::Arc;
use std::time::Duration;

use ualink_client::client::subscription::ActiveFilter;
use ualink_client::testing::{MockFailure, FIRST_SERVER_HANDLE};
use ualink_client::{
    AttributeId, DataChangeTrigger, FilterOverride, MonitoredItemId, MonitoringMode, NodeId,
    RenewalStatus, StatusCode, SubscriptionParameters, SubscriptionState, UaError, Variant,
};
use ualink_tests::common::*;

const FIRST_CLIENT_HANDLE: u32 = 200;

// =============================================================================
// Creation and handles
// =============================================================================

#[tokio::test]
async fn test_subscription_created_on_server() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;

    assert_eq!(subscription.state(), SubscriptionState::Active);
    assert_eq!(harness.server.subscription_ids(), vec![subscription.id()]);
    assert_eq!(harness.client.subscription_ids(), vec![subscription.id()]);
    assert_eq!(
        subscription.parameters().publishing_interval,
        Duration::from_millis(100)
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_subscription_requires_active_session() {
    let harness = TestHarness::new();
    let err = harness
        .client
        .create_subscription(Duration::from_millis(100), RecordingHandler::new())
        .await
        .unwrap_err();
    assert!(matches!(err, UaError::Connection(_)));
    assert_eq!(harness.server.count("CreateSubscription"), 0);
}

#[tokio::test]
async fn test_handles_are_unique_and_mapped() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;

    let results = within(
        subscription.subscribe_data_change_many(NodeFixtures::sensors(5), AttributeId::Value),
    )
    .await
    .unwrap();
    assert!(results.iter().all(Result::is_ok));

    let registrations = subscription.registrations();
    assert_eq!(registrations.len(), 5);
    assert_unique_handles(&registrations);

    let mut client_handles: Vec<u32> = registrations.iter().map(|r| r.client_handle).collect();
    client_handles.sort_unstable();
    assert_eq!(client_handles, (FIRST_CLIENT_HANDLE..FIRST_CLIENT_HANDLE + 5).collect::<Vec<_>>());

    for (server_handle, client_handle) in harness.server.monitored_items(subscription.id()) {
        assert!(server_handle >= FIRST_SERVER_HANDLE);
        let registration = subscription
            .registration(MonitoredItemId(server_handle))
            .expect("server handle known locally");
        assert_eq!(registration.client_handle, client_handle);
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_handles_never_reused_after_delete() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;

    let first = within(subscription.subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value))
        .await
        .unwrap();
    within(subscription.unsubscribe(&[first])).await.unwrap();
    let second = within(subscription.subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value))
        .await
        .unwrap();

    assert_ne!(first, second);
    let registration = subscription.registration(second).unwrap();
    assert_eq!(registration.client_handle, FIRST_CLIENT_HANDLE + 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_partial_failure_reports_per_item() {
    let server = MockServerBuilder::new()
        .reject_item(NodeFixtures::missing(), StatusCode::BAD_NODE_ID_UNKNOWN)
        .build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;
    let (subscription, _) = harness.subscription().await;

    let results = within(subscription.subscribe_data_change_many(
        [NodeFixtures::temperature(), NodeFixtures::missing(), NodeFixtures::pressure()],
        AttributeId::Value,
    ))
    .await
    .unwrap();

    assert!(results[0].is_ok());
    assert_eq!(results[1], Err(StatusCode::BAD_NODE_ID_UNKNOWN));
    assert!(results[2].is_ok());

    let registrations = subscription.registrations();
    assert_eq!(registrations.len(), 2);
    assert!(registrations.iter().all(|r| r.is_confirmed()));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_single_rejected_item_is_an_error() {
    let server = MockServerBuilder::new()
        .reject_item(NodeFixtures::missing(), StatusCode::BAD_NODE_ID_UNKNOWN)
        .build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;
    let (subscription, _) = harness.subscription().await;

    assert_status(
        within(subscription.subscribe_data_change(NodeFixtures::missing(), AttributeId::Value)).await,
        StatusCode::BAD_NODE_ID_UNKNOWN,
    );
    assert!(subscription.registrations().is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_service_fault_rolls_back_registrations() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;
    harness.server.fail_next(
        "CreateMonitoredItems",
        MockFailure::Status(StatusCode::BAD_TOO_MANY_MONITORED_ITEMS),
    );

    let err = within(subscription.subscribe_data_change_many(NodeFixtures::sensors(3), AttributeId::Value))
        .await
        .unwrap_err();
    assert!(err.is_status(StatusCode::BAD_TOO_MANY_MONITORED_ITEMS));
    assert!(subscription.registrations().is_empty());

    harness.shutdown().await;
}

// =============================================================================
// Notification routing
// =============================================================================

#[tokio::test]
async fn test_values_arrive_in_order() {
    let harness = TestHarness::connected().await;
    let (subscription, handler) = harness.subscription().await;
    within(subscription.subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value))
        .await
        .unwrap();

    harness.server.push_data_change(
        subscription.id(),
        vec![
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(1)),
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(2)),
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(3)),
        ],
    );
    handler.wait_for(3).await;

    assert_eq!(handler.int_values(), vec![1, 2, 3]);
    let change = &handler.data_changes()[0];
    assert_eq!(change.subscription_id, subscription.id());
    assert_eq!(change.target.node_id, NodeFixtures::temperature());
    assert!(change.server_handle.is_some());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_messages_arrive_in_order_with_single_publish() {
    let mut config = ConfigFixtures::client_config();
    config.max_inflight_publish = 1;
    let harness = TestHarness::with_config(MockServerBuilder::new().build(), config);
    harness.connect().await;
    let (subscription, handler) = harness.subscription().await;
    within(subscription.subscribe_data_change(NodeFixtures::flow(), AttributeId::Value))
        .await
        .unwrap();

    for value in 1..=4 {
        harness
            .server
            .push_data_change(subscription.id(), vec![(FIRST_CLIENT_HANDLE, ValueFixtures::int(value))]);
    }
    handler.wait_for(4).await;
    assert_eq!(handler.int_values(), vec![1, 2, 3, 4]);
    assert_eq!(subscription.stats().publish_responses, 4);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_notification_before_create_response_is_delivered() {
    let harness = TestHarness::connected().await;
    let (subscription, handler) = harness.subscription().await;
    harness.server.hold("CreateMonitoredItems");

    let pending = {
        let subscription = Arc::clone(&subscription);
        tokio::spawn(async move {
            subscription
                .subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value)
                .await
        })
    };
    within(harness.server.wait_for("CreateMonitoredItems", 1)).await;

    harness
        .server
        .push_data_change(subscription.id(), vec![(FIRST_CLIENT_HANDLE, ValueFixtures::double(21.5))]);
    handler.wait_for(1).await;

    let early = &handler.data_changes()[0];
    assert_eq!(early.client_handle, FIRST_CLIENT_HANDLE);
    assert!(early.server_handle.is_none());
    assert_eq!(early.target.node_id, NodeFixtures::temperature());
    assert_eq!(subscription.stats().unknown_handles, 0);

    harness.server.release("CreateMonitoredItems");
    let handle = within(pending).await.unwrap().unwrap();
    assert!(subscription.registration(handle).unwrap().is_confirmed());

    harness.server.unhold("CreateMonitoredItems");
    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_handle_does_not_block_batch() {
    let harness = TestHarness::connected().await;
    let (subscription, handler) = harness.subscription().await;
    within(subscription.subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value))
        .await
        .unwrap();

    harness.server.push_data_change(
        subscription.id(),
        vec![
            (999, ValueFixtures::int(1)),
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(2)),
        ],
    );
    handler.wait_for(1).await;

    assert_eq!(handler.int_values(), vec![2]);
    let stats = subscription.stats();
    assert_eq!(stats.unknown_handles, 1);
    assert_eq!(stats.notifications_delivered, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_failing_handler_does_not_stop_delivery() {
    let harness = TestHarness::connected().await;
    let (subscription, handler) = harness.subscription().await;
    within(subscription.subscribe_data_change_many(NodeFixtures::sensors(3), AttributeId::Value))
        .await
        .unwrap();
    handler.fail_on(FIRST_CLIENT_HANDLE);
    handler.panic_on(FIRST_CLIENT_HANDLE + 1);

    harness.server.push_data_change(
        subscription.id(),
        vec![
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(1)),
            (FIRST_CLIENT_HANDLE + 1, ValueFixtures::int(2)),
            (FIRST_CLIENT_HANDLE + 2, ValueFixtures::int(3)),
        ],
    );
    handler.wait_for(3).await;
    harness
        .server
        .push_data_change(subscription.id(), vec![(FIRST_CLIENT_HANDLE + 2, ValueFixtures::int(4))]);
    handler.wait_for(4).await;

    assert_eq!(handler.int_values(), vec![1, 2, 3, 4]);
    assert_eq!(subscription.stats().callback_failures, 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_events_are_named_after_select_clauses() {
    let harness = TestHarness::connected().await;
    let (subscription, handler) = harness.subscription().await;
    let handle = within(subscription.subscribe_events(NodeId::SERVER, None))
        .await
        .unwrap();
    let client_handle = subscription.registration(handle).unwrap().client_handle;

    harness.server.push_event(
        subscription.id(),
        client_handle,
        vec![
            Variant::ByteString(vec![1, 2, 3]),
            Variant::NodeId(Box::new(NodeId::BASE_EVENT_TYPE)),
            Variant::NodeId(Box::new(NodeId::SERVER)),
            Variant::String("Pump1".to_string()),
            Variant::Empty,
            Variant::Empty,
            Variant::Empty,
            Variant::UInt16(500),
        ],
    );
    handler.wait_for(1).await;

    let event = &handler.events()[0];
    assert_eq!(event.client_handle, client_handle);
    assert_eq!(event.fields.source_name(), Some("Pump1"));
    assert_eq!(event.fields.severity(), Some(500));
    assert_eq!(event.fields.event_type(), Some(&NodeId::BASE_EVENT_TYPE));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_status_change_reaches_handler() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;
    let status_handler = RecordingStatusHandler::new();
    harness.client.set_status_change_handler(status_handler.clone());

    harness
        .server
        .push_status_change(subscription.id(), StatusCode::BAD_TIMEOUT);
    status_handler.wait_for(1).await;

    let changes = status_handler.changes();
    assert_eq!(changes[0].subscription_id, subscription.id());
    assert_eq!(changes[0].status, StatusCode::BAD_TIMEOUT);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_delivered_messages_are_acknowledged() {
    let harness = TestHarness::connected().await;
    let (subscription, handler) = harness.subscription().await;
    within(subscription.subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value))
        .await
        .unwrap();

    harness
        .server
        .push_data_change(subscription.id(), vec![(FIRST_CLIENT_HANDLE, ValueFixtures::int(9))]);
    handler.wait_for(1).await;

    within(async {
        while harness.server.acknowledgements().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    let acknowledgement = harness.server.acknowledgements()[0];
    assert_eq!(acknowledgement.subscription_id, subscription.id());

    harness.shutdown().await;
}

// =============================================================================
// Monitored item changes
// =============================================================================

#[tokio::test]
async fn test_empty_unsubscribe_sends_nothing() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;

    within(subscription.unsubscribe(&[])).await.unwrap();
    assert_eq!(harness.server.count("DeleteMonitoredItems"), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_removes_items() {
    let harness = TestHarness::connected().await;
    let (subscription, handler) = harness.subscription().await;
    let results = within(subscription.subscribe_data_change_many(NodeFixtures::sensors(2), AttributeId::Value))
        .await
        .unwrap();
    let first = results[0].unwrap();

    within(subscription.unsubscribe(&[first])).await.unwrap();
    assert_eq!(subscription.registrations().len(), 1);
    assert_eq!(harness.server.monitored_items(subscription.id()).len(), 1);

    // Late notifications for the removed item are skipped.
    harness.server.push_data_change(
        subscription.id(),
        vec![
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(1)),
            (FIRST_CLIENT_HANDLE + 1, ValueFixtures::int(2)),
        ],
    );
    handler.wait_for(1).await;
    assert_eq!(handler.int_values(), vec![2]);
    assert_eq!(subscription.stats().unknown_handles, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_keeps_items_the_server_refused() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;
    let results = within(subscription.subscribe_data_change_many(NodeFixtures::sensors(3), AttributeId::Value))
        .await
        .unwrap();
    let handles: Vec<MonitoredItemId> = results.into_iter().map(Result::unwrap).collect();
    harness
        .server
        .reject_delete(handles[0].value(), StatusCode::BAD_MONITORED_ITEM_ID_INVALID);
    harness
        .server
        .reject_delete(handles[1].value(), StatusCode::BAD_NOT_SUPPORTED);

    assert_status(
        within(subscription.unsubscribe(&handles)).await,
        StatusCode::BAD_NOT_SUPPORTED,
    );

    // Invalid ids count as gone; only the refused item remains.
    let remaining = subscription.registrations();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].server_handle, Some(handles[1]));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_modify_monitored_item_updates_registration() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;
    let handle = within(subscription.subscribe_data_change(NodeFixtures::pressure(), AttributeId::Value))
        .await
        .unwrap();

    within(subscription.modify_monitored_item(
        handle,
        250.0,
        5,
        FilterOverride::Trigger(DataChangeTrigger::StatusValueTimestamp),
    ))
    .await
    .unwrap();

    let registration = subscription.registration(handle).unwrap();
    assert_eq!(registration.sampling_interval, 250.0);
    assert_eq!(registration.queue_size, 5);
    assert!(matches!(registration.active_filter, ActiveFilter::Revised(_)));

    assert!(within(subscription.modify_monitored_item(
        MonitoredItemId(4242),
        250.0,
        5,
        FilterOverride::Keep,
    ))
    .await
    .is_err());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_deadband_monitor_sends_filter() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;
    let handle = within(subscription.deadband_monitor(
        NodeFixtures::flow(),
        0.5,
        ualink_client::DeadbandType::Absolute,
        10,
    ))
    .await
    .unwrap();

    let registration = subscription.registration(handle).unwrap();
    assert!(registration.requested_filter.is_some());
    assert_eq!(registration.queue_size, 10);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_set_monitoring_mode_applies_to_all_items() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;

    let results = within(subscription.set_monitoring_mode(MonitoringMode::Disabled))
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(harness.server.count("SetMonitoringMode"), 0);

    let created = within(subscription.subscribe_data_change_many(NodeFixtures::sensors(2), AttributeId::Value))
        .await
        .unwrap();
    let results = within(subscription.set_monitoring_mode(MonitoringMode::Sampling))
        .await
        .unwrap();
    assert_eq!(results, vec![StatusCode::GOOD; 2]);

    for handle in created.into_iter().map(Result::unwrap) {
        let (_, _, mode) = harness
            .server
            .monitored_item(subscription.id(), handle.value())
            .unwrap();
        assert_eq!(mode, MonitoringMode::Sampling);
    }

    harness.shutdown().await;
}

// =============================================================================
// Subscription changes
// =============================================================================

#[tokio::test]
async fn test_modify_and_publishing_mode() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;

    let mut parameters = SubscriptionParameters::for_session(
        Duration::from_millis(500),
        Duration::from_secs(60),
    );
    parameters.lifetime_count = 300;
    let revised = within(subscription.modify(&parameters)).await.unwrap();
    assert_eq!(revised.publishing_interval, Duration::from_millis(500));
    assert_eq!(revised.lifetime_count, 300);
    assert_eq!(revised.max_keepalive_count, parameters.max_keepalive_count);

    let results = within(subscription.set_publishing_mode(false)).await.unwrap();
    assert_eq!(results, vec![StatusCode::GOOD]);
    assert_eq!(harness.server.publishing_enabled(subscription.id()), Some(false));
    assert!(!subscription.parameters().publishing_enabled);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_delete_subscription() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;
    within(subscription.subscribe_data_change(NodeFixtures::setpoint(), AttributeId::Value))
        .await
        .unwrap();

    within(subscription.delete()).await.unwrap();

    assert_eq!(subscription.state(), SubscriptionState::Deleted);
    assert!(harness.server.subscription_ids().is_empty());
    assert!(harness.client.subscription_ids().is_empty());
    // Local registrations stay until the subscription is dropped.
    assert_eq!(subscription.registrations().len(), 1);

    let err = within(subscription.subscribe_data_change(NodeFixtures::flow(), AttributeId::Value))
        .await
        .unwrap_err();
    assert!(matches!(err, UaError::Subscription(_)));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_deletes_subscriptions() {
    let harness = TestHarness::connected().await;
    let (subscription, _) = harness.subscription().await;
    within(subscription.subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value))
        .await
        .unwrap();

    within(harness.client.disconnect()).await.unwrap();

    assert!(harness.server.subscription_ids().is_empty());
    assert!(harness.client.subscription_ids().is_empty());
    assert_traffic_contains(
        &harness.server,
        &["CreateSubscription", "CreateMonitoredItems", "CloseSession", "Disconnect"],
    );
}

#[tokio::test]
async fn test_keepalive_derived_from_session_timeout() {
    let mut config = ConfigFixtures::client_config();
    config.session_timeout = Duration::from_secs(60);
    let harness = TestHarness::with_config(MockServerBuilder::new().build(), config);
    harness.connect().await;

    let (subscription, _) = harness.subscription().await;
    // 60000 / 100 * 0.75 / 3
    assert_eq!(subscription.parameters().max_keepalive_count, 150);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_zero_keepalive_is_rejected() {
    let harness = TestHarness::connected().await;
    let mut parameters = SubscriptionParameters::default();
    parameters.max_keepalive_count = 0;

    let err = harness
        .client
        .create_subscription_with(&parameters, RecordingHandler::new())
        .await
        .unwrap_err();
    assert!(matches!(err, UaError::Subscription(_)));
    assert_eq!(harness.server.count("CreateSubscription"), 0);

    harness.shutdown().await;
}

// =============================================================================
// Full lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_lifecycle_with_renewal() {
    let server = MockServerBuilder::new().channel_lifetime_ms(10_000).build();
    let harness = TestHarness::with_server(server);
    harness.connect().await;

    let mut renewal = harness.client.watch_renewal().expect("renewal started");
    let history = tokio::spawn(async move {
        let mut seen = vec![renewal.borrow_and_update().clone()];
        while renewal.changed().await.is_ok() {
            seen.push(renewal.borrow_and_update().clone());
        }
        seen
    });

    let (subscription, handler) = harness.subscription().await;
    let handle = within(subscription.subscribe_data_change(NodeFixtures::temperature(), AttributeId::Value))
        .await
        .unwrap();
    harness.server.push_data_change(
        subscription.id(),
        vec![
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(1)),
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(2)),
            (FIRST_CLIENT_HANDLE, ValueFixtures::int(3)),
        ],
    );
    handler.wait_for(3).await;
    assert_eq!(handler.int_values(), vec![1, 2, 3]);

    // Let one renewal happen while the subscription is live.
    tokio::time::sleep(Duration::from_millis(7_100)).await;
    assert_eq!(harness.client.renewal_status().renewals(), Some(1));

    within(subscription.unsubscribe(&[handle])).await.unwrap();
    assert!(subscription.registrations().is_empty());
    assert!(harness.server.monitored_items(subscription.id()).is_empty());

    within(subscription.delete()).await.unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Deleted);
    assert!(harness.server.subscription_ids().is_empty());

    within(harness.client.disconnect()).await.unwrap();

    let seen = within(history).await.unwrap();
    assert!(
        !seen.iter().any(|status| matches!(status, RenewalStatus::Failed(_))),
        "renewal failed during the session: {seen:?}"
    );
    assert_eq!(seen.last(), Some(&RenewalStatus::Stopped));
}
