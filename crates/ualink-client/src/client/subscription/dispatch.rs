// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification dispatch.
//!
//! Turns the notification message of one Publish response into handler
//! calls. Items are resolved through the subscription's handle table; an
//! unknown client handle skips that item only. The handler calls of one
//! batch run concurrently and are all awaited before `dispatch` returns.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::messages::{
    DataChangeNotification, EventNotificationList, NotificationData, NotificationMessage,
    StatusChangeNotification,
};
use crate::registry::{DecodedObject, TypeRegistry};
use crate::types::{DataValue, Variant};

use super::event::decode_event;
use super::handler::{
    DataChange, Event, HandlerResult, StatusChange, StatusChangeHandler, SubscriptionHandler,
};
use super::handles::HandleTable;

/// Slot holding the client-wide status change handler.
pub type StatusHandlerSlot = Arc<RwLock<Option<Arc<dyn StatusChangeHandler>>>>;

// =============================================================================
// SubscriptionStats
// =============================================================================

/// Dispatch counters of one subscription.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    notifications_delivered: AtomicU64,
    unknown_handles: AtomicU64,
    callback_failures: AtomicU64,
    publish_responses: AtomicU64,
}

/// Point-in-time copy of [`SubscriptionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SubscriptionStatsSnapshot {
    /// Notifications handed to a handler.
    pub notifications_delivered: u64,
    /// Notifications skipped for an unknown client handle.
    pub unknown_handles: u64,
    /// Handler calls that failed or panicked.
    pub callback_failures: u64,
    /// Publish responses routed to the subscription.
    pub publish_responses: u64,
}

impl SubscriptionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_publish_response(&self) {
        self.publish_responses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self) {
        self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_unknown_handle(&self) {
        self.unknown_handles.fetch_add(1, Ordering::Relaxed);
    }

    fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> SubscriptionStatsSnapshot {
        SubscriptionStatsSnapshot {
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            unknown_handles: self.unknown_handles.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            publish_responses: self.publish_responses.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// NotificationDispatcher
// =============================================================================

/// Routes notification batches of one subscription to its handler.
pub struct NotificationDispatcher {
    subscription_id: u32,
    handler: Arc<dyn SubscriptionHandler>,
    status_handler: StatusHandlerSlot,
    registry: Arc<TypeRegistry>,
    stats: Arc<SubscriptionStats>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        subscription_id: u32,
        handler: Arc<dyn SubscriptionHandler>,
        status_handler: StatusHandlerSlot,
        registry: Arc<TypeRegistry>,
        stats: Arc<SubscriptionStats>,
    ) -> Self {
        Self {
            subscription_id,
            handler,
            status_handler,
            registry,
            stats,
        }
    }

    /// Delivers every notification of `message`.
    ///
    /// Never fails: unknown handles and handler errors are logged and
    /// counted.
    pub async fn dispatch(&self, handles: &Mutex<HandleTable>, message: NotificationMessage) {
        debug!(
            subscription_id = self.subscription_id,
            sequence_number = message.sequence_number,
            batches = message.notification_data.len(),
            "Dispatching notification message"
        );
        for data in message.notification_data {
            match data {
                NotificationData::DataChange(batch) => self.data_changes(handles, batch).await,
                NotificationData::Event(batch) => self.events(handles, batch).await,
                NotificationData::StatusChange(change) => self.status_change(change).await,
            }
        }
    }

    async fn data_changes(&self, handles: &Mutex<HandleTable>, batch: DataChangeNotification) {
        let notifications: Vec<DataChange> = {
            let table = handles.lock();
            batch
                .monitored_items
                .into_iter()
                .filter_map(|item| {
                    let Some(registration) = table.get(item.client_handle) else {
                        self.unknown_handle(item.client_handle);
                        return None;
                    };
                    Some(DataChange {
                        subscription_id: self.subscription_id,
                        client_handle: item.client_handle,
                        server_handle: registration.server_handle,
                        target: registration.target.clone(),
                        decoded: None,
                        value: item.value.clone(),
                        raw: item,
                    })
                })
                .collect()
        };

        // Registry constructors are user code; run them outside the table lock.
        let calls = notifications.into_iter().map(|mut notification| {
            let client_handle = notification.client_handle;
            notification.decoded = self.decode_guarded(client_handle, &notification.value);
            self.guarded(client_handle, self.handler.on_data_change(notification))
        });
        join_all(calls).await;
    }

    async fn events(&self, handles: &Mutex<HandleTable>, batch: EventNotificationList) {
        let events: Vec<Event> = {
            let table = handles.lock();
            batch
                .events
                .into_iter()
                .filter_map(|item| {
                    let Some(registration) = table.get(item.client_handle) else {
                        self.unknown_handle(item.client_handle);
                        return None;
                    };
                    let clauses = registration
                        .requested_filter
                        .as_ref()
                        .and_then(|f| f.as_event())
                        .map(|f| f.select_clauses.as_slice())
                        .unwrap_or_default();
                    Some(Event {
                        subscription_id: self.subscription_id,
                        client_handle: item.client_handle,
                        server_handle: registration.server_handle,
                        target: registration.target.clone(),
                        fields: decode_event(clauses, item.event_fields.clone()),
                        raw: item,
                    })
                })
                .collect()
        };

        let calls = events.into_iter().map(|event| {
            let client_handle = event.client_handle;
            self.guarded(client_handle, self.handler.on_event(event))
        });
        join_all(calls).await;
    }

    async fn status_change(&self, change: StatusChangeNotification) {
        let change = StatusChange {
            subscription_id: self.subscription_id,
            status: change.status,
            diagnostic_info: change.diagnostic_info,
        };
        let handler = self.status_handler.read().clone();
        match handler {
            Some(handler) => self.guarded(0, handler.on_status_change(change)).await,
            None => info!(
                subscription_id = change.subscription_id,
                status = %change.status,
                "Subscription status changed"
            ),
        }
    }

    fn unknown_handle(&self, client_handle: u32) {
        self.stats.record_unknown_handle();
        warn!(
            subscription_id = self.subscription_id,
            client_handle,
            "Notification for unknown client handle skipped"
        );
    }

    fn decode_value(&self, value: &DataValue) -> Option<DecodedObject> {
        let Some(Variant::ExtensionObject(object)) = &value.value else {
            return None;
        };
        match self.registry.decode(object)? {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(type_id = %object.type_id, error = %e, "Custom type decode failed");
                None
            }
        }
    }

    fn decode_guarded(&self, client_handle: u32, value: &DataValue) -> Option<DecodedObject> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.decode_value(value))) {
            Ok(decoded) => decoded,
            Err(_) => {
                self.stats.record_callback_failure();
                error!(
                    subscription_id = self.subscription_id,
                    client_handle,
                    "Custom type decoder panicked"
                );
                None
            }
        }
    }

    async fn guarded<F>(&self, client_handle: u32, call: F)
    where
        F: Future<Output = HandlerResult>,
    {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => self.stats.record_delivered(),
            Ok(Err(e)) => {
                self.stats.record_callback_failure();
                error!(
                    subscription_id = self.subscription_id,
                    client_handle,
                    error = %e,
                    "Notification handler failed"
                );
            }
            Err(_) => {
                self.stats.record_callback_failure();
                error!(
                    subscription_id = self.subscription_id,
                    client_handle,
                    "Notification handler panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::subscription::handles::{MonitoredItemId, MonitoredItemRegistration};
    use crate::messages::{
        EventFieldList, EventFilter, MonitoredItemNotification, MonitoringFilter, ReadValueId,
        SimpleAttributeOperand,
    };
    use crate::error::UaResult;
    use crate::registry::DecodedValue;
    use crate::types::{ExtensionObject, NodeId, StatusCode};
    use async_trait::async_trait;
    use chrono::Utc;

    #[derive(Default)]
    struct Recorder {
        values: Mutex<Vec<(u32, Variant)>>,
        events: Mutex<Vec<super::super::event::EventFields>>,
        fail_handle: Option<u32>,
        panic_handle: Option<u32>,
    }

    #[async_trait]
    impl SubscriptionHandler for Recorder {
        async fn on_data_change(&self, n: DataChange) -> HandlerResult {
            if Some(n.client_handle) == self.fail_handle {
                return Err("rejected".into());
            }
            if Some(n.client_handle) == self.panic_handle {
                panic!("handler bug");
            }
            self.values.lock().push((n.client_handle, n.value.value().clone()));
            Ok(())
        }

        async fn on_event(&self, e: Event) -> HandlerResult {
            self.events.lock().push(e.fields);
            Ok(())
        }
    }

    struct StatusRecorder(Mutex<Vec<StatusCode>>);

    #[async_trait]
    impl StatusChangeHandler for StatusRecorder {
        async fn on_status_change(&self, change: StatusChange) -> HandlerResult {
            self.0.lock().push(change.status);
            Ok(())
        }
    }

    fn table_with(handles: &[u32], filter: Option<MonitoringFilter>) -> Mutex<HandleTable> {
        let mut table = HandleTable::new();
        for (i, handle) in handles.iter().enumerate() {
            table.register(MonitoredItemRegistration::new(
                *handle,
                ReadValueId::value(NodeId::numeric(2, i as u32)),
                filter.clone(),
                0.0,
                0,
            ));
            table.confirm(*handle, MonitoredItemId(1000 + *handle));
        }
        Mutex::new(table)
    }

    fn message(data: Vec<NotificationData>) -> NotificationMessage {
        NotificationMessage {
            sequence_number: 1,
            publish_time: Utc::now(),
            notification_data: data,
        }
    }

    fn data_changes(items: &[(u32, i32)]) -> NotificationData {
        NotificationData::DataChange(DataChangeNotification {
            monitored_items: items
                .iter()
                .map(|(handle, v)| MonitoredItemNotification {
                    client_handle: *handle,
                    value: DataValue::new(*v),
                })
                .collect(),
        })
    }

    fn dispatcher(
        handler: Arc<Recorder>,
        status: StatusHandlerSlot,
        registry: Arc<TypeRegistry>,
    ) -> (NotificationDispatcher, Arc<SubscriptionStats>) {
        let stats = Arc::new(SubscriptionStats::new());
        (
            NotificationDispatcher::new(7, handler, status, registry, Arc::clone(&stats)),
            stats,
        )
    }

    #[tokio::test]
    async fn test_unknown_handle_is_skipped() {
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, stats) = dispatcher(
            Arc::clone(&recorder),
            StatusHandlerSlot::default(),
            Arc::new(TypeRegistry::new()),
        );
        let table = table_with(&[200], None);

        dispatcher
            .dispatch(&table, message(vec![data_changes(&[(999, 1), (200, 2)])]))
            .await;

        assert_eq!(*recorder.values.lock(), vec![(200, Variant::Int32(2))]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.unknown_handles, 1);
        assert_eq!(snapshot.notifications_delivered, 1);
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_do_not_stop_dispatch() {
        let recorder = Arc::new(Recorder {
            fail_handle: Some(200),
            panic_handle: Some(201),
            ..Default::default()
        });
        let (dispatcher, stats) = dispatcher(
            Arc::clone(&recorder),
            StatusHandlerSlot::default(),
            Arc::new(TypeRegistry::new()),
        );
        let table = table_with(&[200, 201, 202], None);

        dispatcher
            .dispatch(&table, message(vec![data_changes(&[(200, 1), (201, 2), (202, 3)])]))
            .await;
        dispatcher
            .dispatch(&table, message(vec![data_changes(&[(202, 4)])]))
            .await;

        assert_eq!(
            *recorder.values.lock(),
            vec![(202, Variant::Int32(3)), (202, Variant::Int32(4))]
        );
        assert_eq!(stats.snapshot().callback_failures, 2);
    }

    #[tokio::test]
    async fn test_events_decode_against_stored_clauses() {
        let filter = EventFilter {
            select_clauses: vec![
                SimpleAttributeOperand::base_event_property("Severity"),
                SimpleAttributeOperand::base_event_property("SourceName"),
            ],
            ..Default::default()
        };
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, _) = dispatcher(
            Arc::clone(&recorder),
            StatusHandlerSlot::default(),
            Arc::new(TypeRegistry::new()),
        );
        let table = table_with(&[300], Some(MonitoringFilter::Event(filter)));

        let batch = NotificationData::Event(EventNotificationList {
            events: vec![EventFieldList {
                client_handle: 300,
                event_fields: vec![Variant::UInt16(500), Variant::from("Pump")],
            }],
        });
        dispatcher.dispatch(&table, message(vec![batch])).await;

        let events = recorder.events.lock();
        assert_eq!(events[0].severity(), Some(500));
        assert_eq!(events[0].source_name(), Some("Pump"));
    }

    #[tokio::test]
    async fn test_status_change_goes_to_client_handler() {
        let status = Arc::new(StatusRecorder(Mutex::new(Vec::new())));
        let slot: StatusHandlerSlot = Arc::new(RwLock::new(Some(
            Arc::clone(&status) as Arc<dyn StatusChangeHandler>
        )));
        let (dispatcher, _) = dispatcher(
            Arc::new(Recorder::default()),
            slot,
            Arc::new(TypeRegistry::new()),
        );
        let table = table_with(&[], None);

        let change = NotificationData::StatusChange(StatusChangeNotification {
            status: StatusCode::BAD_TIMEOUT,
            diagnostic_info: None,
        });
        dispatcher.dispatch(&table, message(vec![change])).await;
        assert_eq!(*status.0.lock(), vec![StatusCode::BAD_TIMEOUT]);
    }

    #[tokio::test]
    async fn test_registered_extension_object_is_decoded() {
        let registry = Arc::new(TypeRegistry::new());
        let type_id = NodeId::numeric(2, 5001);
        registry.register("Counter", type_id.clone(), |body: &[u8]| {
            Ok(Arc::new(body.len()) as DecodedValue)
        });
        let (dispatcher, _) = dispatcher(
            Arc::new(Recorder::default()),
            StatusHandlerSlot::default(),
            registry,
        );

        let value = DataValue {
            value: Some(Variant::ExtensionObject(Box::new(ExtensionObject {
                type_id,
                body: vec![1, 2, 3],
            }))),
            ..Default::default()
        };
        let decoded = dispatcher.decode_value(&value).unwrap();
        assert_eq!(decoded.type_name, "Counter");
        assert_eq!(decoded.downcast_ref::<usize>(), Some(&3));
        assert!(dispatcher.decode_value(&DataValue::new(1i32)).is_none());
    }

    #[tokio::test]
    async fn test_panicking_decoder_does_not_escape_dispatch() {
        let registry = Arc::new(TypeRegistry::new());
        let type_id = NodeId::numeric(2, 5002);
        registry.register("Broken", type_id.clone(), |_body: &[u8]| -> UaResult<DecodedValue> {
            panic!("decoder bug")
        });
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, stats) = dispatcher(
            Arc::clone(&recorder),
            StatusHandlerSlot::default(),
            registry,
        );
        let table = table_with(&[200, 201], None);

        let broken = MonitoredItemNotification {
            client_handle: 200,
            value: DataValue {
                value: Some(Variant::ExtensionObject(Box::new(ExtensionObject {
                    type_id,
                    body: vec![1],
                }))),
                ..Default::default()
            },
        };
        let plain = MonitoredItemNotification {
            client_handle: 201,
            value: DataValue::new(5i32),
        };
        let batch = NotificationData::DataChange(DataChangeNotification {
            monitored_items: vec![broken, plain],
        });
        dispatcher.dispatch(&table, message(vec![batch])).await;
        dispatcher
            .dispatch(&table, message(vec![data_changes(&[(201, 6)])]))
            .await;

        let values = recorder.values.lock();
        assert_eq!(values.len(), 3);
        assert!(values.contains(&(201, Variant::Int32(5))));
        assert_eq!(values.last(), Some(&(201, Variant::Int32(6))));
        assert_eq!(stats.snapshot().callback_failures, 1);
    }
}
