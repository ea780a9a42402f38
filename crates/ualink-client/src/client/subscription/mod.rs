// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions and monitored items.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Subscription                         │
//! │  subscribe / unsubscribe / modify / set_monitoring_mode       │
//! └───────────────────────────────────────────────────────────────┘
//!          │ CreateMonitoredItems            ▲ deliver
//!          ▼                                 │
//! ┌─────────────────┐              ┌─────────────────────────────┐
//! │   HandleTable   │◄─────────────│   NotificationDispatcher    │
//! │ client ◄► server│   resolve    │  data change / event / status│
//! └─────────────────┘              └─────────────────────────────┘
//!                                            ▲
//!                                  ┌─────────────────┐
//!                                  │  PublishEngine  │
//!                                  └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let (handler, mut rx) = ChannelHandler::with_channel(64);
//! let subscription = client
//!     .create_subscription(Duration::from_millis(100), Arc::new(handler))
//!     .await?;
//! let item = subscription
//!     .subscribe_data_change(NodeId::string(2, "Temperature"), AttributeId::Value)
//!     .await?;
//!
//! while let Some(notification) = rx.recv().await {
//!     println!("{:?}", notification);
//! }
//! ```

pub mod dispatch;
pub mod event;
pub mod handler;
pub mod handles;
pub mod publish;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SubscriptionParameters;
use crate::error::{SubscriptionError, UaError, UaResult};
use crate::messages::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionRequest,
    CreateSubscriptionResponse, DataChangeFilter, DeleteMonitoredItemsRequest,
    DeleteMonitoredItemsResponse, DeleteSubscriptionsRequest, DeleteSubscriptionsResponse,
    EventFilter, ModifyMonitoredItemsRequest, ModifyMonitoredItemsResponse,
    ModifySubscriptionRequest, ModifySubscriptionResponse, MonitoredItemCreateRequest,
    MonitoredItemModifyRequest, MonitoredItemModifyResult, MonitoringFilter,
    MonitoringParameters, NotificationMessage, ReadValueId, RequestHeader,
    SetMonitoringModeRequest, SetMonitoringModeResponse, SetPublishingModeRequest,
    SetPublishingModeResponse,
};
use crate::transport::UaConnection;
use crate::types::{
    AttributeId, DataChangeTrigger, DeadbandType, MonitoringMode, NodeId, StatusCode,
    TimestampsToReturn,
};

pub use dispatch::{NotificationDispatcher, StatusHandlerSlot, SubscriptionStats, SubscriptionStatsSnapshot};
pub use event::EventFields;
pub use handler::{
    BroadcastHandler, ChannelHandler, DataChange, Event, HandlerError, HandlerResult,
    Notification, StatusChange, StatusChangeHandler, SubscriptionHandler,
};
pub use handles::{ActiveFilter, HandleTable, MonitoredItemId, MonitoredItemRegistration};
pub use publish::PublishEngine;

// =============================================================================
// SubscriptionState
// =============================================================================

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Not yet confirmed by the server.
    #[default]
    Uninitialized,

    /// Confirmed; monitored item operations are allowed.
    Active,

    /// Deleted on the server.
    Deleted,
}

impl SubscriptionState {
    /// Returns `true` if monitored item operations are allowed.
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Active => write!(f, "Active"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Subscription parameters as revised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RevisedParameters {
    /// Publishing interval.
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,
    /// Lifetime count.
    pub lifetime_count: u32,
    /// Keep-alive count.
    pub max_keepalive_count: u32,
    /// Notifications per Publish response.
    pub max_notifications_per_publish: u32,
    /// Priority.
    pub priority: u8,
    /// Whether publishing is enabled.
    pub publishing_enabled: bool,
}

// =============================================================================
// MonitorRequest / FilterOverride
// =============================================================================

/// One item to monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorRequest {
    /// Node and attribute.
    pub target: ReadValueId,
    /// Monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Sampling interval in milliseconds; 0 means the fastest the server offers.
    pub sampling_interval: f64,
    /// Queue size.
    pub queue_size: u32,
    /// Discard the oldest value when the queue overflows.
    pub discard_oldest: bool,
    /// Data change or event filter.
    pub filter: Option<MonitoringFilter>,
}

impl MonitorRequest {
    /// Monitors an attribute for data changes.
    pub fn data_change(node_id: NodeId, attribute: AttributeId) -> Self {
        Self {
            target: ReadValueId::new(node_id, attribute),
            monitoring_mode: MonitoringMode::Reporting,
            sampling_interval: 0.0,
            queue_size: 0,
            discard_oldest: true,
            filter: None,
        }
    }

    /// Monitors the events of a node.
    pub fn events(source: NodeId, filter: EventFilter) -> Self {
        Self {
            filter: Some(MonitoringFilter::Event(filter)),
            ..Self::data_change(source, AttributeId::EventNotifier)
        }
    }

    /// Sets the sampling interval in milliseconds.
    pub fn sampling_interval(mut self, interval: f64) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Sets the queue size.
    pub fn queue_size(mut self, size: u32) -> Self {
        self.queue_size = size;
        self
    }

    /// Sets the monitoring mode.
    pub fn monitoring_mode(mut self, mode: MonitoringMode) -> Self {
        self.monitoring_mode = mode;
        self
    }

    /// Sets the filter.
    pub fn filter(mut self, filter: MonitoringFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Filter to send with a monitored item modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterOverride {
    /// Resend the filter the item was created with.
    #[default]
    Keep,
    /// Send no filter.
    Clear,
    /// Send a data change filter with this trigger.
    Trigger(DataChangeTrigger),
}

/// Result of creating one monitored item.
pub type CreateResult = Result<MonitoredItemId, StatusCode>;

// =============================================================================
// Subscription
// =============================================================================

/// A server-side subscription and its monitored items.
pub struct Subscription {
    id: u32,
    connection: Arc<dyn UaConnection>,
    state: RwLock<SubscriptionState>,
    parameters: RwLock<RevisedParameters>,
    handles: Mutex<HandleTable>,
    dispatcher: NotificationDispatcher,
    stats: Arc<SubscriptionStats>,
    publisher: Weak<PublishEngine>,
}

/// Everything a subscription shares with its client.
pub(crate) struct SubscriptionContext {
    pub connection: Arc<dyn UaConnection>,
    pub status_handler: StatusHandlerSlot,
    pub registry: Arc<crate::registry::TypeRegistry>,
    pub publisher: Weak<PublishEngine>,
}

impl Subscription {
    /// Creates the subscription on the server.
    ///
    /// If the revised lifetime count is below three keep-alive counts, a
    /// ModifySubscription raises it to exactly three.
    pub(crate) async fn create(
        context: SubscriptionContext,
        parameters: &SubscriptionParameters,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> UaResult<Arc<Self>> {
        let request = CreateSubscriptionRequest {
            request_header: RequestHeader::default(),
            requested_publishing_interval: parameters.publishing_interval_ms(),
            requested_lifetime_count: parameters.lifetime_count,
            requested_max_keep_alive_count: parameters.max_keepalive_count,
            max_notifications_per_publish: parameters.max_notifications_per_publish,
            publishing_enabled: parameters.publishing_enabled,
            priority: parameters.priority,
        };
        let response: CreateSubscriptionResponse = context
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        let id = response.subscription_id;
        let stats = Arc::new(SubscriptionStats::new());
        let subscription = Self {
            id,
            connection: context.connection,
            state: RwLock::new(SubscriptionState::Uninitialized),
            parameters: RwLock::new(RevisedParameters {
                publishing_interval: duration_from_ms(response.revised_publishing_interval),
                lifetime_count: response.revised_lifetime_count,
                max_keepalive_count: response.revised_max_keep_alive_count,
                max_notifications_per_publish: parameters.max_notifications_per_publish,
                priority: parameters.priority,
                publishing_enabled: parameters.publishing_enabled,
            }),
            handles: Mutex::new(HandleTable::new()),
            dispatcher: NotificationDispatcher::new(
                id,
                handler,
                context.status_handler,
                context.registry,
                Arc::clone(&stats),
            ),
            stats,
            publisher: context.publisher,
        };
        *subscription.state.write() = SubscriptionState::Active;
        info!(
            subscription_id = id,
            publishing_interval_ms = response.revised_publishing_interval,
            lifetime_count = response.revised_lifetime_count,
            keepalive_count = response.revised_max_keep_alive_count,
            "Subscription created"
        );

        let minimum_lifetime = response.revised_max_keep_alive_count.saturating_mul(3);
        if response.revised_lifetime_count < minimum_lifetime {
            debug!(
                subscription_id = id,
                revised = response.revised_lifetime_count,
                minimum = minimum_lifetime,
                "Lifetime count below three keep-alives, raising it"
            );
            let mut fixed = parameters.clone();
            fixed.publishing_interval = duration_from_ms(response.revised_publishing_interval);
            fixed.lifetime_count = minimum_lifetime;
            fixed.max_keepalive_count = response.revised_max_keep_alive_count;
            if let Err(e) = subscription.modify(&fixed).await {
                warn!(subscription_id = id, error = %e, "Raising lifetime count failed, deleting subscription");
                if let Err(delete_error) = subscription.delete().await {
                    warn!(
                        subscription_id = id,
                        error = %delete_error,
                        "Subscription left on server"
                    );
                }
                return Err(e);
            }
        }

        Ok(Arc::new(subscription))
    }

    /// Returns the server-assigned id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.read()
    }

    /// Returns the revised parameters.
    pub fn parameters(&self) -> RevisedParameters {
        *self.parameters.read()
    }

    /// Returns dispatch counters.
    pub fn stats(&self) -> SubscriptionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns every registration, ordered by client handle.
    pub fn registrations(&self) -> Vec<MonitoredItemRegistration> {
        self.handles.lock().registrations()
    }

    /// Returns the registration of a server handle.
    pub fn registration(&self, handle: MonitoredItemId) -> Option<MonitoredItemRegistration> {
        self.handles.lock().get_by_server(handle).cloned()
    }

    fn ensure_active(&self) -> UaResult<()> {
        let state = self.state();
        if state.is_active() {
            Ok(())
        } else {
            Err(SubscriptionError::NotActive {
                subscription_id: self.id,
                state: state.to_string(),
            }
            .into())
        }
    }

    // =========================================================================
    // Monitored items
    // =========================================================================

    /// Creates monitored items, one result per request.
    ///
    /// Every client handle is registered before the request is sent. A
    /// rejected item is removed again and reported by its status code.
    pub async fn subscribe(
        &self,
        requests: Vec<MonitorRequest>,
        timestamps: TimestampsToReturn,
    ) -> UaResult<Vec<CreateResult>> {
        self.ensure_active()?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut client_handles = Vec::with_capacity(requests.len());
        let items: Vec<MonitoredItemCreateRequest> = {
            let mut table = self.handles.lock();
            requests
                .into_iter()
                .map(|request| {
                    let client_handle = table.allocate();
                    table.register(MonitoredItemRegistration::new(
                        client_handle,
                        request.target.clone(),
                        request.filter.clone(),
                        request.sampling_interval,
                        request.queue_size,
                    ));
                    client_handles.push(client_handle);
                    MonitoredItemCreateRequest {
                        item_to_monitor: request.target,
                        monitoring_mode: request.monitoring_mode,
                        requested_parameters: MonitoringParameters {
                            client_handle,
                            sampling_interval: request.sampling_interval,
                            filter: request.filter,
                            queue_size: request.queue_size,
                            discard_oldest: request.discard_oldest,
                        },
                    }
                })
                .collect()
        };

        let request = CreateMonitoredItemsRequest {
            request_header: RequestHeader::default(),
            subscription_id: self.id,
            timestamps_to_return: timestamps,
            items_to_create: items,
        };
        let response: CreateMonitoredItemsResponse = match self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)
        {
            Ok(response) => response,
            Err(e) => {
                self.forget(&client_handles);
                return Err(e);
            }
        };

        if response.results.len() != client_handles.len() {
            self.forget(&client_handles);
            return Err(SubscriptionError::ResultCountMismatch {
                service: "CreateMonitoredItems",
                expected: client_handles.len(),
                actual: response.results.len(),
            }
            .into());
        }

        let mut table = self.handles.lock();
        let outcomes = client_handles
            .into_iter()
            .zip(response.results)
            .map(|(client_handle, result)| {
                if result.status_code.is_bad() {
                    table.remove(client_handle);
                    warn!(
                        subscription_id = self.id,
                        client_handle,
                        status = %result.status_code,
                        "Monitored item rejected"
                    );
                    return Err(result.status_code);
                }

                let server_handle = MonitoredItemId(result.monitored_item_id);
                table.confirm(client_handle, server_handle);
                if let Some(registration) = table.get_mut(client_handle) {
                    registration.sampling_interval = result.revised_sampling_interval;
                    registration.queue_size = result.revised_queue_size;
                }
                debug!(
                    subscription_id = self.id,
                    client_handle,
                    server_handle = server_handle.value(),
                    "Monitored item created"
                );
                Ok(server_handle)
            })
            .collect();
        Ok(outcomes)
    }

    fn forget(&self, client_handles: &[u32]) {
        let mut table = self.handles.lock();
        for handle in client_handles {
            table.remove(*handle);
        }
    }

    async fn subscribe_one(&self, request: MonitorRequest) -> UaResult<MonitoredItemId> {
        let mut results = self.subscribe(vec![request], TimestampsToReturn::Both).await?;
        match results.pop() {
            Some(Ok(handle)) => Ok(handle),
            Some(Err(status)) => Err(UaError::status_in(status, "CreateMonitoredItems")),
            None => Err(SubscriptionError::ResultCountMismatch {
                service: "CreateMonitoredItems",
                expected: 1,
                actual: 0,
            }
            .into()),
        }
    }

    /// Monitors one attribute for data changes.
    pub async fn subscribe_data_change(
        &self,
        node_id: NodeId,
        attribute: AttributeId,
    ) -> UaResult<MonitoredItemId> {
        self.subscribe_one(MonitorRequest::data_change(node_id, attribute))
            .await
    }

    /// Monitors an attribute of several nodes; one result per node.
    pub async fn subscribe_data_change_many(
        &self,
        node_ids: impl IntoIterator<Item = NodeId>,
        attribute: AttributeId,
    ) -> UaResult<Vec<CreateResult>> {
        let requests = node_ids
            .into_iter()
            .map(|node| MonitorRequest::data_change(node, attribute))
            .collect();
        self.subscribe(requests, TimestampsToReturn::Both).await
    }

    /// Monitors the events of `source`.
    ///
    /// Without a filter the standard BaseEventType fields are selected.
    pub async fn subscribe_events(
        &self,
        source: NodeId,
        filter: Option<EventFilter>,
    ) -> UaResult<MonitoredItemId> {
        let filter = filter.unwrap_or_else(EventFilter::base_event);
        self.subscribe_one(MonitorRequest::events(source, filter))
            .await
    }

    /// Monitors a value with a deadband filter.
    pub async fn deadband_monitor(
        &self,
        node_id: NodeId,
        deadband_value: f64,
        deadband_type: DeadbandType,
        queue_size: u32,
    ) -> UaResult<MonitoredItemId> {
        let filter = MonitoringFilter::DataChange(DataChangeFilter {
            trigger: DataChangeTrigger::StatusValue,
            deadband_type,
            deadband_value,
        });
        let request = MonitorRequest::data_change(node_id, AttributeId::Value)
            .queue_size(queue_size)
            .filter(filter);
        self.subscribe_one(request).await
    }

    /// Deletes monitored items by server handle.
    ///
    /// An empty list sends nothing. Items the server reports as deleted or
    /// unknown are dropped locally; the first other failure is returned
    /// afterwards.
    pub async fn unsubscribe(&self, handles: &[MonitoredItemId]) -> UaResult<()> {
        if handles.is_empty() {
            return Ok(());
        }
        self.ensure_active()?;

        let request = DeleteMonitoredItemsRequest {
            request_header: RequestHeader::default(),
            subscription_id: self.id,
            monitored_item_ids: handles.iter().map(MonitoredItemId::value).collect(),
        };
        let response: DeleteMonitoredItemsResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        if response.results.len() != handles.len() {
            return Err(SubscriptionError::ResultCountMismatch {
                service: "DeleteMonitoredItems",
                expected: handles.len(),
                actual: response.results.len(),
            }
            .into());
        }

        let mut first_failure = None;
        {
            let mut table = self.handles.lock();
            for (handle, status) in handles.iter().zip(&response.results) {
                if status.is_good() || *status == StatusCode::BAD_MONITORED_ITEM_ID_INVALID {
                    table.remove_by_server(*handle);
                    debug!(subscription_id = self.id, server_handle = handle.value(), "Monitored item deleted");
                } else if first_failure.is_none() {
                    first_failure = Some(*status);
                }
            }
        }

        match first_failure {
            Some(status) => Err(UaError::status_in(status, "DeleteMonitoredItems")),
            None => Ok(()),
        }
    }

    /// Changes sampling interval, queue size and filter of one item.
    ///
    /// The item is looked up by server handle. On success the stored filter
    /// becomes the server's filter result.
    pub async fn modify_monitored_item(
        &self,
        handle: MonitoredItemId,
        sampling_interval: f64,
        queue_size: u32,
        filter: FilterOverride,
    ) -> UaResult<MonitoredItemModifyResult> {
        self.ensure_active()?;

        let (client_handle, requested_filter) = {
            let table = self.handles.lock();
            let registration = table.get_by_server(handle).ok_or(
                SubscriptionError::UnknownMonitoredItem {
                    subscription_id: self.id,
                    server_handle: handle.value(),
                },
            )?;
            (registration.client_handle, registration.requested_filter.clone())
        };

        let filter = match filter {
            FilterOverride::Keep => requested_filter,
            FilterOverride::Clear => None,
            FilterOverride::Trigger(trigger) => Some(MonitoringFilter::DataChange(DataChangeFilter {
                trigger,
                ..Default::default()
            })),
        };
        let request = ModifyMonitoredItemsRequest {
            request_header: RequestHeader::default(),
            subscription_id: self.id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_modify: vec![MonitoredItemModifyRequest {
                monitored_item_id: handle.value(),
                requested_parameters: MonitoringParameters {
                    client_handle,
                    sampling_interval,
                    filter,
                    queue_size,
                    discard_oldest: true,
                },
            }],
        };
        let response: ModifyMonitoredItemsResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        let result = response.results.into_iter().next().ok_or(
            SubscriptionError::ResultCountMismatch {
                service: "ModifyMonitoredItems",
                expected: 1,
                actual: 0,
            },
        )?;
        result.status_code.check()?;

        if let Some(registration) = self.handles.lock().get_mut(client_handle) {
            registration.active_filter = ActiveFilter::Revised(result.filter_result.clone());
            registration.sampling_interval = result.revised_sampling_interval;
            registration.queue_size = result.revised_queue_size;
        }
        debug!(
            subscription_id = self.id,
            server_handle = handle.value(),
            sampling_interval = result.revised_sampling_interval,
            "Monitored item modified"
        );
        Ok(result)
    }

    /// Sets the monitoring mode of every confirmed item.
    ///
    /// Returns an empty list without a request when no item is confirmed.
    pub async fn set_monitoring_mode(&self, mode: MonitoringMode) -> UaResult<Vec<StatusCode>> {
        self.ensure_active()?;
        let handles = self.handles.lock().server_handles();
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let request = SetMonitoringModeRequest {
            request_header: RequestHeader::default(),
            subscription_id: self.id,
            monitoring_mode: mode,
            monitored_item_ids: handles.iter().map(MonitoredItemId::value).collect(),
        };
        let response: SetMonitoringModeResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;
        Ok(response.results)
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Changes the subscription parameters.
    pub async fn modify(&self, parameters: &SubscriptionParameters) -> UaResult<RevisedParameters> {
        self.ensure_active()?;
        let request = ModifySubscriptionRequest {
            request_header: RequestHeader::default(),
            subscription_id: self.id,
            requested_publishing_interval: parameters.publishing_interval_ms(),
            requested_lifetime_count: parameters.lifetime_count,
            requested_max_keep_alive_count: parameters.max_keepalive_count,
            max_notifications_per_publish: parameters.max_notifications_per_publish,
            priority: parameters.priority,
        };
        let response: ModifySubscriptionResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        let mut revised = self.parameters.write();
        revised.publishing_interval = duration_from_ms(response.revised_publishing_interval);
        revised.lifetime_count = response.revised_lifetime_count;
        revised.max_keepalive_count = response.revised_max_keep_alive_count;
        revised.max_notifications_per_publish = parameters.max_notifications_per_publish;
        revised.priority = parameters.priority;
        debug!(
            subscription_id = self.id,
            lifetime_count = revised.lifetime_count,
            keepalive_count = revised.max_keepalive_count,
            "Subscription modified"
        );
        Ok(*revised)
    }

    /// Enables or disables publishing.
    pub async fn set_publishing_mode(&self, enabled: bool) -> UaResult<Vec<StatusCode>> {
        self.ensure_active()?;
        let request = SetPublishingModeRequest {
            request_header: RequestHeader::default(),
            publishing_enabled: enabled,
            subscription_ids: vec![self.id],
        };
        let response: SetPublishingModeResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        if response.results.first().is_some_and(StatusCode::is_good) {
            self.parameters.write().publishing_enabled = enabled;
        }
        Ok(response.results)
    }

    /// Deletes the subscription on the server.
    ///
    /// Once the server has answered, the subscription is `Deleted` locally
    /// even if the result for it is bad; that status is logged and returned.
    /// The local handle table is left as it is; drop the subscription to
    /// discard it.
    pub async fn delete(&self) -> UaResult<()> {
        self.ensure_active()?;
        let request = DeleteSubscriptionsRequest {
            request_header: RequestHeader::default(),
            subscription_ids: vec![self.id],
        };
        let response: DeleteSubscriptionsResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        if let Some(publisher) = self.publisher.upgrade() {
            publisher.unregister(self.id);
        }
        *self.state.write() = SubscriptionState::Deleted;

        if let Some(status) = response.results.first().filter(|s| s.is_bad()) {
            warn!(subscription_id = self.id, status = %status, "Server refused subscription delete");
            return Err(UaError::status_in(*status, "DeleteSubscriptions"));
        }
        info!(subscription_id = self.id, "Subscription deleted");
        Ok(())
    }

    /// Dispatches one notification message to the handler.
    pub(crate) async fn deliver(&self, message: NotificationMessage) {
        self.stats.record_publish_response();
        self.dispatcher.dispatch(&self.handles, message).await;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("items", &self.handles.lock().len())
            .finish()
    }
}

fn duration_from_ms(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_request_defaults() {
        let request = MonitorRequest::data_change(NodeId::numeric(2, 1), AttributeId::Value);
        assert_eq!(request.sampling_interval, 0.0);
        assert_eq!(request.queue_size, 0);
        assert!(request.discard_oldest);
        assert_eq!(request.monitoring_mode, MonitoringMode::Reporting);
        assert!(request.filter.is_none());
    }

    #[test]
    fn test_event_request_targets_event_notifier() {
        let request = MonitorRequest::events(NodeId::SERVER, EventFilter::base_event());
        assert_eq!(request.target.attribute_id, AttributeId::EventNotifier);
        let filter = request.filter.unwrap();
        let clauses = &filter.as_event().unwrap().select_clauses;
        assert_eq!(clauses.len(), EventFilter::BASE_EVENT_FIELDS.len());
    }

    #[test]
    fn test_duration_from_ms() {
        assert_eq!(duration_from_ms(250.0), Duration::from_millis(250));
        assert_eq!(duration_from_ms(-1.0), Duration::ZERO);
        assert_eq!(duration_from_ms(f64::NAN), Duration::ZERO);
    }
}
