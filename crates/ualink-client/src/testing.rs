// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process mock server.
//!
//! [`MockServer`] implements [`UaConnection`] without a socket. It answers
//! every service the client uses, records the wire traffic in order, and
//! lets tests script failures, hold responses and push notifications.
//!
//! ```rust,ignore
//! let server = MockServer::new();
//! server.reject_item(NodeId::string(2, "Missing"), StatusCode::BAD_NODE_ID_UNKNOWN);
//!
//! let client = Client::builder(config)
//!     .connection(Arc::new(server.clone()))
//!     .build()?;
//! client.connect().await?;
//! ```
//!
//! [`JsonServiceCodec`] is a [`ServiceCodec`] that encodes service bodies as
//! JSON, for driving a [`TcpConnection`](crate::transport::tcp::TcpConnection)
//! against a test peer.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::config::TransportLimits;
use crate::error::{ChannelError, CodecError, ConnectionError, UaError, UaResult};
use crate::messages::*;
use crate::security::{concat, create_nonce, SecurityPolicy, SESSION_NONCE_LENGTH};
use crate::transport::tcp::ServiceCodec;
use crate::transport::{RequestStamper, TransportState, UaConnection};
use crate::types::{
    AttributeId, DataValue, LocalizedText, MessageSecurityMode, NodeId, SecurityPolicyKind,
    StatusCode, UserTokenType, Variant,
};

/// Endpoint URL the mock reports by default.
pub const MOCK_ENDPOINT: &str = "opc.tcp://mock-server:4840";

/// First server handle the mock assigns to a monitored item.
pub const FIRST_SERVER_HANDLE: u32 = 1000;

// =============================================================================
// Recorded traffic
// =============================================================================

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    /// Socket opened.
    Connect(String),
    /// Hello sent.
    Hello(String),
    /// Service request, as stamped by the connection.
    Request(ServiceRequest),
    /// Socket closed.
    Disconnect,
}

impl WireEvent {
    /// Returns a short name: the service name for requests.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "Connect",
            Self::Hello(_) => "Hello",
            Self::Request(request) => request.service_name(),
            Self::Disconnect => "Disconnect",
        }
    }
}

/// A scripted failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Answer with a ServiceFault carrying this status.
    Status(StatusCode),
    /// Fail as if the socket died.
    Transport,
}

/// Called with every recorded request.
pub type RequestHook = Arc<dyn Fn(&ServiceRequest) + Send + Sync>;

// =============================================================================
// Server state
// =============================================================================

#[derive(Debug, Clone)]
struct MockItem {
    client_handle: u32,
    node_id: NodeId,
    monitoring_mode: crate::types::MonitoringMode,
}

#[derive(Debug, Default)]
struct MockSubscription {
    items: BTreeMap<u32, MockItem>,
    publishing_enabled: bool,
}

struct Settings {
    channel_lifetime: Option<u32>,
    session_timeout: Option<f64>,
    lifetime_count: Option<u32>,
    endpoints: Vec<EndpointDescription>,
    server_certificate: Vec<u8>,
    signer: Option<Arc<dyn SecurityPolicy>>,
    signature_override: Option<Vec<u8>>,
    refuse_connections: bool,
    rejected_items: HashMap<NodeId, StatusCode>,
    rejected_deletes: HashMap<u32, StatusCode>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel_lifetime: None,
            session_timeout: None,
            lifetime_count: None,
            endpoints: vec![MockServer::endpoint(
                MessageSecurityMode::None,
                SecurityPolicyKind::NONE_URI,
            )],
            server_certificate: Vec::new(),
            signer: None,
            signature_override: None,
            refuse_connections: false,
            rejected_items: HashMap::new(),
            rejected_deletes: HashMap::new(),
        }
    }
}

struct Inner {
    state: RwLock<TransportState>,
    stamper: RequestStamper,
    settings: Mutex<Settings>,
    events: Mutex<Vec<WireEvent>>,
    tokens: Mutex<Vec<ChannelSecurityToken>>,
    failures: Mutex<HashMap<String, VecDeque<MockFailure>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    hook: RwLock<Option<RequestHook>>,
    values: Mutex<HashMap<NodeId, DataValue>>,
    references: Mutex<HashMap<NodeId, Vec<ReferenceDescription>>>,
    subscriptions: Mutex<BTreeMap<u32, MockSubscription>>,
    publish_queue: Mutex<VecDeque<(u32, NotificationMessage)>>,
    acknowledgements: Mutex<Vec<SubscriptionAcknowledgement>>,
    publish_signal: Notify,
    request_signal: Notify,
    channel_id: AtomicU32,
    next_token_id: AtomicU32,
    next_session: AtomicU32,
    next_subscription: AtomicU32,
    next_server_handle: AtomicU32,
    next_sequence: AtomicU32,
    channel_closed: AtomicBool,
}

/// In-process OPC UA server speaking through [`UaConnection`].
///
/// Clones share the same server.
#[derive(Clone)]
pub struct MockServer {
    inner: Arc<Inner>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// Creates a server with one None/None endpoint and anonymous plus
    /// username token policies.
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert(NodeId::SERVER_STATUS_STATE, DataValue::new(0i32));

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(TransportState::Disconnected),
                stamper: RequestStamper::new(4000),
                settings: Mutex::new(Settings::default()),
                events: Mutex::new(Vec::new()),
                tokens: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
                hook: RwLock::new(None),
                values: Mutex::new(values),
                references: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(BTreeMap::new()),
                publish_queue: Mutex::new(VecDeque::new()),
                acknowledgements: Mutex::new(Vec::new()),
                publish_signal: Notify::new(),
                request_signal: Notify::new(),
                channel_id: AtomicU32::new(0),
                next_token_id: AtomicU32::new(1),
                next_session: AtomicU32::new(1),
                next_subscription: AtomicU32::new(1),
                next_server_handle: AtomicU32::new(FIRST_SERVER_HANDLE),
                next_sequence: AtomicU32::new(1),
                channel_closed: AtomicBool::new(false),
            }),
        }
    }

    /// Builds an endpoint description offering anonymous and username tokens.
    pub fn endpoint(mode: MessageSecurityMode, policy_uri: &str) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: MOCK_ENDPOINT.to_string(),
            server_certificate: Vec::new(),
            security_mode: mode,
            security_policy_uri: policy_uri.to_string(),
            user_identity_tokens: vec![
                UserTokenPolicy {
                    policy_id: "anonymous".to_string(),
                    token_type: UserTokenType::Anonymous,
                    security_policy_uri: None,
                },
                UserTokenPolicy {
                    policy_id: "username".to_string(),
                    token_type: UserTokenType::UserName,
                    security_policy_uri: None,
                },
            ],
            security_level: 0,
        }
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Revises every channel lifetime to `ms`.
    pub fn set_channel_lifetime(&self, ms: u32) {
        self.inner.settings.lock().channel_lifetime = Some(ms);
    }

    /// Revises every session timeout to `ms`.
    pub fn set_session_timeout(&self, ms: f64) {
        self.inner.settings.lock().session_timeout = Some(ms);
    }

    /// Revises every subscription lifetime count to `count`.
    pub fn set_lifetime_count(&self, count: u32) {
        self.inner.settings.lock().lifetime_count = Some(count);
    }

    /// Replaces the endpoints returned by CreateSession.
    pub fn set_endpoints(&self, endpoints: Vec<EndpointDescription>) {
        self.inner.settings.lock().endpoints = endpoints;
    }

    /// Sets the certificate returned by CreateSession.
    pub fn set_server_certificate(&self, certificate: Vec<u8>) {
        self.inner.settings.lock().server_certificate = certificate;
    }

    /// Signs the CreateSession challenge with `signer`.
    pub fn set_signer(&self, signer: Arc<dyn SecurityPolicy>) {
        self.inner.settings.lock().signer = Some(signer);
    }

    /// Returns `signature` from CreateSession instead of signing.
    pub fn set_signature_override(&self, signature: Vec<u8>) {
        self.inner.settings.lock().signature_override = Some(signature);
    }

    /// Makes `connect_socket` fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.settings.lock().refuse_connections = refuse;
    }

    /// Rejects monitored items on `node_id` with `status`.
    pub fn reject_item(&self, node_id: NodeId, status: StatusCode) {
        self.inner.settings.lock().rejected_items.insert(node_id, status);
    }

    /// Answers deletion of `server_handle` with `status`.
    pub fn reject_delete(&self, server_handle: u32, status: StatusCode) {
        self.inner
            .settings
            .lock()
            .rejected_deletes
            .insert(server_handle, status);
    }

    /// Fails the next call of `service` (or `"Connect"`, `"Hello"`).
    pub fn fail_next(&self, service: &str, failure: MockFailure) {
        self.inner
            .failures
            .lock()
            .entry(service.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Holds responses to `service` until [`release`](Self::release).
    ///
    /// Requests are recorded before they are held.
    pub fn hold(&self, service: &str) {
        self.inner
            .gates
            .lock()
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Notify::new()));
    }

    /// Lets one held response to `service` through.
    pub fn release(&self, service: &str) {
        if let Some(gate) = self.inner.gates.lock().get(service) {
            gate.notify_one();
        }
    }

    /// Stops holding `service` responses. Already held ones stay held
    /// until released.
    pub fn unhold(&self, service: &str) {
        self.inner.gates.lock().remove(service);
    }

    /// Calls `hook` with every request when it is recorded.
    pub fn on_request<F>(&self, hook: F)
    where
        F: Fn(&ServiceRequest) + Send + Sync + 'static,
    {
        *self.inner.hook.write() = Some(Arc::new(hook));
    }

    /// Sets the value returned for a node.
    pub fn set_value(&self, node_id: NodeId, value: DataValue) {
        self.inner.values.lock().insert(node_id, value);
    }

    /// Adds a forward reference from `node_id`.
    pub fn add_reference(&self, node_id: NodeId, reference: ReferenceDescription) {
        self.inner
            .references
            .lock()
            .entry(node_id)
            .or_default()
            .push(reference);
    }

    /// Simulates a dead socket: every later request fails with a
    /// connection error and blocked Publish calls return.
    pub fn kill(&self) {
        *self.inner.state.write() = TransportState::Failed;
        self.inner.publish_signal.notify_waiters();
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Queues a notification message for the next Publish.
    pub fn push_message(&self, subscription_id: u32, notification_data: Vec<NotificationData>) {
        let message = NotificationMessage {
            sequence_number: self.inner.next_sequence.fetch_add(1, Ordering::Relaxed),
            publish_time: Utc::now(),
            notification_data,
        };
        self.inner
            .publish_queue
            .lock()
            .push_back((subscription_id, message));
        self.inner.publish_signal.notify_waiters();
    }

    /// Queues a data change batch.
    pub fn push_data_change(&self, subscription_id: u32, items: Vec<(u32, DataValue)>) {
        let monitored_items = items
            .into_iter()
            .map(|(client_handle, value)| MonitoredItemNotification { client_handle, value })
            .collect();
        self.push_message(
            subscription_id,
            vec![NotificationData::DataChange(DataChangeNotification { monitored_items })],
        );
    }

    /// Queues one event.
    pub fn push_event(&self, subscription_id: u32, client_handle: u32, fields: Vec<Variant>) {
        self.push_message(
            subscription_id,
            vec![NotificationData::Event(EventNotificationList {
                events: vec![EventFieldList {
                    client_handle,
                    event_fields: fields,
                }],
            })],
        );
    }

    /// Queues a status change.
    pub fn push_status_change(&self, subscription_id: u32, status: StatusCode) {
        self.push_message(
            subscription_id,
            vec![NotificationData::StatusChange(StatusChangeNotification {
                status,
                diagnostic_info: None,
            })],
        );
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns the recorded traffic in order.
    pub fn events(&self) -> Vec<WireEvent> {
        self.inner.events.lock().clone()
    }

    /// Returns the recorded requests in order.
    pub fn requests(&self) -> Vec<ServiceRequest> {
        self.inner
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                WireEvent::Request(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the names of the recorded events in order.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.inner.events.lock().iter().map(WireEvent::name).collect()
    }

    /// Returns how many requests of `service` were recorded.
    pub fn count(&self, service: &str) -> usize {
        self.inner
            .events
            .lock()
            .iter()
            .filter(|event| event.name() == service)
            .count()
    }

    /// Waits until `count` requests of `service` were recorded.
    pub async fn wait_for(&self, service: &str, count: usize) {
        loop {
            let notified = self.inner.request_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count(service) >= count {
                return;
            }
            notified.await;
        }
    }

    /// Returns every token installed on the connection.
    pub fn installed_tokens(&self) -> Vec<ChannelSecurityToken> {
        self.inner.tokens.lock().clone()
    }

    /// Returns the authentication token currently stamped on requests.
    pub fn authentication_token(&self) -> NodeId {
        self.inner.stamper.authentication_token()
    }

    /// Returns the acknowledgements received with Publish requests.
    pub fn acknowledgements(&self) -> Vec<SubscriptionAcknowledgement> {
        self.inner.acknowledgements.lock().clone()
    }

    /// Returns the ids of live subscriptions.
    pub fn subscription_ids(&self) -> Vec<u32> {
        self.inner.subscriptions.lock().keys().copied().collect()
    }

    /// Returns `(server_handle, client_handle)` of the items of a subscription.
    pub fn monitored_items(&self, subscription_id: u32) -> Vec<(u32, u32)> {
        self.inner
            .subscriptions
            .lock()
            .get(&subscription_id)
            .map(|s| {
                s.items
                    .iter()
                    .map(|(server, item)| (*server, item.client_handle))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns client handle, node and monitoring mode of one item.
    pub fn monitored_item(
        &self,
        subscription_id: u32,
        server_handle: u32,
    ) -> Option<(u32, NodeId, crate::types::MonitoringMode)> {
        self.inner
            .subscriptions
            .lock()
            .get(&subscription_id)?
            .items
            .get(&server_handle)
            .map(|item| (item.client_handle, item.node_id.clone(), item.monitoring_mode))
    }

    /// Returns whether publishing is enabled for a subscription.
    pub fn publishing_enabled(&self, subscription_id: u32) -> Option<bool> {
        self.inner
            .subscriptions
            .lock()
            .get(&subscription_id)
            .map(|s| s.publishing_enabled)
    }

    // =========================================================================
    // Request handling
    // =========================================================================

    fn take_failure(&self, service: &str) -> Option<MockFailure> {
        self.inner
            .failures
            .lock()
            .get_mut(service)
            .and_then(VecDeque::pop_front)
    }

    fn record(&self, event: WireEvent) {
        self.inner.events.lock().push(event);
        self.inner.request_signal.notify_waiters();
    }

    fn ensure_connected(&self) -> UaResult<()> {
        match *self.inner.state.read() {
            TransportState::Connected => Ok(()),
            TransportState::Failed => Err(UaError::connection_closed("mock server killed")),
            _ => Err(ConnectionError::NotConnected.into()),
        }
    }

    async fn respond(&self, request: ServiceRequest) -> UaResult<ServiceResponse> {
        let handle = request.request_header().request_handle;
        let header = ResponseHeader::good(handle);

        let response: ServiceResponse = match request {
            ServiceRequest::OpenSecureChannel(r) => self.open_secure_channel(header, r).into(),
            ServiceRequest::CloseSecureChannel(_) => {
                self.inner.channel_closed.store(true, Ordering::SeqCst);
                self.inner.publish_signal.notify_waiters();
                CloseSecureChannelResponse { response_header: header }.into()
            }
            ServiceRequest::CreateSession(r) => self.create_session(header, r)?.into(),
            ServiceRequest::ActivateSession(_) => ActivateSessionResponse {
                response_header: header,
                server_nonce: create_nonce(SESSION_NONCE_LENGTH),
                results: Vec::new(),
            }
            .into(),
            ServiceRequest::CloseSession(r) => {
                if r.delete_subscriptions {
                    self.inner.subscriptions.lock().clear();
                    self.inner.publish_signal.notify_waiters();
                }
                CloseSessionResponse { response_header: header }.into()
            }
            ServiceRequest::Read(r) => self.read(header, r).into(),
            ServiceRequest::Write(r) => self.write(header, r).into(),
            ServiceRequest::Browse(r) => self.browse(header, r).into(),
            ServiceRequest::CreateSubscription(r) => self.create_subscription(header, r).into(),
            ServiceRequest::ModifySubscription(r) => ModifySubscriptionResponse {
                response_header: header,
                revised_publishing_interval: r.requested_publishing_interval,
                revised_lifetime_count: r.requested_lifetime_count,
                revised_max_keep_alive_count: r.requested_max_keep_alive_count,
            }
            .into(),
            ServiceRequest::SetPublishingMode(r) => {
                let mut subscriptions = self.inner.subscriptions.lock();
                let results = r
                    .subscription_ids
                    .iter()
                    .map(|id| match subscriptions.get_mut(id) {
                        Some(s) => {
                            s.publishing_enabled = r.publishing_enabled;
                            StatusCode::GOOD
                        }
                        None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    })
                    .collect();
                SetPublishingModeResponse { response_header: header, results }.into()
            }
            ServiceRequest::DeleteSubscriptions(r) => {
                let results = {
                    let mut subscriptions = self.inner.subscriptions.lock();
                    r.subscription_ids
                        .iter()
                        .map(|id| match subscriptions.remove(id) {
                            Some(_) => StatusCode::GOOD,
                            None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                        })
                        .collect()
                };
                self.inner.publish_signal.notify_waiters();
                DeleteSubscriptionsResponse { response_header: header, results }.into()
            }
            ServiceRequest::CreateMonitoredItems(r) => self.create_items(header, r).into(),
            ServiceRequest::ModifyMonitoredItems(r) => self.modify_items(header, r).into(),
            ServiceRequest::SetMonitoringMode(r) => {
                let mut subscriptions = self.inner.subscriptions.lock();
                let items = subscriptions.get_mut(&r.subscription_id);
                let results = match items {
                    Some(s) => r
                        .monitored_item_ids
                        .iter()
                        .map(|id| match s.items.get_mut(id) {
                            Some(item) => {
                                item.monitoring_mode = r.monitoring_mode;
                                StatusCode::GOOD
                            }
                            None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                        })
                        .collect(),
                    None => vec![StatusCode::BAD_SUBSCRIPTION_ID_INVALID; r.monitored_item_ids.len()],
                };
                SetMonitoringModeResponse { response_header: header, results }.into()
            }
            ServiceRequest::DeleteMonitoredItems(r) => self.delete_items(header, r).into(),
            ServiceRequest::Publish(r) => return self.publish(header, r).await,
        };
        Ok(response)
    }

    fn open_secure_channel(
        &self,
        header: ResponseHeader,
        request: OpenSecureChannelRequest,
    ) -> OpenSecureChannelResponse {
        let channel_id = match request.request_type {
            SecurityTokenRequestType::Issue => self.inner.channel_id.fetch_add(1, Ordering::SeqCst) + 1,
            SecurityTokenRequestType::Renew => self.inner.channel_id.load(Ordering::SeqCst),
        };
        self.inner.channel_closed.store(false, Ordering::SeqCst);
        let revised_lifetime = self
            .inner
            .settings
            .lock()
            .channel_lifetime
            .unwrap_or(request.requested_lifetime);

        OpenSecureChannelResponse {
            response_header: header,
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id,
                token_id: self.inner.next_token_id.fetch_add(1, Ordering::SeqCst),
                created_at: Utc::now(),
                revised_lifetime,
            },
            server_nonce: create_nonce(request.client_nonce.len()),
        }
    }

    fn create_session(
        &self,
        header: ResponseHeader,
        request: CreateSessionRequest,
    ) -> UaResult<CreateSessionResponse> {
        let n = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        let settings = self.inner.settings.lock();

        let signature = match (&settings.signature_override, &settings.signer) {
            (Some(signature), _) => signature.clone(),
            (None, Some(signer)) => {
                signer.sign(&concat(&request.client_certificate, &request.client_nonce))?
            }
            (None, None) => Vec::new(),
        };
        let algorithm = settings
            .signer
            .as_ref()
            .and_then(|s| s.asymmetric_signature_uri().map(str::to_string));

        Ok(CreateSessionResponse {
            response_header: header,
            session_id: NodeId::numeric(1, n),
            authentication_token: NodeId::numeric(1, 10_000 + n),
            revised_session_timeout: settings
                .session_timeout
                .unwrap_or(request.requested_session_timeout),
            server_nonce: create_nonce(SESSION_NONCE_LENGTH),
            server_certificate: settings.server_certificate.clone(),
            server_endpoints: settings.endpoints.clone(),
            server_signature: SignatureData { algorithm, signature },
            max_request_message_size: 0,
        })
    }

    fn read(&self, header: ResponseHeader, request: ReadRequest) -> ReadResponse {
        let values = self.inner.values.lock();
        let results = request
            .nodes_to_read
            .iter()
            .map(|target| match (values.get(&target.node_id), target.attribute_id) {
                (Some(value), AttributeId::Value) => value.clone(),
                (Some(_), AttributeId::DisplayName) => DataValue::new(Variant::from(
                    LocalizedText::new(target.node_id.to_string()),
                )),
                (Some(_), _) => DataValue::from_status(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
                (None, _) => DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
            })
            .collect();
        ReadResponse { response_header: header, results }
    }

    fn write(&self, header: ResponseHeader, request: WriteRequest) -> WriteResponse {
        let mut values = self.inner.values.lock();
        let results = request
            .nodes_to_write
            .into_iter()
            .map(|write| match values.get_mut(&write.node_id) {
                Some(value) if write.attribute_id == AttributeId::Value => {
                    *value = write.value;
                    StatusCode::GOOD
                }
                Some(_) => StatusCode::BAD_NOT_WRITABLE,
                None => StatusCode::BAD_NODE_ID_UNKNOWN,
            })
            .collect();
        WriteResponse { response_header: header, results }
    }

    fn browse(&self, header: ResponseHeader, request: BrowseRequest) -> BrowseResponse {
        let references = self.inner.references.lock();
        let results = request
            .nodes_to_browse
            .iter()
            .map(|description| match references.get(&description.node_id) {
                Some(refs) => BrowseResult {
                    status_code: StatusCode::GOOD,
                    continuation_point: None,
                    references: refs.clone(),
                },
                None => BrowseResult {
                    status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
                    continuation_point: None,
                    references: Vec::new(),
                },
            })
            .collect();
        BrowseResponse { response_header: header, results }
    }

    fn create_subscription(
        &self,
        header: ResponseHeader,
        request: CreateSubscriptionRequest,
    ) -> CreateSubscriptionResponse {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.inner.subscriptions.lock().insert(
            id,
            MockSubscription {
                items: BTreeMap::new(),
                publishing_enabled: request.publishing_enabled,
            },
        );
        let lifetime_count = self
            .inner
            .settings
            .lock()
            .lifetime_count
            .unwrap_or(request.requested_lifetime_count);

        CreateSubscriptionResponse {
            response_header: header,
            subscription_id: id,
            revised_publishing_interval: request.requested_publishing_interval,
            revised_lifetime_count: lifetime_count,
            revised_max_keep_alive_count: request.requested_max_keep_alive_count,
        }
    }

    fn create_items(
        &self,
        header: ResponseHeader,
        request: CreateMonitoredItemsRequest,
    ) -> CreateMonitoredItemsResponse {
        let rejected = self.inner.settings.lock().rejected_items.clone();
        let mut subscriptions = self.inner.subscriptions.lock();
        let Some(subscription) = subscriptions.get_mut(&request.subscription_id) else {
            return CreateMonitoredItemsResponse {
                response_header: ResponseHeader::with_result(
                    header.request_handle,
                    StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                ),
                results: Vec::new(),
            };
        };

        let results = request
            .items_to_create
            .into_iter()
            .map(|item| {
                if let Some(status) = rejected.get(&item.item_to_monitor.node_id) {
                    return MonitoredItemCreateResult {
                        status_code: *status,
                        monitored_item_id: 0,
                        revised_sampling_interval: 0.0,
                        revised_queue_size: 0,
                        filter_result: None,
                    };
                }
                let server_handle = self.inner.next_server_handle.fetch_add(1, Ordering::SeqCst);
                let parameters = item.requested_parameters;
                subscription.items.insert(
                    server_handle,
                    MockItem {
                        client_handle: parameters.client_handle,
                        node_id: item.item_to_monitor.node_id,
                        monitoring_mode: item.monitoring_mode,
                    },
                );
                MonitoredItemCreateResult {
                    status_code: StatusCode::GOOD,
                    monitored_item_id: server_handle,
                    revised_sampling_interval: parameters.sampling_interval,
                    revised_queue_size: parameters.queue_size.max(1),
                    filter_result: filter_result(parameters.filter.as_ref()),
                }
            })
            .collect();
        CreateMonitoredItemsResponse { response_header: header, results }
    }

    fn modify_items(
        &self,
        header: ResponseHeader,
        request: ModifyMonitoredItemsRequest,
    ) -> ModifyMonitoredItemsResponse {
        let subscriptions = self.inner.subscriptions.lock();
        let items = subscriptions.get(&request.subscription_id).map(|s| &s.items);
        let results = request
            .items_to_modify
            .iter()
            .map(|item| match items.and_then(|i| i.get(&item.monitored_item_id)) {
                Some(_) => MonitoredItemModifyResult {
                    status_code: StatusCode::GOOD,
                    revised_sampling_interval: item.requested_parameters.sampling_interval,
                    revised_queue_size: item.requested_parameters.queue_size.max(1),
                    filter_result: filter_result(item.requested_parameters.filter.as_ref()),
                },
                None => MonitoredItemModifyResult {
                    status_code: StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                    revised_sampling_interval: 0.0,
                    revised_queue_size: 0,
                    filter_result: None,
                },
            })
            .collect();
        ModifyMonitoredItemsResponse { response_header: header, results }
    }

    fn delete_items(
        &self,
        header: ResponseHeader,
        request: DeleteMonitoredItemsRequest,
    ) -> DeleteMonitoredItemsResponse {
        let rejected = self.inner.settings.lock().rejected_deletes.clone();
        let mut subscriptions = self.inner.subscriptions.lock();
        let results = match subscriptions.get_mut(&request.subscription_id) {
            Some(subscription) => request
                .monitored_item_ids
                .iter()
                .map(|id| {
                    if let Some(status) = rejected.get(id) {
                        return *status;
                    }
                    match subscription.items.remove(id) {
                        Some(_) => StatusCode::GOOD,
                        None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                    }
                })
                .collect(),
            None => vec![StatusCode::BAD_SUBSCRIPTION_ID_INVALID; request.monitored_item_ids.len()],
        };
        DeleteMonitoredItemsResponse { response_header: header, results }
    }

    async fn publish(
        &self,
        header: ResponseHeader,
        request: PublishRequest,
    ) -> UaResult<ServiceResponse> {
        self.inner
            .acknowledgements
            .lock()
            .extend(request.subscription_acknowledgements);

        loop {
            let notified = self.inner.publish_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_connected()?;
            if self.inner.channel_closed.load(Ordering::SeqCst) {
                return Err(ChannelError::Closed.into());
            }
            if let Some((subscription_id, message)) = self.inner.publish_queue.lock().pop_front() {
                trace!(subscription_id, sequence_number = message.sequence_number, "Mock publish");
                return Ok(PublishResponse {
                    response_header: header,
                    subscription_id,
                    available_sequence_numbers: vec![message.sequence_number],
                    more_notifications: false,
                    notification_message: message,
                    results: Vec::new(),
                }
                .into());
            }
            if self.inner.subscriptions.lock().is_empty() {
                return Ok(fault(header.request_handle, StatusCode::BAD_NO_SUBSCRIPTION));
            }

            notified.await;
        }
    }
}

fn fault(request_handle: u32, status: StatusCode) -> ServiceResponse {
    ServiceResponse::ServiceFault(ServiceFault {
        response_header: ResponseHeader::with_result(request_handle, status),
    })
}

fn filter_result(filter: Option<&MonitoringFilter>) -> Option<MonitoringFilterResult> {
    filter.and_then(MonitoringFilter::as_event).map(|event| {
        MonitoringFilterResult::Event(EventFilterResult {
            select_clause_results: vec![StatusCode::GOOD; event.select_clauses.len()],
            where_clause_results: Vec::new(),
        })
    })
}

#[async_trait]
impl UaConnection for MockServer {
    async fn connect_socket(&self, endpoint_url: &str, _timeout: Duration) -> UaResult<()> {
        self.record(WireEvent::Connect(endpoint_url.to_string()));
        if self.inner.settings.lock().refuse_connections {
            return Err(ConnectionError::refused_with(
                endpoint_url,
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            )
            .into());
        }
        if let Some(failure) = self.take_failure("Connect") {
            return Err(scripted(failure));
        }
        *self.inner.state.write() = TransportState::Connected;
        Ok(())
    }

    async fn send_hello(
        &self,
        endpoint_url: &str,
        limits: TransportLimits,
    ) -> UaResult<TransportLimits> {
        self.ensure_connected()?;
        self.record(WireEvent::Hello(endpoint_url.to_string()));
        if let Some(failure) = self.take_failure("Hello") {
            return Err(scripted(failure));
        }
        Ok(TransportLimits::negotiated(
            limits.max_recv_buffer_size,
            limits.max_send_buffer_size,
            limits.max_message_size,
            limits.max_chunk_count,
        ))
    }

    async fn send_request(&self, mut request: ServiceRequest) -> UaResult<ServiceResponse> {
        self.ensure_connected()?;
        let handle = self.inner.stamper.stamp(&mut request);
        let service = request.service_name();

        let hook = self.inner.hook.read().clone();
        if let Some(hook) = hook {
            hook(&request);
        }
        self.record(WireEvent::Request(request.clone()));
        debug!(service, request_handle = handle, "Mock request");

        let gate = self.inner.gates.lock().get(service).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(failure) = self.take_failure(service) {
            return match failure {
                MockFailure::Status(status) => Ok(fault(handle, status)),
                MockFailure::Transport => {
                    *self.inner.state.write() = TransportState::Failed;
                    self.inner.publish_signal.notify_waiters();
                    Err(UaError::connection_closed("scripted transport failure"))
                }
            };
        }
        self.respond(request).await
    }

    fn install_security_token(&self, token: &ChannelSecurityToken, _server_nonce: &[u8]) {
        self.inner.tokens.lock().push(token.clone());
    }

    fn set_authentication_token(&self, token: NodeId) {
        self.inner.stamper.set_authentication_token(token);
    }

    async fn disconnect_socket(&self) -> UaResult<()> {
        self.record(WireEvent::Disconnect);
        *self.inner.state.write() = TransportState::Disconnected;
        self.inner.publish_signal.notify_waiters();
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.inner.state.read()
    }
}

fn scripted(failure: MockFailure) -> UaError {
    match failure {
        MockFailure::Status(status) => UaError::status(status),
        MockFailure::Transport => UaError::connection_closed("scripted transport failure"),
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("state", &self.state())
            .field("events", &self.inner.events.lock().len())
            .field("subscriptions", &self.subscription_ids())
            .finish()
    }
}

// =============================================================================
// JsonServiceCodec
// =============================================================================

/// Encodes service bodies as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonServiceCodec;

impl ServiceCodec for JsonServiceCodec {
    fn encode_request(&self, request: &ServiceRequest) -> UaResult<Vec<u8>> {
        serde_json::to_vec(request).map_err(|e| CodecError::encode(e.to_string()).into())
    }

    fn decode_response(&self, body: &[u8]) -> UaResult<ServiceResponse> {
        serde_json::from_slice(body).map_err(|e| CodecError::decode(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish() -> ServiceRequest {
        PublishRequest {
            request_header: RequestHeader::default(),
            subscription_acknowledgements: vec![],
        }
        .into()
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let server = MockServer::new();
        let err = server.send_request(publish()).await.unwrap_err();
        assert!(matches!(err, UaError::Connection(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_publish_without_subscription_faults() {
        let server = MockServer::new();
        server.connect_socket(MOCK_ENDPOINT, Duration::from_secs(1)).await.unwrap();
        let response = server.send_request(publish()).await.unwrap();
        let err = PublishResponse::try_from(response).unwrap_err();
        assert!(err.is_status(StatusCode::BAD_NO_SUBSCRIPTION));
    }

    #[tokio::test]
    async fn test_scripted_fault_and_recording() {
        let server = MockServer::new();
        server.connect_socket(MOCK_ENDPOINT, Duration::from_secs(1)).await.unwrap();
        server.fail_next("Publish", MockFailure::Status(StatusCode::BAD_TIMEOUT));

        let response = server.send_request(publish()).await.unwrap();
        assert!(PublishResponse::try_from(response)
            .unwrap_err()
            .is_status(StatusCode::BAD_TIMEOUT));
        assert_eq!(server.event_names(), vec!["Connect", "Publish"]);
        assert_eq!(server.requests()[0].request_header().timeout_hint, 0);
    }

    #[test]
    fn test_json_codec_round_trip() {
        let codec = JsonServiceCodec;
        let body = serde_json::to_vec(&ServiceResponse::from(CloseSessionResponse::default())).unwrap();
        let response = codec.decode_response(&body).unwrap();
        assert_eq!(response.service_name(), "CloseSession");
        assert!(codec.decode_response(b"{").is_err());
    }
}
