// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The OPC UA client.
//!
//! [`Client`] drives the handshake, keeps the session alive, and hands out
//! subscriptions.
//!
//! ```text
//! Disconnected ─► SocketOpen ─► HelloSent ─► ChannelOpen ─► SessionCreated ─► SessionActive
//!       ▲              │            │             │               │
//!       └──────────────┴────────────┴─────────────┴───────────────┘
//!                       any failure: close socket, re-raise
//! ```
//!
//! Teardown runs CloseSession, CloseSecureChannel and socket close in that
//! order; every step runs even if an earlier one failed.
//!
//! # Examples
//!
//! ```rust,ignore
//! use ualink_client::{Client, ClientConfig};
//!
//! let config = ClientConfig::new("opc.tcp://localhost:4840");
//! let client = Client::builder(config).codec(codec).build()?;
//! client.connect().await?;
//!
//! let values = client.read_values(&[NodeId::string(2, "Temperature")]).await?;
//! client.disconnect().await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, SubscriptionParameters};
use crate::error::{ConnectionError, SecurityError, SubscriptionError, UaError, UaResult};
use crate::messages::{
    ApplicationDescription, ApplicationType, BrowseDescription, BrowseRequest, BrowseResponse,
    ReadRequest, ReadResponse, ReadValueId, ReferenceDescription, RequestHeader, WriteRequest,
    WriteResponse, WriteValue,
};
use crate::registry::TypeRegistry;
use crate::security::{
    NoSecurity, NoSecurityFactory, SecurityPolicy, SecurityPolicyFactory, UserCertificate,
};
use crate::transport::tcp::{ServiceCodec, TcpConnection};
use crate::transport::UaConnection;
use crate::types::{
    AttributeId, BrowseDirection, DataValue, LocalizedText, NodeId, SecurityPolicyKind,
    StatusCode, TimestampsToReturn,
};

use super::channel::{SecureChannel, SecureChannelManager};
use super::renewal::RenewalStatus;
use super::session::{SessionInfo, SessionManager, SessionSettings, UserIdentity};
use super::subscription::{
    PublishEngine, StatusChangeHandler, StatusHandlerSlot, Subscription, SubscriptionContext,
    SubscriptionHandler,
};

/// Browse result mask: every field.
const BROWSE_RESULT_MASK_ALL: u32 = 0x3F;

// =============================================================================
// ConnectionState
// =============================================================================

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Socket open.
    SocketOpen,
    /// Hello acknowledged.
    HelloSent,
    /// Secure channel open.
    ChannelOpen,
    /// Session created, not yet activated.
    SessionCreated,
    /// Session activated; application traffic is accepted.
    SessionActive,
}

impl ConnectionState {
    /// Returns `true` if application traffic is accepted.
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::SessionActive)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::SocketOpen => write!(f, "SocketOpen"),
            Self::HelloSent => write!(f, "HelloSent"),
            Self::ChannelOpen => write!(f, "ChannelOpen"),
            Self::SessionCreated => write!(f, "SessionCreated"),
            Self::SessionActive => write!(f, "SessionActive"),
        }
    }
}

// =============================================================================
// ClientBuilder
// =============================================================================

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    connection: Option<Arc<dyn UaConnection>>,
    codec: Option<Arc<dyn ServiceCodec>>,
    policy: Option<Arc<dyn SecurityPolicy>>,
    factory: Option<Arc<dyn SecurityPolicyFactory>>,
    user_certificate: Option<UserCertificate>,
    registry: Option<Arc<TypeRegistry>>,
}

impl ClientBuilder {
    /// Uses `connection` instead of a TCP connection.
    pub fn connection(mut self, connection: Arc<dyn UaConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Sets the service body codec of the TCP connection.
    pub fn codec(mut self, codec: Arc<dyn ServiceCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Sets the channel security policy.
    pub fn security_policy(mut self, policy: Arc<dyn SecurityPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the factory creating policies for user token encryption.
    pub fn policy_factory(mut self, factory: Arc<dyn SecurityPolicyFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Authenticates with an X.509 user certificate.
    pub fn user_certificate(mut self, certificate: UserCertificate) -> Self {
        self.user_certificate = Some(certificate);
        self
    }

    /// Shares a type registry instead of creating one.
    pub fn registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validates the configuration and builds the client.
    pub fn build(self) -> UaResult<Client> {
        let config = self.config;
        config.validate()?;

        let policy: Arc<dyn SecurityPolicy> = match self.policy {
            Some(policy) if policy.uri() == config.security_policy.uri() => policy,
            Some(policy) => {
                return Err(UaError::invalid_config(
                    "security_policy",
                    format!(
                        "configured {} but the policy implements {}",
                        config.security_policy.uri(),
                        policy.uri()
                    ),
                ))
            }
            None if config.security_policy == SecurityPolicyKind::None => Arc::new(NoSecurity),
            None => return Err(SecurityError::unsupported_policy(config.security_policy.uri()).into()),
        };

        let connection: Arc<dyn UaConnection> = match (self.connection, self.codec) {
            (Some(connection), _) => connection,
            (None, Some(codec)) => Arc::new(TcpConnection::new(&config, codec, Arc::clone(&policy))),
            (None, None) => {
                return Err(UaError::invalid_config(
                    "codec",
                    "a service codec is required for the TCP transport",
                ))
            }
        };

        let channel = Arc::new(SecureChannelManager::new(
            Arc::clone(&connection),
            policy,
            config.security_mode,
            config.secure_channel_lifetime_ms(),
        ));
        let session = SessionManager::new(
            Arc::clone(&connection),
            Arc::clone(&channel),
            self.factory.unwrap_or_else(|| Arc::new(NoSecurityFactory)),
            SessionSettings {
                endpoint_url: config.endpoint_url.clone(),
                session_name: config.session_name.clone(),
                max_response_message_size: config.transport_limits.max_message_size,
                locale_ids: config.locale_ids.clone(),
            },
        );
        let identity = UserIdentity::from_credentials(
            config.username.as_deref(),
            config.password.as_deref(),
            self.user_certificate,
        );
        let publisher = Arc::new(PublishEngine::new(
            Arc::clone(&connection),
            config.max_inflight_publish,
        ));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Client {
            config,
            connection,
            channel,
            session,
            identity,
            registry: self.registry.unwrap_or_default(),
            status_handler: StatusHandlerSlot::default(),
            publisher,
            state,
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// An OPC UA client bound to one endpoint.
pub struct Client {
    config: ClientConfig,
    connection: Arc<dyn UaConnection>,
    channel: Arc<SecureChannelManager>,
    session: SessionManager,
    identity: UserIdentity,
    registry: Arc<TypeRegistry>,
    status_handler: StatusHandlerSlot,
    publisher: Arc<PublishEngine>,
    state: watch::Sender<ConnectionState>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Client {
    /// Starts building a client for `config`.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            connection: None,
            codec: None,
            policy: None,
            factory: None,
            user_certificate: None,
            registry: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Runs the handshake up to an active session.
    ///
    /// On failure the socket is closed, the state returns to
    /// `Disconnected`, and the original error is returned.
    pub async fn connect(&self) -> UaResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state();
        if current != ConnectionState::Disconnected {
            return Err(ConnectionError::invalid_state(ConnectionState::Disconnected, current).into());
        }

        match self.handshake().await {
            Ok(()) => {
                info!(endpoint = %self.config.endpoint_url, "Connected");
                Ok(())
            }
            Err(e) => {
                e.log("connect");
                self.rollback().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> UaResult<()> {
        let endpoint = self.config.endpoint_url.as_str();

        self.connection
            .connect_socket(endpoint, self.config.connect_timeout)
            .await?;
        self.set_state(ConnectionState::SocketOpen);

        let limits = self
            .connection
            .send_hello(endpoint, self.config.transport_limits)
            .await?;
        debug!(
            send_buffer = limits.max_send_buffer_size,
            recv_buffer = limits.max_recv_buffer_size,
            max_chunks = limits.max_chunk_count,
            max_message = limits.max_message_size,
            "Transport limits negotiated"
        );
        self.set_state(ConnectionState::HelloSent);

        self.channel.open(false).await?;
        self.set_state(ConnectionState::ChannelOpen);

        self.session
            .create(&self.application_description(), self.config.session_timeout)
            .await?;
        self.set_state(ConnectionState::SessionCreated);
        self.session.start_renewal();

        self.session.activate(&self.identity).await?;
        self.set_state(ConnectionState::SessionActive);
        Ok(())
    }

    async fn rollback(&self) {
        self.session.stop_renewal().await;
        self.session.reset();
        self.channel.reset();
        if let Err(e) = self.connection.disconnect_socket().await {
            debug!(error = %e, "Socket close during rollback failed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Closes session, channel and socket.
    ///
    /// Every step runs; the first failure is returned afterwards.
    pub async fn disconnect(&self) -> UaResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }

        self.publisher.stop().await;
        self.publisher.clear();

        let session = self.session.close().await;
        let channel = self.channel.close().await;
        let socket = self.connection.disconnect_socket().await;
        self.set_state(ConnectionState::Disconnected);

        let mut first_error = None;
        for (step, result) in [("close session", session), ("close channel", channel), ("close socket", socket)] {
            if let Err(e) = result {
                warn!(step, error = %e, "Teardown step failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(endpoint = %self.config.endpoint_url, "Disconnected");
                Ok(())
            }
        }
    }

    /// Closes the session but keeps the secure channel open.
    pub async fn close_session(&self) -> UaResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.publisher.stop().await;
        self.publisher.clear();
        let result = self.session.close().await;
        if self.state() > ConnectionState::ChannelOpen {
            self.set_state(ConnectionState::ChannelOpen);
        }
        result
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Returns the handshake state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver of handshake state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn ensure_active(&self) -> UaResult<()> {
        match self.state() {
            ConnectionState::SessionActive => Ok(()),
            ConnectionState::Disconnected => Err(UaError::not_connected()),
            state => Err(ConnectionError::invalid_state(ConnectionState::SessionActive, state).into()),
        }
    }

    /// Returns the renewal loop status.
    pub fn renewal_status(&self) -> RenewalStatus {
        self.session.renewal_status()
    }

    /// Returns a receiver of renewal status updates, once renewal started.
    pub fn watch_renewal(&self) -> Option<watch::Receiver<RenewalStatus>> {
        self.session.watch_renewal()
    }

    /// Returns the current session.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.info()
    }

    /// Returns the open secure channel.
    pub fn secure_channel(&self) -> Option<SecureChannel> {
        self.channel.current()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the type registry of this client.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Installs the handler receiving subscription status changes.
    pub fn set_status_change_handler(&self, handler: Arc<dyn StatusChangeHandler>) {
        *self.status_handler.write() = Some(handler);
    }

    /// Removes the status change handler.
    pub fn clear_status_change_handler(&self) {
        self.status_handler.write().take();
    }

    fn application_description(&self) -> ApplicationDescription {
        ApplicationDescription {
            application_uri: self.config.application_uri.clone(),
            product_uri: self.config.product_uri.clone(),
            application_name: LocalizedText::new(self.config.application_name.clone()),
            application_type: ApplicationType::Client,
            discovery_urls: Vec::new(),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Creates a subscription with parameters derived from the session
    /// timeout.
    pub async fn create_subscription(
        &self,
        publishing_interval: Duration,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> UaResult<Arc<Subscription>> {
        let parameters =
            SubscriptionParameters::for_session(publishing_interval, self.session.session_timeout());
        self.create_subscription_with(&parameters, handler).await
    }

    /// Creates a subscription with explicit parameters.
    pub async fn create_subscription_with(
        &self,
        parameters: &SubscriptionParameters,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> UaResult<Arc<Subscription>> {
        self.ensure_active()?;
        if parameters.max_keepalive_count == 0 {
            return Err(SubscriptionError::invalid_parameters("max_keepalive_count must be at least 1").into());
        }

        let context = SubscriptionContext {
            connection: Arc::clone(&self.connection),
            status_handler: Arc::clone(&self.status_handler),
            registry: Arc::clone(&self.registry),
            publisher: Arc::downgrade(&self.publisher),
        };
        let subscription = Subscription::create(context, parameters, handler).await?;
        self.publisher.register(Arc::clone(&subscription));
        Ok(subscription)
    }

    /// Returns the ids of the subscriptions receiving notifications.
    pub fn subscription_ids(&self) -> Vec<u32> {
        self.publisher.subscription_ids()
    }

    // =========================================================================
    // Address space
    // =========================================================================

    /// Reads attributes, one value per target.
    pub async fn read(&self, targets: Vec<ReadValueId>) -> UaResult<Vec<DataValue>> {
        self.ensure_active()?;
        let request = ReadRequest {
            request_header: RequestHeader::default(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: targets,
        };
        let response: ReadResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;
        Ok(response.results)
    }

    /// Reads the Value attribute of each node.
    pub async fn read_values(&self, nodes: &[NodeId]) -> UaResult<Vec<DataValue>> {
        self.read(nodes.iter().cloned().map(ReadValueId::value).collect())
            .await
    }

    /// Writes the Value attribute of one node.
    pub async fn write_value(&self, node_id: NodeId, value: DataValue) -> UaResult<()> {
        self.ensure_active()?;
        let request = WriteRequest {
            request_header: RequestHeader::default(),
            nodes_to_write: vec![WriteValue {
                node_id,
                attribute_id: AttributeId::Value,
                index_range: None,
                value,
            }],
        };
        let response: WriteResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;
        response
            .results
            .first()
            .copied()
            .unwrap_or(StatusCode::BAD_UNEXPECTED_ERROR)
            .check()
    }

    /// Returns the forward hierarchical references of a node.
    pub async fn browse(&self, node_id: NodeId) -> UaResult<Vec<ReferenceDescription>> {
        self.ensure_active()?;
        let request = BrowseRequest {
            request_header: RequestHeader::default(),
            requested_max_references_per_node: 0,
            nodes_to_browse: vec![BrowseDescription {
                node_id,
                browse_direction: BrowseDirection::Forward,
                reference_type_id: NodeId::HIERARCHICAL_REFERENCES,
                include_subtypes: true,
                node_class_mask: 0,
                result_mask: BROWSE_RESULT_MASK_ALL,
            }],
        };
        let response: BrowseResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| UaError::malformed("browse returned no result"))?;
        result.status_code.check()?;
        Ok(result.references)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.config.endpoint_url)
            .field("state", &self.state())
            .field("subscriptions", &self.subscription_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::subscription::ChannelHandler;
    use crate::messages::ServiceRequest;
    use crate::testing::{MockFailure, MockServer, WireEvent, MOCK_ENDPOINT};
    use crate::types::{NodeClass, QualifiedName, Variant};

    fn client(server: &MockServer) -> Client {
        Client::builder(ClientConfig::new(MOCK_ENDPOINT))
            .connection(Arc::new(server.clone()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_order() {
        let server = MockServer::new();
        let client = client(&server);
        client.connect().await.unwrap();

        assert_eq!(client.state(), ConnectionState::SessionActive);
        assert_eq!(
            server.event_names(),
            vec!["Connect", "Hello", "OpenSecureChannel", "CreateSession", "ActivateSession"]
        );
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_session_rolls_back() {
        let server = MockServer::new();
        server.fail_next("CreateSession", MockFailure::Status(StatusCode::BAD_TOO_MANY_OPERATIONS));
        let client = client(&server);

        let err = client.connect().await.unwrap_err();
        assert!(err.is_status(StatusCode::BAD_TOO_MANY_OPERATIONS));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(server.events().last(), Some(&WireEvent::Disconnect));
        assert!(client.secure_channel().is_none());
    }

    #[tokio::test]
    async fn test_failed_activation_stops_renewal() {
        let server = MockServer::new();
        server.fail_next("ActivateSession", MockFailure::Status(StatusCode::BAD_IDENTITY_TOKEN_REJECTED));
        let client = client(&server);

        assert!(client.connect().await.is_err());
        assert_eq!(client.renewal_status(), RenewalStatus::Stopped);
        assert!(client.session_info().is_none());
        assert!(server.authentication_token().is_null());
    }

    #[tokio::test]
    async fn test_refused_socket() {
        let server = MockServer::new();
        server.refuse_connections(true);
        let client = client(&server);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, UaError::Connection(ConnectionError::Refused { .. })));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_twice() {
        let server = MockServer::new();
        let client = client(&server);
        client.connect().await.unwrap();
        assert!(client.connect().await.is_err());
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_continues_after_failure() {
        let server = MockServer::new();
        let client = client(&server);
        client.connect().await.unwrap();
        server.fail_next("CloseSession", MockFailure::Status(StatusCode::BAD_SESSION_ID_INVALID));

        let err = client.disconnect().await.unwrap_err();
        assert!(err.is_status(StatusCode::BAD_SESSION_ID_INVALID));
        let names = server.event_names();
        assert_eq!(names[names.len() - 3..], ["CloseSession", "CloseSecureChannel", "Disconnect"]);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_traffic_requires_active_session() {
        let server = MockServer::new();
        let client = client(&server);
        let err = client.read_values(&[NodeId::SERVER_STATUS_STATE]).await.unwrap_err();
        assert!(matches!(err, UaError::Connection(ConnectionError::NotConnected)));

        let (handler, _rx) = ChannelHandler::with_channel(1);
        assert!(client
            .create_subscription(Duration::from_millis(100), Arc::new(handler))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_read_write_browse() {
        let server = MockServer::new();
        let node = NodeId::string(2, "Setpoint");
        server.set_value(node.clone(), DataValue::new(1.5f64));
        server.add_reference(
            NodeId::OBJECTS_FOLDER,
            ReferenceDescription {
                reference_type_id: NodeId::numeric(0, 35),
                is_forward: true,
                node_id: node.clone(),
                browse_name: QualifiedName::new(2, "Setpoint"),
                display_name: LocalizedText::new("Setpoint"),
                node_class: NodeClass::Variable,
                type_definition: NodeId::numeric(0, 63),
            },
        );
        let client = client(&server);
        client.connect().await.unwrap();

        client.write_value(node.clone(), DataValue::new(2.5f64)).await.unwrap();
        let values = client.read_values(&[node.clone()]).await.unwrap();
        assert_eq!(values[0].value(), &Variant::Double(2.5));

        let err = client
            .write_value(NodeId::string(2, "Missing"), DataValue::new(1i32))
            .await
            .unwrap_err();
        assert!(err.is_status(StatusCode::BAD_NODE_ID_UNKNOWN));

        let references = client.browse(NodeId::OBJECTS_FOLDER).await.unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].node_id, node);

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifetime_raised_to_three_keepalives() {
        let server = MockServer::new();
        server.set_lifetime_count(2);
        let client = client(&server);
        client.connect().await.unwrap();

        let (handler, _rx) = ChannelHandler::with_channel(8);
        let subscription = client
            .create_subscription(Duration::from_millis(100), Arc::new(handler))
            .await
            .unwrap();

        let modify = server
            .requests()
            .into_iter()
            .find_map(|r| match r {
                ServiceRequest::ModifySubscription(m) => Some(m),
                _ => None,
            })
            .unwrap();
        let keepalive = subscription.parameters().max_keepalive_count;
        assert_eq!(modify.requested_lifetime_count, keepalive * 3);
        assert_eq!(subscription.parameters().lifetime_count, keepalive * 3);

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_lifetime_fix_deletes_subscription() {
        let server = MockServer::new();
        server.set_lifetime_count(2);
        server.fail_next("ModifySubscription", MockFailure::Status(StatusCode::BAD_TOO_MANY_OPERATIONS));
        let client = client(&server);
        client.connect().await.unwrap();

        let (handler, _rx) = ChannelHandler::with_channel(8);
        let err = client
            .create_subscription(Duration::from_millis(100), Arc::new(handler))
            .await
            .unwrap_err();

        assert!(err.is_status(StatusCode::BAD_TOO_MANY_OPERATIONS));
        assert_eq!(server.count("DeleteSubscriptions"), 1);
        assert!(server.subscription_ids().is_empty());
        assert!(client.subscription_ids().is_empty());

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_delete_still_marks_subscription_deleted() {
        let server = MockServer::new();
        let client = client(&server);
        client.connect().await.unwrap();

        let (handler, _rx) = ChannelHandler::with_channel(8);
        let subscription = client
            .create_subscription(Duration::from_millis(100), Arc::new(handler))
            .await
            .unwrap();

        // The server forgets the subscription behind the client's back.
        let request = crate::messages::DeleteSubscriptionsRequest {
            request_header: crate::messages::RequestHeader::default(),
            subscription_ids: vec![subscription.id()],
        };
        server.send_request(request.into()).await.unwrap();

        let err = subscription.delete().await.unwrap_err();
        assert!(err.is_status(StatusCode::BAD_SUBSCRIPTION_ID_INVALID));
        assert_eq!(subscription.state(), crate::client::SubscriptionState::Deleted);

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_from_session_timeout() {
        let server = MockServer::new();
        server.set_session_timeout(60_000.0);
        let client = client(&server);
        client.connect().await.unwrap();

        let (handler, _rx) = ChannelHandler::with_channel(8);
        let subscription = client
            .create_subscription(Duration::from_millis(1000), Arc::new(handler))
            .await
            .unwrap();
        // 60000 / 1000 * 0.75 / 3
        assert_eq!(subscription.parameters().max_keepalive_count, 15);
        assert_eq!(subscription.parameters().lifetime_count, 10_000);
        assert_eq!(client.subscription_ids(), vec![subscription.id()]);

        client.disconnect().await.unwrap();
    }

    #[test]
    fn test_build_requires_codec_without_connection() {
        let err = Client::builder(ClientConfig::new(MOCK_ENDPOINT)).build().unwrap_err();
        assert!(matches!(err, UaError::Configuration(_)));
    }
}
