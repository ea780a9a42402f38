// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Typed service messages used by the client core.
//!
//! Only the services on the handshake and subscription path are modelled,
//! plus Read/Write/Browse for the address-space helpers. Every request is
//! wrapped in [`ServiceRequest`] before it reaches a
//! [`UaConnection`](crate::transport::UaConnection), and every response
//! comes back as a [`ServiceResponse`].
//!
//! Converting a [`ServiceResponse`] into a concrete response type with
//! `TryFrom` turns a `ServiceFault`, or a response header carrying a bad
//! service result, into [`UaError::Status`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UaError, UaResult};
use crate::types::{
    AttributeId, BrowseDirection, DataChangeTrigger, DataValue, DeadbandType, LocalizedText,
    MessageSecurityMode, MonitoringMode, NodeClass, NodeId, QualifiedName, StatusCode,
    TimestampsToReturn, UserTokenType, Variant,
};

// =============================================================================
// Headers
// =============================================================================

/// Common header of every request.
///
/// The connection stamps the authentication token, request handle,
/// timestamp and timeout hint just before sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Session authentication token; null before CreateSession.
    pub authentication_token: NodeId,
    /// Send time.
    pub timestamp: DateTime<Utc>,
    /// Client-assigned handle echoed in the response.
    pub request_handle: u32,
    /// Requested diagnostics mask.
    pub return_diagnostics: u32,
    /// Timeout hint in milliseconds; 0 means none.
    pub timeout_hint: u32,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self {
            authentication_token: NodeId::null(),
            timestamp: Utc::now(),
            request_handle: 0,
            return_diagnostics: 0,
            timeout_hint: 0,
        }
    }
}

/// Common header of every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Server time of the response.
    pub timestamp: DateTime<Utc>,
    /// Echo of the request handle.
    pub request_handle: u32,
    /// Overall service result.
    pub service_result: StatusCode,
}

impl ResponseHeader {
    /// Creates a Good header for the given request handle.
    pub fn good(request_handle: u32) -> Self {
        Self::with_result(request_handle, StatusCode::GOOD)
    }

    /// Creates a header carrying the given service result.
    pub fn with_result(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: Utc::now(),
            request_handle,
            service_result,
        }
    }
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self::good(0)
    }
}

// =============================================================================
// Secure channel
// =============================================================================

/// Whether an OpenSecureChannel issues a new token or renews the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityTokenRequestType {
    /// First open.
    Issue,
    /// Renewal of an open channel.
    Renew,
}

/// Token issued by the server for a secure channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSecurityToken {
    /// Secure channel id.
    pub channel_id: u32,
    /// Token id.
    pub token_id: u32,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Lifetime revised by the server, in milliseconds.
    pub revised_lifetime: u32,
}

/// OpenSecureChannel request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSecureChannelRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Protocol version.
    pub client_protocol_version: u32,
    /// Issue or renew.
    pub request_type: SecurityTokenRequestType,
    /// Channel security mode.
    pub security_mode: MessageSecurityMode,
    /// Client nonce.
    pub client_nonce: Vec<u8>,
    /// Requested lifetime in milliseconds.
    pub requested_lifetime: u32,
}

/// OpenSecureChannel response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSecureChannelResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// Protocol version.
    pub server_protocol_version: u32,
    /// Issued token.
    pub security_token: ChannelSecurityToken,
    /// Server nonce.
    pub server_nonce: Vec<u8>,
}

/// CloseSecureChannel request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseSecureChannelRequest {
    /// Request header.
    pub request_header: RequestHeader,
}

/// CloseSecureChannel response.
///
/// Servers do not send one; the connection produces it locally once the
/// CLO message is written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseSecureChannelResponse {
    /// Response header.
    pub response_header: ResponseHeader,
}

// =============================================================================
// Session
// =============================================================================

/// Application kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ApplicationType {
    /// Server.
    Server,
    /// Client.
    #[default]
    Client,
    /// Client and server.
    ClientAndServer,
}

/// Description of an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDescription {
    /// Application URI.
    pub application_uri: String,
    /// Product URI.
    pub product_uri: String,
    /// Display name.
    pub application_name: LocalizedText,
    /// Application kind.
    pub application_type: ApplicationType,
    /// Discovery URLs.
    pub discovery_urls: Vec<String>,
}

/// A user token policy offered by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTokenPolicy {
    /// Policy id to quote in the identity token.
    pub policy_id: String,
    /// Token kind.
    pub token_type: UserTokenType,
    /// Security policy for encrypting the token; empty means the channel policy.
    pub security_policy_uri: Option<String>,
}

/// An endpoint offered by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescription {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Server certificate (DER).
    pub server_certificate: Vec<u8>,
    /// Security mode.
    pub security_mode: MessageSecurityMode,
    /// Security policy URI.
    pub security_policy_uri: String,
    /// Accepted user tokens.
    pub user_identity_tokens: Vec<UserTokenPolicy>,
    /// Relative security level.
    pub security_level: u8,
}

/// Algorithm URI plus signature bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    /// Algorithm URI.
    pub algorithm: Option<String>,
    /// Signature.
    pub signature: Vec<u8>,
}

/// CreateSession request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Client application.
    pub client_description: ApplicationDescription,
    /// Endpoint URL used to connect.
    pub endpoint_url: String,
    /// Session name.
    pub session_name: String,
    /// Client nonce.
    pub client_nonce: Vec<u8>,
    /// Client certificate (DER).
    pub client_certificate: Vec<u8>,
    /// Requested session timeout in milliseconds.
    pub requested_session_timeout: f64,
    /// Largest response the client accepts; 0 means no limit.
    pub max_response_message_size: u32,
}

/// CreateSession response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// Session id.
    pub session_id: NodeId,
    /// Token that authenticates later requests.
    pub authentication_token: NodeId,
    /// Revised session timeout in milliseconds.
    pub revised_session_timeout: f64,
    /// Server nonce.
    pub server_nonce: Vec<u8>,
    /// Server certificate (DER).
    pub server_certificate: Vec<u8>,
    /// Endpoints of the server.
    pub server_endpoints: Vec<EndpointDescription>,
    /// Signature over client certificate and client nonce.
    pub server_signature: SignatureData,
    /// Largest request the server accepts.
    pub max_request_message_size: u32,
}

/// Anonymous identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousIdentityToken {
    /// Policy id.
    pub policy_id: String,
}

/// Username/password identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNameIdentityToken {
    /// Policy id.
    pub policy_id: String,
    /// User name.
    pub user_name: String,
    /// Password, plain or encrypted.
    pub password: Vec<u8>,
    /// Encryption algorithm URI; `None` for plaintext.
    pub encryption_algorithm: Option<String>,
}

/// X.509 identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509IdentityToken {
    /// Policy id.
    pub policy_id: String,
    /// User certificate (DER).
    pub certificate_data: Vec<u8>,
}

/// The identity token carried by ActivateSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserIdentityToken {
    /// Anonymous.
    Anonymous(AnonymousIdentityToken),
    /// Username/password.
    UserName(UserNameIdentityToken),
    /// X.509 certificate.
    X509(X509IdentityToken),
}

impl UserIdentityToken {
    /// Returns the token kind.
    pub fn token_type(&self) -> UserTokenType {
        match self {
            Self::Anonymous(_) => UserTokenType::Anonymous,
            Self::UserName(_) => UserTokenType::UserName,
            Self::X509(_) => UserTokenType::Certificate,
        }
    }

    /// Returns the policy id.
    pub fn policy_id(&self) -> &str {
        match self {
            Self::Anonymous(t) => &t.policy_id,
            Self::UserName(t) => &t.policy_id,
            Self::X509(t) => &t.policy_id,
        }
    }
}

/// ActivateSession request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateSessionRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Signature over server certificate and server nonce.
    pub client_signature: SignatureData,
    /// Preferred locales.
    pub locale_ids: Vec<String>,
    /// User identity.
    pub user_identity_token: UserIdentityToken,
    /// Signature made with the user's key for X.509 tokens.
    pub user_token_signature: SignatureData,
}

/// ActivateSession response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateSessionResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// New server nonce.
    pub server_nonce: Vec<u8>,
    /// Per software certificate results.
    pub results: Vec<StatusCode>,
}

/// CloseSession request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Delete the session's subscriptions as well.
    pub delete_subscriptions: bool,
}

/// CloseSession response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    /// Response header.
    pub response_header: ResponseHeader,
}

// =============================================================================
// Attribute services
// =============================================================================

/// Identifies one attribute of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadValueId {
    /// Node.
    pub node_id: NodeId,
    /// Attribute.
    pub attribute_id: AttributeId,
    /// Optional index range.
    pub index_range: Option<String>,
    /// Optional data encoding.
    pub data_encoding: Option<QualifiedName>,
}

impl ReadValueId {
    /// Creates a reference to an attribute of a node.
    pub fn new(node_id: NodeId, attribute_id: AttributeId) -> Self {
        Self {
            node_id,
            attribute_id,
            index_range: None,
            data_encoding: None,
        }
    }

    /// Creates a reference to the Value attribute.
    pub fn value(node_id: NodeId) -> Self {
        Self::new(node_id, AttributeId::Value)
    }
}

/// Read request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Maximum cached value age in milliseconds.
    pub max_age: f64,
    /// Timestamps to return.
    pub timestamps_to_return: TimestampsToReturn,
    /// Attributes to read.
    pub nodes_to_read: Vec<ReadValueId>,
}

/// Read response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One value per requested attribute.
    pub results: Vec<DataValue>,
}

/// One attribute write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteValue {
    /// Node.
    pub node_id: NodeId,
    /// Attribute.
    pub attribute_id: AttributeId,
    /// Optional index range.
    pub index_range: Option<String>,
    /// Value to write.
    pub value: DataValue,
}

/// Write request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Writes.
    pub nodes_to_write: Vec<WriteValue>,
}

/// Write response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One status per write.
    pub results: Vec<StatusCode>,
}

/// What to browse from one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseDescription {
    /// Start node.
    pub node_id: NodeId,
    /// Reference direction.
    pub browse_direction: BrowseDirection,
    /// Reference type to follow.
    pub reference_type_id: NodeId,
    /// Follow subtypes of the reference type.
    pub include_subtypes: bool,
    /// Node class filter; 0 means all.
    pub node_class_mask: u32,
    /// Fields to return.
    pub result_mask: u32,
}

/// One reference returned by Browse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDescription {
    /// Reference type.
    pub reference_type_id: NodeId,
    /// Direction.
    pub is_forward: bool,
    /// Target node.
    pub node_id: NodeId,
    /// Browse name.
    pub browse_name: QualifiedName,
    /// Display name.
    pub display_name: LocalizedText,
    /// Node class.
    pub node_class: NodeClass,
    /// Type definition.
    pub type_definition: NodeId,
}

/// Browse result for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseResult {
    /// Status.
    pub status_code: StatusCode,
    /// Continuation point if references remain.
    pub continuation_point: Option<Vec<u8>>,
    /// References found.
    pub references: Vec<ReferenceDescription>,
}

/// Browse request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Maximum references per node; 0 means no limit.
    pub requested_max_references_per_node: u32,
    /// Nodes to browse.
    pub nodes_to_browse: Vec<BrowseDescription>,
}

/// Browse response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One result per node.
    pub results: Vec<BrowseResult>,
}

// =============================================================================
// Subscriptions
// =============================================================================

/// CreateSubscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Lifetime count.
    pub requested_lifetime_count: u32,
    /// Keep-alive count.
    pub requested_max_keep_alive_count: u32,
    /// Notifications per publish.
    pub max_notifications_per_publish: u32,
    /// Publishing enabled.
    pub publishing_enabled: bool,
    /// Priority.
    pub priority: u8,
}

/// CreateSubscription response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscriptionResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// Subscription id.
    pub subscription_id: u32,
    /// Revised publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// Revised lifetime count.
    pub revised_lifetime_count: u32,
    /// Revised keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

/// ModifySubscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifySubscriptionRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Subscription id.
    pub subscription_id: u32,
    /// Publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Lifetime count.
    pub requested_lifetime_count: u32,
    /// Keep-alive count.
    pub requested_max_keep_alive_count: u32,
    /// Notifications per publish.
    pub max_notifications_per_publish: u32,
    /// Priority.
    pub priority: u8,
}

/// ModifySubscription response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifySubscriptionResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// Revised publishing interval in milliseconds.
    pub revised_publishing_interval: f64,
    /// Revised lifetime count.
    pub revised_lifetime_count: u32,
    /// Revised keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

/// SetPublishingMode request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPublishingModeRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Enable or disable.
    pub publishing_enabled: bool,
    /// Subscriptions.
    pub subscription_ids: Vec<u32>,
}

/// SetPublishingMode response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPublishingModeResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One status per subscription.
    pub results: Vec<StatusCode>,
}

/// DeleteSubscriptions request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteSubscriptionsRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Subscriptions.
    pub subscription_ids: Vec<u32>,
}

/// DeleteSubscriptions response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteSubscriptionsResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One status per subscription.
    pub results: Vec<StatusCode>,
}

// =============================================================================
// Monitored items
// =============================================================================

/// Data change filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DataChangeFilter {
    /// Reporting trigger.
    pub trigger: DataChangeTrigger,
    /// Deadband kind.
    pub deadband_type: DeadbandType,
    /// Deadband value.
    pub deadband_value: f64,
}

/// Selects one field of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleAttributeOperand {
    /// Event type the path starts from.
    pub type_definition_id: NodeId,
    /// Browse path to the field.
    pub browse_path: Vec<QualifiedName>,
    /// Attribute of the field.
    pub attribute_id: AttributeId,
    /// Optional index range.
    pub index_range: Option<String>,
}

impl SimpleAttributeOperand {
    /// Selects the Value of a BaseEventType property.
    pub fn base_event_property(name: impl Into<String>) -> Self {
        Self {
            type_definition_id: NodeId::BASE_EVENT_TYPE,
            browse_path: vec![QualifiedName::new(0, name)],
            attribute_id: AttributeId::Value,
            index_range: None,
        }
    }

    /// Returns the field name used when decoding events.
    ///
    /// The last browse path element names the field; an empty path names the
    /// attribute itself.
    pub fn field_name(&self) -> String {
        match self.browse_path.last() {
            Some(name) => name.name.clone(),
            None => self.attribute_id.name().to_string(),
        }
    }
}

/// One element of a where clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFilterElement {
    /// Filter operator code.
    pub filter_operator: u32,
    /// Operands.
    pub filter_operands: Vec<Variant>,
}

/// Where clause of an event filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFilter {
    /// Elements.
    pub elements: Vec<ContentFilterElement>,
}

/// Event filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Fields to return, in order.
    pub select_clauses: Vec<SimpleAttributeOperand>,
    /// Where clause.
    pub where_clause: ContentFilter,
}

impl EventFilter {
    /// Standard BaseEventType fields.
    pub const BASE_EVENT_FIELDS: [&'static str; 8] = [
        "EventId",
        "EventType",
        "SourceNode",
        "SourceName",
        "Time",
        "ReceiveTime",
        "Message",
        "Severity",
    ];

    /// Creates a filter selecting the standard BaseEventType fields.
    pub fn base_event() -> Self {
        Self {
            select_clauses: Self::BASE_EVENT_FIELDS
                .iter()
                .map(|name| SimpleAttributeOperand::base_event_property(*name))
                .collect(),
            where_clause: ContentFilter::default(),
        }
    }
}

/// Filter requested for a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitoringFilter {
    /// Data change filter.
    DataChange(DataChangeFilter),
    /// Event filter.
    Event(EventFilter),
}

impl MonitoringFilter {
    /// Returns the event filter, if this is one.
    pub fn as_event(&self) -> Option<&EventFilter> {
        match self {
            Self::Event(filter) => Some(filter),
            Self::DataChange(_) => None,
        }
    }
}

/// Server result for an event filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilterResult {
    /// One status per select clause.
    pub select_clause_results: Vec<StatusCode>,
    /// One status per where clause element.
    pub where_clause_results: Vec<StatusCode>,
}

/// Filter result returned by the server for a monitored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitoringFilterResult {
    /// Result of an event filter.
    Event(EventFilterResult),
}

/// Sampling and queueing parameters of a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringParameters {
    /// Client handle reported in notifications.
    pub client_handle: u32,
    /// Sampling interval in milliseconds; 0 means as fast as possible.
    pub sampling_interval: f64,
    /// Filter.
    pub filter: Option<MonitoringFilter>,
    /// Queue size.
    pub queue_size: u32,
    /// Discard the oldest value when the queue overflows.
    pub discard_oldest: bool,
}

/// One item of a CreateMonitoredItems request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemCreateRequest {
    /// Node and attribute.
    pub item_to_monitor: ReadValueId,
    /// Monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Parameters.
    pub requested_parameters: MonitoringParameters,
}

/// Result for one created item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemCreateResult {
    /// Status.
    pub status_code: StatusCode,
    /// Server handle.
    pub monitored_item_id: u32,
    /// Revised sampling interval.
    pub revised_sampling_interval: f64,
    /// Revised queue size.
    pub revised_queue_size: u32,
    /// Filter result.
    pub filter_result: Option<MonitoringFilterResult>,
}

/// CreateMonitoredItems request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMonitoredItemsRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Subscription id.
    pub subscription_id: u32,
    /// Timestamps to return.
    pub timestamps_to_return: TimestampsToReturn,
    /// Items.
    pub items_to_create: Vec<MonitoredItemCreateRequest>,
}

/// CreateMonitoredItems response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMonitoredItemsResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One result per item, in request order.
    pub results: Vec<MonitoredItemCreateResult>,
}

/// One item of a ModifyMonitoredItems request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemModifyRequest {
    /// Server handle.
    pub monitored_item_id: u32,
    /// New parameters.
    pub requested_parameters: MonitoringParameters,
}

/// Result for one modified item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemModifyResult {
    /// Status.
    pub status_code: StatusCode,
    /// Revised sampling interval.
    pub revised_sampling_interval: f64,
    /// Revised queue size.
    pub revised_queue_size: u32,
    /// Filter result.
    pub filter_result: Option<MonitoringFilterResult>,
}

/// ModifyMonitoredItems request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyMonitoredItemsRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Subscription id.
    pub subscription_id: u32,
    /// Timestamps to return.
    pub timestamps_to_return: TimestampsToReturn,
    /// Items.
    pub items_to_modify: Vec<MonitoredItemModifyRequest>,
}

/// ModifyMonitoredItems response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyMonitoredItemsResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One result per item.
    pub results: Vec<MonitoredItemModifyResult>,
}

/// SetMonitoringMode request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMonitoringModeRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Subscription id.
    pub subscription_id: u32,
    /// New mode.
    pub monitoring_mode: MonitoringMode,
    /// Server handles.
    pub monitored_item_ids: Vec<u32>,
}

/// SetMonitoringMode response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMonitoringModeResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One status per item.
    pub results: Vec<StatusCode>,
}

/// DeleteMonitoredItems request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMonitoredItemsRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Subscription id.
    pub subscription_id: u32,
    /// Server handles.
    pub monitored_item_ids: Vec<u32>,
}

/// DeleteMonitoredItems response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMonitoredItemsResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// One status per item.
    pub results: Vec<StatusCode>,
}

// =============================================================================
// Publish
// =============================================================================

/// Acknowledges one notification message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionAcknowledgement {
    /// Subscription id.
    pub subscription_id: u32,
    /// Sequence number of the acknowledged message.
    pub sequence_number: u32,
}

/// A value change of one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemNotification {
    /// Client handle of the item.
    pub client_handle: u32,
    /// New value.
    pub value: DataValue,
}

/// Batch of value changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataChangeNotification {
    /// Changes, in server order.
    pub monitored_items: Vec<MonitoredItemNotification>,
}

/// Field values of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFieldList {
    /// Client handle of the item.
    pub client_handle: u32,
    /// Field values, positionally matching the select clauses.
    pub event_fields: Vec<Variant>,
}

/// Batch of events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventNotificationList {
    /// Events, in server order.
    pub events: Vec<EventFieldList>,
}

/// Subscription status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeNotification {
    /// New status of the subscription.
    pub status: StatusCode,
    /// Diagnostic text.
    pub diagnostic_info: Option<String>,
}

/// One entry of a notification message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationData {
    /// Value changes.
    DataChange(DataChangeNotification),
    /// Events.
    Event(EventNotificationList),
    /// Status change.
    StatusChange(StatusChangeNotification),
}

/// Notifications delivered by one Publish response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Sequence number; keep-alives repeat the next number.
    pub sequence_number: u32,
    /// Publish time.
    pub publish_time: DateTime<Utc>,
    /// Notifications; empty for keep-alives.
    pub notification_data: Vec<NotificationData>,
}

/// Publish request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Request header.
    pub request_header: RequestHeader,
    /// Messages being acknowledged.
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

/// Publish response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Response header.
    pub response_header: ResponseHeader,
    /// Subscription the message belongs to.
    pub subscription_id: u32,
    /// Sequence numbers available for republish.
    pub available_sequence_numbers: Vec<u32>,
    /// More notifications are queued.
    pub more_notifications: bool,
    /// The notifications.
    pub notification_message: NotificationMessage,
    /// One status per acknowledgement.
    pub results: Vec<StatusCode>,
}

/// Generic failure response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceFault {
    /// Response header carrying the failure.
    pub response_header: ResponseHeader,
}

// =============================================================================
// ServiceRequest / ServiceResponse
// =============================================================================

macro_rules! service_messages {
    ($($variant:ident($request:ident, $response:ident)),+ $(,)?) => {
        /// Any request the client sends.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum ServiceRequest {
            $(
                #[doc = concat!(stringify!($variant), " request.")]
                $variant($request),
            )+
        }

        impl ServiceRequest {
            /// Returns the request header.
            pub fn request_header(&self) -> &RequestHeader {
                match self {
                    $(Self::$variant(r) => &r.request_header,)+
                }
            }

            /// Returns the request header for stamping.
            pub fn request_header_mut(&mut self) -> &mut RequestHeader {
                match self {
                    $(Self::$variant(r) => &mut r.request_header,)+
                }
            }

            /// Returns the service name.
            pub fn service_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)+
                }
            }
        }

        $(
            impl From<$request> for ServiceRequest {
                fn from(request: $request) -> Self {
                    Self::$variant(request)
                }
            }
        )+

        /// Any response the client receives.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum ServiceResponse {
            $(
                #[doc = concat!(stringify!($variant), " response.")]
                $variant($response),
            )+
            /// Service fault.
            ServiceFault(ServiceFault),
        }

        impl ServiceResponse {
            /// Returns the response header.
            pub fn response_header(&self) -> &ResponseHeader {
                match self {
                    $(Self::$variant(r) => &r.response_header,)+
                    Self::ServiceFault(r) => &r.response_header,
                }
            }

            /// Returns the service name.
            pub fn service_name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => stringify!($variant),)+
                    Self::ServiceFault(_) => "ServiceFault",
                }
            }
        }

        $(
            impl From<$response> for ServiceResponse {
                fn from(response: $response) -> Self {
                    Self::$variant(response)
                }
            }

            impl TryFrom<ServiceResponse> for $response {
                type Error = UaError;

                fn try_from(response: ServiceResponse) -> UaResult<Self> {
                    let result = response.response_header().service_result;
                    match response {
                        ServiceResponse::ServiceFault(fault) => Err(UaError::status_in(
                            fault.response_header.service_result,
                            stringify!($variant),
                        )),
                        _ if result.is_bad() => {
                            Err(UaError::status_in(result, stringify!($variant)))
                        }
                        ServiceResponse::$variant(inner) => Ok(inner),
                        other => Err(UaError::malformed(format!(
                            "expected {} response, got {}",
                            stringify!($variant),
                            other.service_name()
                        ))),
                    }
                }
            }
        )+
    };
}

service_messages! {
    OpenSecureChannel(OpenSecureChannelRequest, OpenSecureChannelResponse),
    CloseSecureChannel(CloseSecureChannelRequest, CloseSecureChannelResponse),
    CreateSession(CreateSessionRequest, CreateSessionResponse),
    ActivateSession(ActivateSessionRequest, ActivateSessionResponse),
    CloseSession(CloseSessionRequest, CloseSessionResponse),
    Read(ReadRequest, ReadResponse),
    Write(WriteRequest, WriteResponse),
    Browse(BrowseRequest, BrowseResponse),
    CreateSubscription(CreateSubscriptionRequest, CreateSubscriptionResponse),
    ModifySubscription(ModifySubscriptionRequest, ModifySubscriptionResponse),
    SetPublishingMode(SetPublishingModeRequest, SetPublishingModeResponse),
    DeleteSubscriptions(DeleteSubscriptionsRequest, DeleteSubscriptionsResponse),
    CreateMonitoredItems(CreateMonitoredItemsRequest, CreateMonitoredItemsResponse),
    ModifyMonitoredItems(ModifyMonitoredItemsRequest, ModifyMonitoredItemsResponse),
    SetMonitoringMode(SetMonitoringModeRequest, SetMonitoringModeResponse),
    DeleteMonitoredItems(DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse),
    Publish(PublishRequest, PublishResponse),
}

impl ServiceRequest {
    /// Returns `true` for Publish, which has no transport timeout.
    #[inline]
    pub fn is_publish(&self) -> bool {
        matches!(self, Self::Publish(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_becomes_status_error() {
        let response = ServiceResponse::ServiceFault(ServiceFault {
            response_header: ResponseHeader::with_result(7, StatusCode::BAD_SESSION_CLOSED),
        });
        let err = ReadResponse::try_from(response).unwrap_err();
        assert!(err.is_status(StatusCode::BAD_SESSION_CLOSED));
    }

    #[test]
    fn test_bad_service_result_becomes_status_error() {
        let response = ServiceResponse::from(CloseSessionResponse {
            response_header: ResponseHeader::with_result(1, StatusCode::BAD_SESSION_ID_INVALID),
        });
        let err = CloseSessionResponse::try_from(response).unwrap_err();
        assert!(err.is_status(StatusCode::BAD_SESSION_ID_INVALID));
    }

    #[test]
    fn test_unexpected_response_kind() {
        let response = ServiceResponse::from(CloseSessionResponse::default());
        let err = ReadResponse::try_from(response).unwrap_err();
        assert!(err.to_string().contains("expected Read response"));
    }

    #[test]
    fn test_base_event_filter_order() {
        let filter = EventFilter::base_event();
        let names: Vec<String> = filter
            .select_clauses
            .iter()
            .map(SimpleAttributeOperand::field_name)
            .collect();
        assert_eq!(names, EventFilter::BASE_EVENT_FIELDS.to_vec());
    }

    #[test]
    fn test_request_names() {
        let request = ServiceRequest::from(PublishRequest {
            request_header: RequestHeader::default(),
            subscription_acknowledgements: vec![],
        });
        assert!(request.is_publish());
        assert_eq!(request.service_name(), "Publish");
    }
}
