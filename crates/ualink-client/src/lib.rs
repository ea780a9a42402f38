// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary client core.
//!
//! This crate implements the client side of the OPC UA binary protocol
//! from the TCP handshake up to subscriptions:
//!
//! - Hello/Acknowledge limit negotiation, chunking, and message framing
//! - Secure channel issue and periodic renewal
//! - Session creation, server signature checks, and user authentication
//! - Subscriptions with monitored items and concurrent Publish workers
//! - Notification dispatch to data change, event, and status handlers
//!
//! The wire encoding of service bodies is pluggable through
//! [`transport::tcp::ServiceCodec`], and the whole transport can be
//! replaced through [`UaConnection`].
//!
//! # Error Handling
//!
//! ```text
//! UaError
//! ├── Connection    - Socket, endpoint, and state errors
//! ├── Channel       - Secure channel lifecycle
//! ├── Session       - Session create/activate/close
//! ├── Security      - Signatures, certificates, policies
//! ├── Status        - Bad status codes returned by the server
//! ├── Subscription  - Subscription and monitored item errors
//! ├── Codec         - Malformed messages
//! ├── Configuration - Invalid settings
//! └── Timeout       - Operations that ran out of time
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ualink_client::{AttributeId, ChannelHandler, Client, ClientConfig, NodeId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("opc.tcp://localhost:4840");
//!     let client = Client::builder(config).codec(my_codec()).build()?;
//!     client.connect().await?;
//!
//!     let (handler, mut notifications) = ChannelHandler::with_channel(64);
//!     let subscription = client
//!         .create_subscription(Duration::from_millis(500), Arc::new(handler))
//!         .await?;
//!     subscription
//!         .subscribe_data_change(NodeId::string(2, "Temperature"), AttributeId::Value)
//!         .await?;
//!
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{notification:?}");
//!     }
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod registry;
pub mod security;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{
    ChannelError, CodecError, ConfigurationError, ConnectionError, ErrorCode, ErrorSeverity,
    SecurityError, SessionError, StatusCodeError, SubscriptionError, TimeoutError, UaError,
    UaResult,
};

pub use config::{ClientConfig, ClientConfigBuilder, SubscriptionParameters, TransportLimits};

pub use types::{
    AttributeId, DataChangeTrigger, DataValue, DeadbandType, LocalizedText, MessageSecurityMode,
    MonitoringMode, NodeId, QualifiedName, SecurityPolicyKind, StatusCode, TimestampsToReturn,
    UserTokenType, Variant,
};

pub use client::{
    ChannelHandler, BroadcastHandler, Client, ClientBuilder, ConnectionState, DataChange, Event,
    FilterOverride, MonitorRequest, MonitoredItemId, Notification, RenewalStatus, SessionInfo,
    StatusChange, StatusChangeHandler, Subscription, SubscriptionHandler, SubscriptionState,
    UserIdentity,
};

pub use registry::TypeRegistry;
pub use security::{SecurityPolicy, SecurityPolicyFactory, UserCertificate};
pub use transport::{TransportState, UaConnection};
