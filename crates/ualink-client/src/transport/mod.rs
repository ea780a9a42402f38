// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire connection abstraction.
//!
//! The channel, session and subscription layers talk to the server only
//! through [`UaConnection`]. [`tcp::TcpConnection`] implements it over a
//! socket with OPC UA binary framing. The in-process mock server used by the
//! tests implements it without any socket at all.
//!
//! ```text
//! Client ──► UaConnection::send_request(ServiceRequest)
//!                │
//!                ├── stamp RequestHeader (token, handle, time, timeout hint)
//!                ├── ServiceCodec::encode_request
//!                ├── chunking::split  ──► sign / encrypt ──► socket
//!                │
//!                └── reader task ──► verify / decrypt ──► assemble ──► oneshot
//! ```

pub mod chunking;
pub mod framing;
pub mod tcp;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::TransportLimits;
use crate::error::UaResult;
use crate::messages::{ChannelSecurityToken, ServiceRequest, ServiceResponse};
use crate::types::NodeId;

// =============================================================================
// TransportState
// =============================================================================

/// Connection state of the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// No socket.
    #[default]
    Disconnected,

    /// Socket connect in progress.
    Connecting,

    /// Socket open.
    Connected,

    /// The socket died.
    Failed,
}

impl TransportState {
    /// Returns `true` if the transport is connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the transport has failed.
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// UaConnection
// =============================================================================

/// A wire-level connection to one server.
///
/// Implementations correlate responses with requests, so any number of
/// tasks may call [`send_request`](Self::send_request) concurrently.
#[async_trait]
pub trait UaConnection: Send + Sync {
    /// Opens the socket.
    async fn connect_socket(&self, endpoint_url: &str, timeout: Duration) -> UaResult<()>;

    /// Performs the Hello/Acknowledge exchange and returns the negotiated limits.
    async fn send_hello(
        &self,
        endpoint_url: &str,
        limits: TransportLimits,
    ) -> UaResult<TransportLimits>;

    /// Sends a request and waits for its response.
    ///
    /// A CloseSecureChannel request returns as soon as it is written; every
    /// other pending request then fails with `BadSecureChannelClosed`.
    async fn send_request(&self, request: ServiceRequest) -> UaResult<ServiceResponse>;

    /// Installs a token issued or renewed by OpenSecureChannel.
    fn install_security_token(&self, token: &ChannelSecurityToken, server_nonce: &[u8]);

    /// Sets the session authentication token stamped on later requests.
    fn set_authentication_token(&self, token: NodeId);

    /// Closes the socket. Safe to call repeatedly.
    async fn disconnect_socket(&self) -> UaResult<()>;

    /// Returns the transport state.
    fn state(&self) -> TransportState;
}

// =============================================================================
// RequestStamper
// =============================================================================

/// Fills in the request header fields owned by the connection.
#[derive(Debug)]
pub struct RequestStamper {
    next_handle: AtomicU32,
    authentication_token: RwLock<NodeId>,
    timeout_hint: u32,
}

impl RequestStamper {
    /// Creates a stamper that sends `timeout_hint` milliseconds as hint.
    pub fn new(timeout_hint: u32) -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            authentication_token: RwLock::new(NodeId::null()),
            timeout_hint,
        }
    }

    /// Replaces the authentication token.
    pub fn set_authentication_token(&self, token: NodeId) {
        *self.authentication_token.write() = token;
    }

    /// Returns the authentication token.
    pub fn authentication_token(&self) -> NodeId {
        self.authentication_token.read().clone()
    }

    /// Stamps `request` and returns its request handle.
    ///
    /// Publish requests get a zero timeout hint.
    pub fn stamp(&self, request: &mut ServiceRequest) -> u32 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let timeout_hint = if request.is_publish() { 0 } else { self.timeout_hint };
        let token = self.authentication_token();

        let header = request.request_header_mut();
        header.authentication_token = token;
        header.request_handle = handle;
        header.timestamp = Utc::now();
        header.timeout_hint = timeout_hint;
        handle
    }
}

/// Extracts `host:port` from an `opc.tcp://` URL, defaulting the port to 4840.
pub fn socket_address(endpoint_url: &str) -> UaResult<String> {
    use crate::error::ConnectionError;

    let rest = endpoint_url.strip_prefix("opc.tcp://").ok_or_else(|| {
        ConnectionError::invalid_endpoint(endpoint_url, "endpoint must start with opc.tcp://")
    })?;
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ConnectionError::invalid_endpoint(endpoint_url, "missing host").into());
    }

    if authority.starts_with('[') || authority.contains(':') {
        Ok(authority.to_string())
    } else {
        Ok(format!("{authority}:4840"))
    }
}
