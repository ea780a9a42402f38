// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client error types with diagnostics.
//!
//! Every fallible operation in this crate returns [`UaResult`]. Errors are
//! grouped by the layer that raised them so callers can react without
//! string matching:
//!
//! ```text
//! UaError
//! ├── Connection    - Socket and transport state
//! ├── Channel       - Secure channel lifecycle and chunk sequencing
//! ├── Session       - Session lifecycle errors
//! ├── Security      - Signature, certificate and encryption failures (never retryable)
//! ├── Status        - A bad service result carrying the numeric status code
//! ├── Subscription  - Subscription and monitored item bookkeeping
//! ├── Codec         - Malformed or oversized frames
//! ├── Configuration - Invalid settings
//! └── Timeout       - Request, connect and hello timeouts
//! ```
//!
//! Per-item failures inside a batch (one rejected monitored item out of
//! three) are *not* errors: they are returned as [`StatusCode`] values in the
//! result list. Only single-item calls escalate them to [`UaError::Status`].
//!
//! # Examples
//!
//! ```
//! use ualink_client::error::{UaError, StatusCodeError};
//! use ualink_client::types::{StatusCategory, StatusCode};
//!
//! let error = UaError::from(StatusCodeError::new(StatusCode::BAD_TIMEOUT));
//! assert_eq!(error.status_code(), Some(StatusCode::BAD_TIMEOUT));
//! assert_eq!(StatusCode::BAD_TIMEOUT.category(), StatusCategory::Bad);
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::types::StatusCode;

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for OPC UA client operations.
#[derive(Debug, Error)]
pub enum UaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Secure channel errors.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Security verification errors.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Bad status returned by the server.
    #[error("{0}")]
    Status(#[from] StatusCodeError),

    /// Subscription and monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Framing errors.
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

impl UaError {
    // =========================================================================
    // Convenience Factory Methods
    // =========================================================================

    /// Creates a not connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a connection closed error.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::Connection(ConnectionError::closed(Some(reason.into())))
    }

    /// Creates a status error from a bad status code.
    pub fn status(status: StatusCode) -> Self {
        Self::Status(StatusCodeError::new(status))
    }

    /// Creates a status error with the service that returned it.
    pub fn status_in(status: StatusCode, context: impl Into<String>) -> Self {
        Self::Status(StatusCodeError::with_context(status, context))
    }

    /// Creates a malformed frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Codec(CodecError::malformed(message))
    }

    /// Creates an invalid configuration value error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::invalid_value(field, message))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns the OPC UA status code this error maps to, if any.
    ///
    /// Status errors return their code verbatim; framing limit violations
    /// and channel aborts return the code the protocol assigns to them.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status(e) => Some(e.status()),
            Self::Codec(e) => Some(e.status_code()),
            Self::Channel(ChannelError::Aborted { status, .. }) => Some(*status),
            Self::Channel(ChannelError::Closed) => Some(StatusCode::BAD_SECURE_CHANNEL_CLOSED),
            Self::Connection(ConnectionError::ServerError { status, .. }) => Some(*status),
            Self::Timeout(_) => Some(StatusCode::BAD_TIMEOUT),
            _ => None,
        }
    }

    /// Returns `true` if this error carries the given status code.
    pub fn is_status(&self, status: StatusCode) -> bool {
        self.status_code() == Some(status)
    }

    /// Returns `true` if the underlying connection should be considered dead.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::Connection(e) => !matches!(e, ConnectionError::InvalidState { .. }),
            Self::Channel(ChannelError::Closed) => true,
            _ => false,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Channel(e) => e.is_retryable(),
            Self::Session(e) => e.is_retryable(),
            Self::Security(_) => false,
            Self::Status(e) => e.is_retryable(),
            Self::Subscription(_) => false,
            Self::Codec(_) => false,
            Self::Configuration(_) => false,
            Self::Timeout(_) => true,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(e) => e.severity(),
            Self::Channel(_) => ErrorSeverity::Error,
            Self::Session(e) => e.severity(),
            Self::Security(_) => ErrorSeverity::Critical,
            Self::Status(e) => e.severity(),
            Self::Subscription(_) => ErrorSeverity::Warning,
            Self::Codec(_) => ErrorSeverity::Error,
            Self::Configuration(_) => ErrorSeverity::Critical,
            Self::Timeout(_) => ErrorSeverity::Warning,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Channel(_) => "channel",
            Self::Session(_) => "session",
            Self::Security(_) => "security",
            Self::Status(_) => "status",
            Self::Subscription(_) => "subscription",
            Self::Codec(_) => "codec",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Channel(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Security(e) => e.error_code(),
            Self::Status(_) => ErrorCode::new(5, 1),
            Self::Subscription(e) => e.error_code(),
            Self::Codec(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Connection(e) => e.recovery_hints(),
            Self::Channel(_) => vec![
                "Reconnect to establish a fresh secure channel",
                "Check that the server accepts the requested channel lifetime",
            ],
            Self::Session(e) => e.recovery_hints(),
            Self::Security(e) => e.recovery_hints(),
            Self::Status(_) => vec!["Inspect the status code name for the failing service"],
            Self::Subscription(e) => e.recovery_hints(),
            Self::Codec(_) => vec![
                "Check the negotiated transport limits",
                "Reduce the number of items per request",
            ],
            Self::Configuration(_) => vec!["Fix the configuration and reconnect"],
            Self::Timeout(_) => vec![
                "Increase the request timeout",
                "Check network connectivity to the server",
            ],
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let level = self.tracing_level();
        let code = self.error_code();

        match level {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

impl From<io::Error> for UaError {
    fn from(error: io::Error) -> Self {
        Self::Connection(ConnectionError::io("socket", error))
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection refused.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: Option<io::Error>,
    },

    /// Connection timed out.
    #[error("Connection timed out to '{endpoint}' after {duration:?}")]
    TimedOut {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: '{url}' - {reason}")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// The server offered no endpoint matching the channel security.
    #[error("No matching endpoint for security mode '{security_mode}' and policy '{security_policy}'")]
    NoSuitableEndpoint {
        /// Required security mode.
        security_mode: String,
        /// Required security policy URI.
        security_policy: String,
    },

    /// The server sent a transport-level ERR message.
    #[error("Server error {status}: {reason}")]
    ServerError {
        /// Status code carried by the message.
        status: StatusCode,
        /// Reason text.
        reason: String,
    },

    /// Connection closed.
    #[error("Connection closed: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// Not connected.
    #[error("Not connected to OPC UA server")]
    NotConnected,

    /// Operation not allowed in the current connection state.
    #[error("Operation requires state '{expected}', connection is '{actual}'")]
    InvalidState {
        /// Required state.
        expected: String,
        /// Current state.
        actual: String,
    },

    /// Generic I/O error.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    /// Creates a connection refused error with source.
    pub fn refused_with(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            source: Some(source),
        }
    }

    /// Creates a connection timed out error.
    pub fn timed_out(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::TimedOut {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a no suitable endpoint error.
    pub fn no_suitable_endpoint(
        security_mode: impl Into<String>,
        security_policy: impl Into<String>,
    ) -> Self {
        Self::NoSuitableEndpoint {
            security_mode: security_mode.into(),
            security_policy: security_policy.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: Option<String>) -> Self {
        Self::Closed { reason }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Creates an I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refused { .. } => true,
            Self::TimedOut { .. } => true,
            Self::Closed { .. } => true,
            Self::NotConnected => true,
            Self::ServerError { status, .. } => !status.is_security_failure(),
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            Self::InvalidEndpoint { .. }
            | Self::NoSuitableEndpoint { .. }
            | Self::InvalidState { .. } => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotConnected | Self::TimedOut { .. } | Self::Closed { .. } => {
                ErrorSeverity::Warning
            }
            Self::InvalidState { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Refused { .. } => ErrorCode::new(1, 1),
            Self::TimedOut { .. } => ErrorCode::new(1, 2),
            Self::InvalidEndpoint { .. } => ErrorCode::new(1, 3),
            Self::NoSuitableEndpoint { .. } => ErrorCode::new(1, 4),
            Self::ServerError { .. } => ErrorCode::new(1, 5),
            Self::Closed { .. } => ErrorCode::new(1, 6),
            Self::NotConnected => ErrorCode::new(1, 7),
            Self::InvalidState { .. } => ErrorCode::new(1, 8),
            Self::Io { .. } => ErrorCode::new(1, 9),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Refused { .. } => vec![
                "Check if the OPC UA server is running",
                "Verify the endpoint URL is correct",
                "Check firewall rules allow the connection",
            ],
            Self::TimedOut { .. } => vec![
                "Check network connectivity to the server",
                "Increase the connection timeout setting",
            ],
            Self::InvalidEndpoint { .. } => vec!["Use format: opc.tcp://hostname:port/path"],
            Self::NoSuitableEndpoint { .. } => vec![
                "Check available security modes on the server",
                "Verify your security configuration matches server capabilities",
            ],
            Self::ServerError { .. } => vec!["Check server logs for the rejection reason"],
            Self::Closed { .. } => vec![
                "The connection was closed by the server",
                "Reconnect to continue",
            ],
            Self::NotConnected => vec!["Call connect() before performing operations"],
            Self::InvalidState { .. } => vec!["Wait until the session is active"],
            Self::Io { .. } => vec!["Check network connectivity", "Retry the operation"],
        }
    }
}

// =============================================================================
// ChannelError
// =============================================================================

/// Secure channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No secure channel is open.
    #[error("Secure channel is not open")]
    NotOpen,

    /// An OpenSecureChannel exchange is already outstanding.
    #[error("OpenSecureChannel requests cannot overlap; the previous response is still pending")]
    OpenInProgress,

    /// A chunk arrived for a different channel.
    #[error("Wrong secure channel id {actual}, expected {expected}")]
    WrongChannelId {
        /// Expected channel id.
        expected: u32,
        /// Received channel id.
        actual: u32,
    },

    /// A chunk arrived with an unknown token id.
    #[error("Unknown security token id {actual}, expected {expected}")]
    WrongTokenId {
        /// Expected token id.
        expected: u32,
        /// Received token id.
        actual: u32,
    },

    /// Sequence numbers are not consecutive.
    #[error("Wrong sequence number {actual}, expected {expected}")]
    SequenceNumber {
        /// Expected sequence number.
        expected: u32,
        /// Received sequence number.
        actual: u32,
    },

    /// Chunks of different requests were interleaved.
    #[error("Chunk for request {actual} interleaved with request {expected}")]
    RequestIdMismatch {
        /// Request being assembled.
        expected: u32,
        /// Request of the offending chunk.
        actual: u32,
    },

    /// The server aborted a message.
    #[error("Message for request {request_id} aborted with {status}: {reason}")]
    Aborted {
        /// Request id.
        request_id: u32,
        /// Status code of the abort.
        status: StatusCode,
        /// Reason text.
        reason: String,
    },

    /// The channel has been closed.
    #[error("Secure channel closed")]
    Closed,
}

impl ChannelError {
    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Closed | Self::NotOpen)
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotOpen => ErrorCode::new(2, 1),
            Self::OpenInProgress => ErrorCode::new(2, 2),
            Self::WrongChannelId { .. } => ErrorCode::new(2, 3),
            Self::WrongTokenId { .. } => ErrorCode::new(2, 4),
            Self::SequenceNumber { .. } => ErrorCode::new(2, 5),
            Self::RequestIdMismatch { .. } => ErrorCode::new(2, 6),
            Self::Aborted { .. } => ErrorCode::new(2, 7),
            Self::Closed => ErrorCode::new(2, 8),
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session has been created.
    #[error("Session not created")]
    NotCreated,

    /// Session exists but has not been activated.
    #[error("Session not activated")]
    NotActivated,

    /// CreateSession failed.
    #[error("Failed to create session: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// ActivateSession failed.
    #[error("Failed to activate session: {message}")]
    ActivationFailed {
        /// Error message.
        message: String,
    },

    /// Session has been closed.
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// Creates a creation failed error.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates an activation failed error.
    pub fn activation_failed(message: impl Into<String>) -> Self {
        Self::ActivationFailed {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CreationFailed { .. } | Self::Closed)
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Closed => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotCreated => ErrorCode::new(3, 1),
            Self::NotActivated => ErrorCode::new(3, 2),
            Self::CreationFailed { .. } => ErrorCode::new(3, 3),
            Self::ActivationFailed { .. } => ErrorCode::new(3, 4),
            Self::Closed => ErrorCode::new(3, 5),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::NotCreated | Self::NotActivated => vec!["Call connect() first"],
            Self::CreationFailed { .. } => vec![
                "Check the server's session limits",
                "Verify the requested session timeout",
            ],
            Self::ActivationFailed { .. } => vec!["Check the user identity token"],
            Self::Closed => vec!["Reconnect to create a new session"],
        }
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Security verification errors.
///
/// These are hard failures: the handshake aborts and nothing is retried.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// A signature did not verify.
    #[error("Signature verification failed: {context}")]
    SignatureInvalid {
        /// What was being verified.
        context: String,
    },

    /// The server presented a different certificate than the pinned one.
    #[error("Server certificate mismatch")]
    CertificateMismatch,

    /// Signing failed inside the security policy.
    #[error("Signing failed: {message}")]
    SigningFailed {
        /// Error message.
        message: String,
    },

    /// Encryption failed inside the security policy.
    #[error("Encryption failed: {message}")]
    EncryptionFailed {
        /// Error message.
        message: String,
    },

    /// Decryption failed inside the security policy.
    #[error("Decryption failed: {message}")]
    DecryptionFailed {
        /// Error message.
        message: String,
    },

    /// No policy implementation for the URI.
    #[error("Unsupported security policy: {uri}")]
    UnsupportedPolicy {
        /// Policy URI.
        uri: String,
    },

    /// An encrypted token needs the peer certificate, and none is known.
    #[error("Peer certificate required for {operation}")]
    MissingPeerCertificate {
        /// Operation that needed it.
        operation: String,
    },
}

impl SecurityError {
    /// Creates a signature invalid error.
    pub fn signature_invalid(context: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            context: context.into(),
        }
    }

    /// Creates a signing failed error.
    pub fn signing_failed(message: impl Into<String>) -> Self {
        Self::SigningFailed {
            message: message.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an unsupported policy error.
    pub fn unsupported_policy(uri: impl Into<String>) -> Self {
        Self::UnsupportedPolicy { uri: uri.into() }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::SignatureInvalid { .. } => ErrorCode::new(4, 1),
            Self::CertificateMismatch => ErrorCode::new(4, 2),
            Self::SigningFailed { .. } => ErrorCode::new(4, 3),
            Self::EncryptionFailed { .. } => ErrorCode::new(4, 4),
            Self::DecryptionFailed { .. } => ErrorCode::new(4, 5),
            Self::UnsupportedPolicy { .. } => ErrorCode::new(4, 6),
            Self::MissingPeerCertificate { .. } => ErrorCode::new(4, 7),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::SignatureInvalid { .. } => vec![
                "The server could not prove possession of its private key",
                "Verify the server certificate",
            ],
            Self::CertificateMismatch => vec![
                "The server identity changed since the first session",
                "Create a new client if the server certificate was rotated on purpose",
            ],
            Self::UnsupportedPolicy { .. } => vec!["Register a policy implementation for this URI"],
            _ => vec!["Check the security policy configuration"],
        }
    }
}

// =============================================================================
// StatusCodeError
// =============================================================================

/// A bad status code returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodeError {
    status: StatusCode,
    context: Option<String>,
}

impl StatusCodeError {
    /// Creates a new status error.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            context: None,
        }
    }

    /// Creates a status error naming the service that returned it.
    pub fn with_context(status: StatusCode, context: impl Into<String>) -> Self {
        Self {
            status,
            context: Some(context.into()),
        }
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the context, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns `true` if retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status,
            StatusCode::BAD_TIMEOUT
                | StatusCode::BAD_TOO_MANY_OPERATIONS
                | StatusCode::BAD_RESOURCE_UNAVAILABLE
                | StatusCode::BAD_SERVER_HALTED
                | StatusCode::BAD_COMMUNICATION_ERROR
        )
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        if self.status.is_security_failure() {
            ErrorSeverity::Critical
        } else if self.status.is_bad() {
            ErrorSeverity::Error
        } else {
            ErrorSeverity::Warning
        }
    }
}

impl fmt::Display for StatusCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} in response to {}", self.status, context),
            None => write!(f, "{}", self.status),
        }
    }
}

impl std::error::Error for StatusCodeError {}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The subscription is not in the `Active` state.
    #[error("Subscription {subscription_id} is {state}, expected Active")]
    NotActive {
        /// Subscription id (0 before creation).
        subscription_id: u32,
        /// Current state.
        state: String,
    },

    /// No monitored item is registered under the server handle.
    #[error("No monitored item with server handle {server_handle} in subscription {subscription_id}")]
    UnknownMonitoredItem {
        /// Subscription id.
        subscription_id: u32,
        /// Server-assigned handle.
        server_handle: u32,
    },

    /// Invalid subscription parameters.
    #[error("Invalid subscription parameters: {message}")]
    InvalidParameters {
        /// Error message.
        message: String,
    },

    /// The server returned a different number of results than requested.
    #[error("{service} returned {actual} results for {expected} items")]
    ResultCountMismatch {
        /// Service name.
        service: &'static str,
        /// Requested item count.
        expected: usize,
        /// Returned result count.
        actual: usize,
    },
}

impl SubscriptionError {
    /// Creates an invalid parameters error.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotActive { .. } => ErrorCode::new(6, 1),
            Self::UnknownMonitoredItem { .. } => ErrorCode::new(6, 2),
            Self::InvalidParameters { .. } => ErrorCode::new(6, 3),
            Self::ResultCountMismatch { .. } => ErrorCode::new(6, 4),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::NotActive { .. } => vec!["Create a new subscription"],
            Self::UnknownMonitoredItem { .. } => {
                vec!["Use the server handle returned by subscribe"]
            }
            Self::InvalidParameters { .. } => vec![
                "Lifetime count must be at least three times the keep-alive count",
                "Publishing interval must be positive",
            ],
            Self::ResultCountMismatch { .. } => vec!["The server response is inconsistent"],
        }
    }
}

// =============================================================================
// CodecError
// =============================================================================

/// Framing errors for binary messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A single chunk exceeds the negotiated buffer size.
    #[error("Chunk of {size} bytes exceeds buffer size {limit}")]
    ChunkTooLarge {
        /// Chunk size.
        size: usize,
        /// Buffer limit.
        limit: usize,
    },

    /// An outgoing message exceeds the negotiated limits.
    #[error("Request too large: {message}")]
    RequestTooLarge {
        /// Which limit was exceeded.
        message: String,
    },

    /// An incoming message exceeds the negotiated limits.
    #[error("Response too large: {message}")]
    ResponseTooLarge {
        /// Which limit was exceeded.
        message: String,
    },

    /// Unknown message type in a header.
    #[error("Unknown message type {0:?}")]
    UnknownMessageType([u8; 3]),

    /// Malformed frame.
    #[error("Malformed message: {message}")]
    Malformed {
        /// Error message.
        message: String,
    },

    /// The service codec failed to encode or decode a body.
    #[error("Service body {direction} failed: {message}")]
    Body {
        /// "encode" or "decode".
        direction: &'static str,
        /// Error message.
        message: String,
    },
}

impl CodecError {
    /// Creates a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates a body encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Body {
            direction: "encode",
            message: message.into(),
        }
    }

    /// Creates a body decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Body {
            direction: "decode",
            message: message.into(),
        }
    }

    /// Returns the OPC UA status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ChunkTooLarge { .. } => StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            Self::RequestTooLarge { .. } => StatusCode::BAD_REQUEST_TOO_LARGE,
            Self::ResponseTooLarge { .. } => StatusCode::BAD_RESPONSE_TOO_LARGE,
            Self::UnknownMessageType(_) => StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
            Self::Malformed { .. } => StatusCode::BAD_DECODING_ERROR,
            Self::Body { direction, .. } if *direction == "encode" => {
                StatusCode::BAD_ENCODING_ERROR
            }
            Self::Body { .. } => StatusCode::BAD_DECODING_ERROR,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ChunkTooLarge { .. } => ErrorCode::new(7, 1),
            Self::RequestTooLarge { .. } => ErrorCode::new(7, 2),
            Self::ResponseTooLarge { .. } => ErrorCode::new(7, 3),
            Self::UnknownMessageType(_) => ErrorCode::new(7, 4),
            Self::Malformed { .. } => ErrorCode::new(7, 5),
            Self::Body { .. } => ErrorCode::new(7, 6),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Invalid value for a field.
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },

    /// Invalid node id string.
    #[error("Invalid node id '{node_id}': {reason}")]
    InvalidNodeId {
        /// The offending input.
        node_id: String,
        /// Reason.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidValue { .. } => ErrorCode::new(8, 1),
            Self::InvalidNodeId { .. } => ErrorCode::new(8, 2),
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Timeout errors.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// A service request received no response in time.
    #[error("{service} timed out after {duration:?}")]
    Request {
        /// Service name.
        service: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// The Hello/Acknowledge exchange timed out.
    #[error("Hello timed out after {duration:?}")]
    Hello {
        /// Timeout duration.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Creates a request timeout.
    pub fn request(service: impl Into<String>, duration: Duration) -> Self {
        Self::Request {
            service: service.into(),
            duration,
        }
    }

    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Request { duration, .. } | Self::Hello { duration } => *duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Request { .. } => ErrorCode::new(9, 1),
            Self::Hello { .. } => ErrorCode::new(9, 2),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code for categorization.
///
/// Format: `UA-XXYY` where XX is category and YY is specific error.
///
/// Categories:
/// - 1: Connection
/// - 2: Channel
/// - 3: Session
/// - 4: Security
/// - 5: Status
/// - 6: Subscription
/// - 7: Codec
/// - 8: Configuration
/// - 9: Timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-9).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with UaError.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_keeps_numeric_code() {
        let error = UaError::status_in(StatusCode::BAD_NODE_ID_UNKNOWN, "Read");
        assert_eq!(error.status_code(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));
        assert_eq!(
            error.status_code().map(|s| s.bits()),
            Some(0x8034_0000)
        );
        assert!(error.to_string().contains("BadNodeIdUnknown"));
        assert!(error.to_string().contains("Read"));
    }

    #[test]
    fn test_security_errors_never_retry() {
        let error: UaError = SecurityError::CertificateMismatch.into();
        assert!(!error.is_retryable());
        assert_eq!(error.severity(), ErrorSeverity::Critical);

        let error: UaError = SecurityError::signature_invalid("CreateSession").into();
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_connection_error_retryable() {
        assert!(ConnectionError::NotConnected.is_retryable());
        assert!(ConnectionError::timed_out("opc.tcp://localhost:4840", Duration::from_secs(4))
            .is_retryable());
        assert!(!ConnectionError::invalid_endpoint("http://x", "wrong scheme").is_retryable());
    }

    #[test]
    fn test_codec_error_status_mapping() {
        let error = CodecError::RequestTooLarge {
            message: "3 chunks > 2".into(),
        };
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST_TOO_LARGE);

        let error: UaError = CodecError::ChunkTooLarge {
            size: 70_000,
            limit: 65_535,
        }
        .into();
        assert!(error.is_status(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE));
    }

    #[test]
    fn test_connection_loss_classification() {
        assert!(UaError::not_connected().is_connection_loss());
        assert!(UaError::from(ChannelError::Closed).is_connection_loss());
        assert!(!UaError::status(StatusCode::BAD_TIMEOUT).is_connection_loss());
        assert!(!UaError::from(ConnectionError::invalid_state("SessionActive", "Disconnected"))
            .is_connection_loss());
    }

    #[test]
    fn test_error_code_format() {
        let code = ErrorCode::new(1, 5);
        assert_eq!(code.to_string(), "UA-0105");
        assert_eq!(code.as_u16(), 0x0105);
    }
}
