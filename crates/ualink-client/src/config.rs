// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration.
//!
//! [`ClientConfig`] carries everything the handshake needs: the endpoint,
//! the channel security, the requested lifetimes, and the transport limits
//! offered in the Hello message. Durations are serialized in humantime
//! notation (`"4s"`, `"1h"`).
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use ualink_client::config::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .application_name("Line 3 Monitor")
//!     .session_timeout(Duration::from_secs(600))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.secure_channel_lifetime, Duration::from_millis(3_600_000));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConnectionError, UaError, UaResult};
use crate::types::{MessageSecurityMode, SecurityPolicyKind};

// =============================================================================
// TransportLimits
// =============================================================================

/// Buffer and message limits exchanged in Hello/Acknowledge.
///
/// A zero `max_chunk_count` or `max_message_size` means "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportLimits {
    /// Largest chunk this side accepts.
    #[serde(default = "default_buffer_size")]
    pub max_recv_buffer_size: u32,

    /// Largest chunk this side sends.
    #[serde(default = "default_buffer_size")]
    pub max_send_buffer_size: u32,

    /// Maximum chunks per message.
    #[serde(default = "default_max_chunk_count")]
    pub max_chunk_count: u32,

    /// Maximum assembled message size.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,
}

fn default_buffer_size() -> u32 {
    TransportLimits::DEFAULT_BUFFER_SIZE
}

fn default_max_message_size() -> u32 {
    TransportLimits::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_chunk_count() -> u32 {
    TransportLimits::DEFAULT_MAX_MESSAGE_SIZE / TransportLimits::DEFAULT_BUFFER_SIZE + 1
}

impl TransportLimits {
    /// Default send and receive buffer size.
    pub const DEFAULT_BUFFER_SIZE: u32 = 65_535;

    /// Default maximum message size (100 MiB).
    pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 100 * 1024 * 1024;

    /// Computes the limits to use after the server's Acknowledge.
    ///
    /// The server's send buffer bounds what we receive and its receive
    /// buffer bounds what we send. Chunk count and message size are
    /// adopted as sent.
    pub fn negotiated(
        server_recv_buffer_size: u32,
        server_send_buffer_size: u32,
        server_max_message_size: u32,
        server_max_chunk_count: u32,
    ) -> Self {
        Self {
            max_recv_buffer_size: server_send_buffer_size,
            max_send_buffer_size: server_recv_buffer_size,
            max_chunk_count: server_max_chunk_count,
            max_message_size: server_max_message_size,
        }
    }

    /// Returns `true` if a message of `chunks` chunks and `size` bytes fits.
    pub fn allows(&self, chunks: usize, size: usize) -> bool {
        let chunks_ok = self.max_chunk_count == 0 || chunks <= self.max_chunk_count as usize;
        let size_ok = self.max_message_size == 0 || size <= self.max_message_size as usize;
        chunks_ok && size_ok
    }
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_recv_buffer_size: default_buffer_size(),
            max_send_buffer_size: default_buffer_size(),
            max_chunk_count: default_max_chunk_count(),
            max_message_size: default_max_message_size(),
        }
    }
}

// =============================================================================
// SubscriptionParameters
// =============================================================================

/// Parameters of a CreateSubscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionParameters {
    /// Requested publishing interval.
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Requested lifetime count.
    pub lifetime_count: u32,

    /// Requested keep-alive count.
    pub max_keepalive_count: u32,

    /// Maximum notifications per Publish response.
    pub max_notifications_per_publish: u32,

    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,

    /// Relative priority.
    pub priority: u8,
}

impl SubscriptionParameters {
    /// Default lifetime count.
    pub const DEFAULT_LIFETIME_COUNT: u32 = 10_000;

    /// Default notifications per publish.
    pub const DEFAULT_MAX_NOTIFICATIONS: u32 = 10_000;

    /// Derives parameters for a session with the given timeout.
    ///
    /// The keep-alive count is chosen so that three keep-alive periods
    /// fit into three quarters of the session timeout, and is at least 1.
    pub fn for_session(publishing_interval: Duration, session_timeout: Duration) -> Self {
        let interval_ms = publishing_interval.as_secs_f64() * 1000.0;
        let timeout_ms = session_timeout.as_secs_f64() * 1000.0;
        let keepalive = if interval_ms > 0.0 {
            (timeout_ms / interval_ms * 0.75 / 3.0) as u32
        } else {
            1
        };

        Self {
            publishing_interval,
            lifetime_count: Self::DEFAULT_LIFETIME_COUNT,
            max_keepalive_count: keepalive.max(1),
            max_notifications_per_publish: Self::DEFAULT_MAX_NOTIFICATIONS,
            publishing_enabled: true,
            priority: 0,
        }
    }

    /// Returns the publishing interval in milliseconds.
    pub fn publishing_interval_ms(&self) -> f64 {
        self.publishing_interval.as_secs_f64() * 1000.0
    }
}

impl Default for SubscriptionParameters {
    fn default() -> Self {
        Self::for_session(Duration::from_millis(500), default_lifetime())
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// OPC UA client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (`opc.tcp://host:port/path`).
    pub endpoint_url: String,

    /// Application name, also the session name prefix.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI.
    #[serde(default = "default_application_uri")]
    pub application_uri: String,

    /// Product URI.
    #[serde(default = "default_product_uri")]
    pub product_uri: String,

    /// Fixed session name; generated per session when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// Channel security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicyKind,

    /// Channel security mode.
    #[serde(default)]
    pub security_mode: MessageSecurityMode,

    /// User name for username/password authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for username/password authentication.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Socket connect and Hello timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-request timeout, also sent as the timeout hint.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Requested secure channel token lifetime.
    #[serde(default = "default_lifetime", with = "humantime_serde")]
    pub secure_channel_lifetime: Duration,

    /// Requested session timeout.
    #[serde(default = "default_lifetime", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Transport limits offered in Hello.
    #[serde(default)]
    pub transport_limits: TransportLimits,

    /// Publish requests kept outstanding by the publish loop.
    #[serde(default = "default_max_inflight_publish")]
    pub max_inflight_publish: usize,

    /// Preferred locales sent in ActivateSession.
    #[serde(default = "default_locale_ids")]
    pub locale_ids: Vec<String>,
}

fn default_application_name() -> String {
    "ualink".to_string()
}

fn default_application_uri() -> String {
    "urn:ualink:client".to_string()
}

fn default_product_uri() -> String {
    "urn:ualink".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(4)
}

fn default_lifetime() -> Duration {
    Duration::from_millis(3_600_000)
}

fn default_max_inflight_publish() -> usize {
    2
}

fn default_locale_ids() -> Vec<String> {
    vec!["en".to_string()]
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Creates a configuration with defaults for everything but the endpoint.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        if self.endpoint_url.is_empty() {
            return Err(UaError::invalid_config("endpoint_url", "must not be empty"));
        }

        if !self.endpoint_url.starts_with("opc.tcp://") {
            return Err(ConnectionError::invalid_endpoint(
                &self.endpoint_url,
                "endpoint must start with opc.tcp://",
            )
            .into());
        }

        if self.security_mode == MessageSecurityMode::None
            && self.security_policy != SecurityPolicyKind::None
        {
            return Err(UaError::invalid_config(
                "security_mode",
                "a security policy requires Sign or SignAndEncrypt",
            ));
        }

        if self.security_mode != MessageSecurityMode::None
            && self.security_policy == SecurityPolicyKind::None
        {
            return Err(UaError::invalid_config(
                "security_policy",
                "Sign and SignAndEncrypt require a security policy",
            ));
        }

        if self.session_timeout.is_zero() {
            return Err(UaError::invalid_config("session_timeout", "must be greater than 0"));
        }

        if self.secure_channel_lifetime.is_zero() {
            return Err(UaError::invalid_config(
                "secure_channel_lifetime",
                "must be greater than 0",
            ));
        }

        if self.max_inflight_publish == 0 {
            return Err(UaError::invalid_config(
                "max_inflight_publish",
                "at least one Publish request must be outstanding",
            ));
        }

        let limits = &self.transport_limits;
        if limits.max_recv_buffer_size < 8192 || limits.max_send_buffer_size < 8192 {
            return Err(UaError::invalid_config(
                "transport_limits",
                "buffer sizes must be at least 8192 bytes",
            ));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(UaError::invalid_config("password", "password given without username"));
        }

        Ok(())
    }

    /// Returns the requested channel lifetime in milliseconds.
    pub fn secure_channel_lifetime_ms(&self) -> u32 {
        u32::try_from(self.secure_channel_lifetime.as_millis()).unwrap_or(u32::MAX)
    }

    /// Returns the requested session timeout in milliseconds.
    pub fn session_timeout_ms(&self) -> f64 {
        self.session_timeout.as_secs_f64() * 1000.0
    }

    /// Returns the request timeout in milliseconds, as sent in request headers.
    pub fn timeout_hint_ms(&self) -> u32 {
        u32::try_from(self.request_timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            application_name: default_application_name(),
            application_uri: default_application_uri(),
            product_uri: default_product_uri(),
            session_name: None,
            security_policy: SecurityPolicyKind::default(),
            security_mode: MessageSecurityMode::default(),
            username: None,
            password: None,
            connect_timeout: default_timeout(),
            request_timeout: default_timeout(),
            secure_channel_lifetime: default_lifetime(),
            session_timeout: default_lifetime(),
            transport_limits: TransportLimits::default(),
            max_inflight_publish: default_max_inflight_publish(),
            locale_ids: default_locale_ids(),
        }
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    endpoint_url: Option<String>,
    application_name: Option<String>,
    application_uri: Option<String>,
    product_uri: Option<String>,
    session_name: Option<String>,
    security_policy: Option<SecurityPolicyKind>,
    security_mode: Option<MessageSecurityMode>,
    username: Option<String>,
    password: Option<String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    secure_channel_lifetime: Option<Duration>,
    session_timeout: Option<Duration>,
    transport_limits: Option<TransportLimits>,
    max_inflight_publish: Option<usize>,
    locale_ids: Option<Vec<String>>,
}

impl ClientConfigBuilder {
    /// Sets the server endpoint URL.
    pub fn endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Sets the application URI.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_uri = Some(uri.into());
        self
    }

    /// Sets the product URI.
    pub fn product_uri(mut self, uri: impl Into<String>) -> Self {
        self.product_uri = Some(uri.into());
        self
    }

    /// Sets a fixed session name.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    /// Sets the channel security policy.
    pub fn security_policy(mut self, policy: SecurityPolicyKind) -> Self {
        self.security_policy = Some(policy);
        self
    }

    /// Sets the channel security mode.
    pub fn security_mode(mut self, mode: MessageSecurityMode) -> Self {
        self.security_mode = Some(mode);
        self
    }

    /// Sets username/password authentication.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the requested secure channel lifetime.
    pub fn secure_channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.secure_channel_lifetime = Some(lifetime);
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Sets the transport limits.
    pub fn transport_limits(mut self, limits: TransportLimits) -> Self {
        self.transport_limits = Some(limits);
        self
    }

    /// Sets the number of outstanding Publish requests.
    pub fn max_inflight_publish(mut self, count: usize) -> Self {
        self.max_inflight_publish = Some(count);
        self
    }

    /// Sets the preferred locales.
    pub fn locale_ids(mut self, locales: Vec<String>) -> Self {
        self.locale_ids = Some(locales);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<ClientConfig> {
        let endpoint_url = self
            .endpoint_url
            .ok_or_else(|| UaError::invalid_config("endpoint_url", "missing required field"))?;

        let config = ClientConfig {
            endpoint_url,
            application_name: self.application_name.unwrap_or_else(default_application_name),
            application_uri: self.application_uri.unwrap_or_else(default_application_uri),
            product_uri: self.product_uri.unwrap_or_else(default_product_uri),
            session_name: self.session_name,
            security_policy: self.security_policy.unwrap_or_default(),
            security_mode: self.security_mode.unwrap_or_default(),
            username: self.username,
            password: self.password,
            connect_timeout: self.connect_timeout.unwrap_or_else(default_timeout),
            request_timeout: self.request_timeout.unwrap_or_else(default_timeout),
            secure_channel_lifetime: self
                .secure_channel_lifetime
                .unwrap_or_else(default_lifetime),
            session_timeout: self.session_timeout.unwrap_or_else(default_lifetime),
            transport_limits: self.transport_limits.unwrap_or_default(),
            max_inflight_publish: self
                .max_inflight_publish
                .unwrap_or_else(default_max_inflight_publish),
            locale_ids: self.locale_ids.unwrap_or_else(default_locale_ids),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("opc.tcp://localhost:4840");
        assert_eq!(config.connect_timeout, Duration::from_secs(4));
        assert_eq!(config.request_timeout, Duration::from_secs(4));
        assert_eq!(config.secure_channel_lifetime_ms(), 3_600_000);
        assert_eq!(config.session_timeout_ms(), 3_600_000.0);
        assert_eq!(config.max_inflight_publish, 2);
        assert_eq!(config.locale_ids, vec!["en".to_string()]);

        let limits = config.transport_limits;
        assert_eq!(limits.max_recv_buffer_size, 65_535);
        assert_eq!(limits.max_send_buffer_size, 65_535);
        assert_eq!(limits.max_message_size, 104_857_600);
        assert_eq!(limits.max_chunk_count, 104_857_600 / 65_535 + 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_scheme_is_checked() {
        let err = ClientConfig::builder()
            .endpoint("http://localhost:4840")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            UaError::Connection(ConnectionError::InvalidEndpoint { .. })
        ));

        assert!(ClientConfig::builder().build().is_err());
    }

    #[test]
    fn test_mode_and_policy_must_agree() {
        let result = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .security_mode(MessageSecurityMode::Sign)
            .build();
        assert!(result.is_err());

        let result = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .security_mode(MessageSecurityMode::Sign)
            .security_policy(SecurityPolicyKind::Basic256Sha256)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_negotiated_limits_swap_buffers() {
        let limits = TransportLimits::negotiated(8192, 16384, 0, 0);
        assert_eq!(limits.max_send_buffer_size, 8192);
        assert_eq!(limits.max_recv_buffer_size, 16384);
        assert!(limits.allows(10_000, usize::MAX));

        let limited = TransportLimits::negotiated(8192, 8192, 1000, 2);
        assert!(limited.allows(2, 1000));
        assert!(!limited.allows(3, 10));
        assert!(!limited.allows(1, 1001));
    }

    #[test]
    fn test_keepalive_derivation() {
        let params = SubscriptionParameters::for_session(
            Duration::from_millis(100),
            Duration::from_millis(3_600_000),
        );
        assert_eq!(params.max_keepalive_count, 9000);
        assert_eq!(params.lifetime_count, 10_000);
        assert!(params.publishing_enabled);

        let params =
            SubscriptionParameters::for_session(Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(params.max_keepalive_count, 1);
    }

    #[test]
    fn test_serde_humantime() {
        let json = r#"{
            "endpoint_url": "opc.tcp://plc:4840",
            "request_timeout": "10s",
            "session_timeout": "30m"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.session_timeout, Duration::from_secs(1800));
        assert_eq!(config.connect_timeout, Duration::from_secs(4));
    }
}
