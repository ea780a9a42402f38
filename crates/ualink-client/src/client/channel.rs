// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel lifecycle.
//!
//! [`SecureChannelManager`] issues the first security token, renews it on
//! request, and closes the channel. The lifetime the server revises is the
//! one later renewals are scheduled against.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{ChannelError, UaResult};
use crate::messages::{
    ChannelSecurityToken, CloseSecureChannelRequest, OpenSecureChannelRequest,
    OpenSecureChannelResponse, RequestHeader, SecurityTokenRequestType,
};
use crate::security::{create_nonce, SecurityPolicy};
use crate::transport::framing::PROTOCOL_VERSION;
use crate::transport::UaConnection;
use crate::types::MessageSecurityMode;

/// An open secure channel.
#[derive(Debug, Clone)]
pub struct SecureChannel {
    /// Channel id assigned by the server.
    pub channel_id: u32,
    /// Current security token.
    pub security_token: ChannelSecurityToken,
    /// Token lifetime revised by the server.
    pub token_lifetime: Duration,
    /// Channel security mode.
    pub security_mode: MessageSecurityMode,
    /// Channel security policy URI.
    pub security_policy: String,
    /// When the current token was installed.
    pub issued_at: Instant,
}

impl SecureChannel {
    /// Returns the time left before the current token expires.
    pub fn remaining_lifetime(&self) -> Duration {
        self.token_lifetime.saturating_sub(self.issued_at.elapsed())
    }

    /// Returns the time since the current token was installed.
    pub fn token_age(&self) -> Duration {
        self.issued_at.elapsed()
    }
}

/// Opens, renews and closes the secure channel of one connection.
pub struct SecureChannelManager {
    connection: Arc<dyn UaConnection>,
    policy: Arc<dyn SecurityPolicy>,
    security_mode: MessageSecurityMode,
    requested_lifetime: u32,
    channel: RwLock<Option<SecureChannel>>,
}

impl SecureChannelManager {
    /// Creates a manager for a connection.
    pub fn new(
        connection: Arc<dyn UaConnection>,
        policy: Arc<dyn SecurityPolicy>,
        security_mode: MessageSecurityMode,
        requested_lifetime: u32,
    ) -> Self {
        Self {
            connection,
            policy,
            security_mode,
            requested_lifetime,
            channel: RwLock::new(None),
        }
    }

    /// Issues a token, or renews the current one when `renew` is set.
    ///
    /// On failure no channel state is kept; the caller closes the socket.
    pub async fn open(&self, renew: bool) -> UaResult<ChannelSecurityToken> {
        if renew && self.channel.read().is_none() {
            return Err(ChannelError::NotOpen.into());
        }

        let request_type = if renew {
            SecurityTokenRequestType::Renew
        } else {
            SecurityTokenRequestType::Issue
        };
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::default(),
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: self.security_mode,
            client_nonce: create_nonce(self.policy.symmetric_key_size()),
            requested_lifetime: self.requested_lifetime,
        };

        let response: OpenSecureChannelResponse = match self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)
        {
            Ok(response) => response,
            Err(e) => {
                if !renew {
                    self.channel.write().take();
                }
                return Err(e);
            }
        };

        let token = response.security_token;
        if token.revised_lifetime != self.requested_lifetime {
            debug!(
                requested_ms = self.requested_lifetime,
                revised_ms = token.revised_lifetime,
                "Server revised the channel lifetime"
            );
        }

        self.connection
            .install_security_token(&token, &response.server_nonce);
        *self.channel.write() = Some(SecureChannel {
            channel_id: token.channel_id,
            security_token: token.clone(),
            token_lifetime: Duration::from_millis(u64::from(token.revised_lifetime)),
            security_mode: self.security_mode,
            security_policy: self.policy.uri().to_string(),
            issued_at: Instant::now(),
        });

        if renew {
            debug!(channel_id = token.channel_id, token_id = token.token_id, "Secure channel renewed");
        } else {
            info!(
                channel_id = token.channel_id,
                token_id = token.token_id,
                lifetime_ms = token.revised_lifetime,
                mode = %self.security_mode,
                "Secure channel opened"
            );
        }
        Ok(token)
    }

    /// Closes the channel. Closing a channel that is not open succeeds.
    pub async fn close(&self) -> UaResult<()> {
        let Some(channel) = self.channel.write().take() else {
            return Ok(());
        };
        if !self.connection.state().is_connected() {
            return Ok(());
        }

        self.connection
            .send_request(CloseSecureChannelRequest::default().into())
            .await?;
        debug!(channel_id = channel.channel_id, "Secure channel closed");
        Ok(())
    }

    /// Forgets the channel without telling the server.
    pub fn reset(&self) {
        self.channel.write().take();
    }

    /// Returns the open channel.
    pub fn current(&self) -> Option<SecureChannel> {
        self.channel.read().clone()
    }

    /// Returns `true` while a channel is open.
    pub fn is_open(&self) -> bool {
        self.channel.read().is_some()
    }

    /// Returns the revised token lifetime of the open channel.
    pub fn token_lifetime(&self) -> Option<Duration> {
        self.channel.read().as_ref().map(|c| c.token_lifetime)
    }

    /// Returns the security policy of the channel.
    pub fn policy(&self) -> &Arc<dyn SecurityPolicy> {
        &self.policy
    }

    /// Returns the security mode of the channel.
    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }
}

impl std::fmt::Debug for SecureChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannelManager")
            .field("security_mode", &self.security_mode)
            .field("requested_lifetime", &self.requested_lifetime)
            .field("channel", &self.channel.read().as_ref().map(|c| c.channel_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaError;
    use crate::messages::ServiceRequest;
    use crate::security::NoSecurity;
    use crate::testing::{MockFailure, MockServer, MOCK_ENDPOINT};

    async fn manager(server: &MockServer) -> SecureChannelManager {
        server
            .connect_socket(MOCK_ENDPOINT, Duration::from_secs(1))
            .await
            .unwrap();
        SecureChannelManager::new(
            Arc::new(server.clone()),
            Arc::new(NoSecurity),
            MessageSecurityMode::None,
            3_600_000,
        )
    }

    fn request_types(server: &MockServer) -> Vec<SecurityTokenRequestType> {
        server
            .requests()
            .into_iter()
            .filter_map(|r| match r {
                ServiceRequest::OpenSecureChannel(o) => Some(o.request_type),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_issue_then_renew() {
        let server = MockServer::new();
        let channel = manager(&server).await;

        let first = channel.open(false).await.unwrap();
        let second = channel.open(true).await.unwrap();

        assert_eq!(first.channel_id, second.channel_id);
        assert_ne!(first.token_id, second.token_id);
        assert_eq!(
            request_types(&server),
            vec![SecurityTokenRequestType::Issue, SecurityTokenRequestType::Renew]
        );
        assert_eq!(server.installed_tokens().len(), 2);
    }

    #[tokio::test]
    async fn test_revised_lifetime_is_adopted() {
        let server = MockServer::new();
        server.set_channel_lifetime(20_000);
        let channel = manager(&server).await;

        channel.open(false).await.unwrap();
        assert_eq!(channel.token_lifetime(), Some(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_renew_without_channel() {
        let server = MockServer::new();
        let channel = manager(&server).await;
        let err = channel.open(true).await.unwrap_err();
        assert!(matches!(err, UaError::Channel(ChannelError::NotOpen)));
    }

    #[tokio::test]
    async fn test_failed_issue_keeps_no_state() {
        let server = MockServer::new();
        let channel = manager(&server).await;
        server.fail_next("OpenSecureChannel", MockFailure::Transport);

        assert!(channel.open(false).await.is_err());
        assert!(!channel.is_open());
        assert!(server.installed_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = MockServer::new();
        let channel = manager(&server).await;
        channel.open(false).await.unwrap();

        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert_eq!(server.count("CloseSecureChannel"), 1);
        assert!(!channel.is_open());
    }
}
