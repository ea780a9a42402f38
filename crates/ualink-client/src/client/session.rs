// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA session management.
//!
//! [`SessionManager`] creates, activates and closes the session that rides
//! on the secure channel. It owns the channel renewal loop, so that closing
//! the session always stops renewal before CloseSession goes out.
//!
//! # Identity selection
//!
//! | Credentials given        | Token sent  |
//! |--------------------------|-------------|
//! | certificate              | X.509       |
//! | username (no certificate)| UserName    |
//! | neither                  | Anonymous   |

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, SecurityError, SessionError, UaResult};
use crate::messages::{
    ActivateSessionRequest, ActivateSessionResponse, AnonymousIdentityToken,
    ApplicationDescription, CloseSessionRequest, CloseSessionResponse, CreateSessionRequest,
    CreateSessionResponse, EndpointDescription, RequestHeader, SignatureData, UserIdentityToken,
    UserNameIdentityToken, UserTokenPolicy, X509IdentityToken,
};
use crate::security::{
    concat, create_nonce, password_plaintext, SecurityPolicyFactory, UserCertificate,
    RSA_SHA1_URI, SESSION_NONCE_LENGTH,
};
use crate::transport::UaConnection;
use crate::types::{NodeId, SecurityPolicyKind, UserTokenType};

use super::channel::SecureChannelManager;
use super::renewal::{RenewalHandle, RenewalLoop, RenewalStatus};

/// Policy id used when the server offers no anonymous policy.
pub const DEFAULT_ANONYMOUS_POLICY_ID: &str = "anonymous";

/// Policy id used when the server offers no username policy.
pub const DEFAULT_USERNAME_POLICY_ID: &str = "username_basic256";

// =============================================================================
// UserIdentity
// =============================================================================

/// Credentials presented by ActivateSession.
#[derive(Clone, Default)]
pub enum UserIdentity {
    /// No credentials.
    #[default]
    Anonymous,
    /// Username and password.
    UserName {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// X.509 user certificate.
    Certificate(UserCertificate),
}

impl UserIdentity {
    /// Picks the identity from the credentials that are present.
    ///
    /// A certificate wins over a username; anonymous is used only when
    /// neither is given. An empty username counts as absent.
    pub fn from_credentials(
        username: Option<&str>,
        password: Option<&str>,
        certificate: Option<UserCertificate>,
    ) -> Self {
        if let Some(certificate) = certificate {
            return Self::Certificate(certificate);
        }
        match username {
            Some(username) if !username.is_empty() => Self::UserName {
                username: username.to_string(),
                password: password.unwrap_or_default().to_string(),
            },
            _ => Self::Anonymous,
        }
    }

    /// Returns the token type this identity produces.
    pub fn token_type(&self) -> UserTokenType {
        match self {
            Self::Anonymous => UserTokenType::Anonymous,
            Self::UserName { .. } => UserTokenType::UserName,
            Self::Certificate(_) => UserTokenType::Certificate,
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Certificate(certificate) => f.debug_tuple("Certificate").field(certificate).finish(),
        }
    }
}

// =============================================================================
// SessionInfo
// =============================================================================

/// A created session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id.
    pub session_id: NodeId,
    /// Token stamped on every request of this session.
    pub authentication_token: NodeId,
    /// Revised session timeout.
    pub session_timeout: Duration,
    /// Latest server nonce.
    pub server_nonce: Vec<u8>,
    /// Server certificate (DER).
    pub server_certificate: Vec<u8>,
    /// Token policies of the matched endpoint.
    pub user_token_policies: Vec<UserTokenPolicy>,
    /// Largest request the server accepts; 0 means no limit.
    pub max_request_message_size: u32,
    /// Session name.
    pub session_name: String,
    /// Whether ActivateSession succeeded.
    pub activated: bool,
}

impl SessionInfo {
    fn policy_for(&self, token_type: UserTokenType) -> Option<&UserTokenPolicy> {
        self.user_token_policies
            .iter()
            .find(|policy| policy.token_type == token_type)
    }
}

/// Fixed inputs of CreateSession and ActivateSession.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Endpoint URL sent with CreateSession.
    pub endpoint_url: String,
    /// Overrides the generated session name.
    pub session_name: Option<String>,
    /// Largest response the client accepts; 0 means no limit.
    pub max_response_message_size: u32,
    /// Locales sent with ActivateSession.
    pub locale_ids: Vec<String>,
}

// =============================================================================
// SessionManager
// =============================================================================

/// Creates, activates and closes the session of one connection.
pub struct SessionManager {
    connection: Arc<dyn UaConnection>,
    channel: Arc<SecureChannelManager>,
    factory: Arc<dyn SecurityPolicyFactory>,
    settings: SessionSettings,
    session_count: AtomicU32,
    pinned_certificate: RwLock<Option<Vec<u8>>>,
    session: RwLock<Option<SessionInfo>>,
    session_timeout: watch::Sender<Duration>,
    renewal: Mutex<Option<RenewalHandle>>,
    renewal_status: Mutex<Option<watch::Receiver<RenewalStatus>>>,
}

impl SessionManager {
    /// Creates a manager.
    ///
    /// A peer certificate already known to the channel policy is pinned
    /// from the start.
    pub fn new(
        connection: Arc<dyn UaConnection>,
        channel: Arc<SecureChannelManager>,
        factory: Arc<dyn SecurityPolicyFactory>,
        settings: SessionSettings,
    ) -> Self {
        let pinned = channel
            .policy()
            .peer_certificate()
            .filter(|cert| !cert.is_empty())
            .map(<[u8]>::to_vec);
        let (session_timeout, _) = watch::channel(Duration::from_millis(3_600_000));

        Self {
            connection,
            channel,
            factory,
            settings,
            session_count: AtomicU32::new(0),
            pinned_certificate: RwLock::new(pinned),
            session: RwLock::new(None),
            session_timeout,
            renewal: Mutex::new(None),
            renewal_status: Mutex::new(None),
        }
    }

    /// Sends CreateSession and checks the server's answer.
    ///
    /// On any policy other than None the server signature over our
    /// certificate and nonce must verify. The first non-empty server
    /// certificate is pinned; once pinned, any other certificate, including
    /// an empty one, fails.
    pub async fn create(
        &self,
        application: &ApplicationDescription,
        session_timeout: Duration,
    ) -> UaResult<SessionInfo> {
        let n = self.session_count.fetch_add(1, Ordering::Relaxed) + 1;
        let session_name = self
            .settings
            .session_name
            .clone()
            .unwrap_or_else(|| format!("{} Session{}", application.application_name.text, n));
        let policy = Arc::clone(self.channel.policy());
        let client_nonce = create_nonce(SESSION_NONCE_LENGTH);

        let request = CreateSessionRequest {
            request_header: RequestHeader::default(),
            client_description: application.clone(),
            endpoint_url: self.settings.endpoint_url.clone(),
            session_name: session_name.clone(),
            client_nonce: client_nonce.clone(),
            client_certificate: policy.host_certificate().to_vec(),
            requested_session_timeout: session_timeout.as_secs_f64() * 1000.0,
            max_response_message_size: self.settings.max_response_message_size,
        };
        let response: CreateSessionResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        if !policy.is_none() {
            // Without a host certificate the challenge is the nonce alone.
            let challenge = concat(policy.host_certificate(), &client_nonce);
            if !policy.verify(&challenge, &response.server_signature.signature)? {
                return Err(SecurityError::signature_invalid("CreateSession server signature").into());
            }
        }
        self.pin_certificate(&response.server_certificate)?;

        let endpoint = self.match_endpoint(&response.server_endpoints)?;
        if response.authentication_token.is_null() {
            return Err(SessionError::creation_failed("server returned a null authentication token").into());
        }

        let revised = Duration::try_from_secs_f64(response.revised_session_timeout / 1000.0)
            .unwrap_or(session_timeout);
        if revised != session_timeout {
            warn!(
                requested_ms = session_timeout.as_millis() as u64,
                revised_ms = revised.as_millis() as u64,
                "Server revised the session timeout"
            );
        }
        self.session_timeout.send_replace(revised);
        self.connection
            .set_authentication_token(response.authentication_token.clone());

        let info = SessionInfo {
            session_id: response.session_id,
            authentication_token: response.authentication_token,
            session_timeout: revised,
            server_nonce: response.server_nonce,
            server_certificate: response.server_certificate,
            user_token_policies: endpoint.user_identity_tokens.clone(),
            max_request_message_size: response.max_request_message_size,
            session_name,
            activated: false,
        };
        info!(
            session_id = %info.session_id,
            session_name = %info.session_name,
            timeout_ms = revised.as_millis() as u64,
            "Session created"
        );
        *self.session.write() = Some(info.clone());
        Ok(info)
    }

    fn pin_certificate(&self, certificate: &[u8]) -> UaResult<()> {
        let mut pinned = self.pinned_certificate.write();
        match pinned.as_deref() {
            Some(known) if known != certificate => Err(SecurityError::CertificateMismatch.into()),
            Some(_) => Ok(()),
            None if certificate.is_empty() => Ok(()),
            None => {
                debug!(len = certificate.len(), "Server certificate pinned");
                *pinned = Some(certificate.to_vec());
                Ok(())
            }
        }
    }

    fn match_endpoint<'a>(
        &self,
        endpoints: &'a [EndpointDescription],
    ) -> UaResult<&'a EndpointDescription> {
        let mode = self.channel.security_mode();
        let policy_uri = self.channel.policy().uri();
        endpoints
            .iter()
            .find(|e| {
                e.endpoint_url.starts_with("opc.tcp")
                    && e.security_mode == mode
                    && e.security_policy_uri == policy_uri
            })
            .ok_or_else(|| ConnectionError::no_suitable_endpoint(mode.name(), policy_uri).into())
    }

    /// Sends ActivateSession with the given identity.
    pub async fn activate(&self, identity: &UserIdentity) -> UaResult<()> {
        let session = self.session.read().clone().ok_or(SessionError::NotCreated)?;
        let peer_certificate = self.pinned_certificate().unwrap_or_default();
        let policy = Arc::clone(self.channel.policy());
        let challenge = concat(&peer_certificate, &session.server_nonce);

        let client_signature = SignatureData {
            algorithm: Some(
                policy
                    .asymmetric_signature_uri()
                    .unwrap_or(RSA_SHA1_URI)
                    .to_string(),
            ),
            signature: policy.sign(&challenge)?,
        };

        let mut user_token_signature = SignatureData::default();
        let user_identity_token = match identity {
            UserIdentity::Anonymous => UserIdentityToken::Anonymous(AnonymousIdentityToken {
                policy_id: session
                    .policy_for(UserTokenType::Anonymous)
                    .map_or(DEFAULT_ANONYMOUS_POLICY_ID, |p| p.policy_id.as_str())
                    .to_string(),
            }),
            UserIdentity::UserName { username, password } => {
                UserIdentityToken::UserName(self.username_token(
                    &session,
                    username,
                    password,
                    &peer_certificate,
                )?)
            }
            UserIdentity::Certificate(certificate) => {
                user_token_signature = SignatureData {
                    algorithm: Some(certificate.hash.signature_uri().to_string()),
                    signature: certificate.sign(&challenge)?,
                };
                UserIdentityToken::X509(X509IdentityToken {
                    policy_id: session
                        .policy_for(UserTokenType::Certificate)
                        .map_or(certificate.hash.default_policy_id(), |p| p.policy_id.as_str())
                        .to_string(),
                    certificate_data: certificate.der.clone(),
                })
            }
        };

        let request = ActivateSessionRequest {
            request_header: RequestHeader::default(),
            client_signature,
            locale_ids: self.settings.locale_ids.clone(),
            user_identity_token,
            user_token_signature,
        };
        let response: ActivateSessionResponse = self
            .connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)?;

        if let Some(session) = self.session.write().as_mut() {
            session.server_nonce = response.server_nonce;
            session.activated = true;
        }
        info!(
            session_id = %session.session_id,
            identity = %identity.token_type(),
            "Session activated"
        );
        Ok(())
    }

    fn username_token(
        &self,
        session: &SessionInfo,
        username: &str,
        password: &str,
        peer_certificate: &[u8],
    ) -> UaResult<UserNameIdentityToken> {
        let token_policy = session.policy_for(UserTokenType::UserName);
        let policy_id = token_policy
            .map_or(DEFAULT_USERNAME_POLICY_ID, |p| p.policy_id.as_str())
            .to_string();
        let uri = token_policy
            .and_then(|p| p.security_policy_uri.as_deref())
            .filter(|uri| !uri.is_empty())
            .unwrap_or_else(|| self.channel.policy().uri())
            .to_string();

        if uri.is_empty() || SecurityPolicyKind::is_none_uri(&uri) {
            warn!(
                username,
                "Sending password in plaintext; the username token policy has no security"
            );
            return Ok(UserNameIdentityToken {
                policy_id,
                user_name: username.to_string(),
                password: password.as_bytes().to_vec(),
                encryption_algorithm: None,
            });
        }

        let encryption = self.factory.create(&uri, Some(peer_certificate))?;
        let plaintext = password_plaintext(password, &session.server_nonce);
        let encrypted = encryption.encrypt(&plaintext, peer_certificate)?;
        debug!(policy = %uri, "Password encrypted");

        Ok(UserNameIdentityToken {
            policy_id,
            user_name: username.to_string(),
            password: encrypted,
            encryption_algorithm: encryption.asymmetric_encryption_uri().map(str::to_string),
        })
    }

    // =========================================================================
    // Renewal
    // =========================================================================

    /// Starts the channel renewal loop.
    pub fn start_renewal(&self) {
        let handle = RenewalLoop::spawn(
            Arc::clone(&self.channel),
            Arc::clone(&self.connection),
            self.session_timeout.subscribe(),
        );
        *self.renewal_status.lock() = Some(handle.status());
        if let Some(previous) = self.renewal.lock().replace(handle) {
            warn!("Renewal loop replaced while still running");
            previous.cancel();
        }
    }

    /// Cancels the renewal loop and waits for it. Errors are logged.
    pub async fn stop_renewal(&self) {
        let handle = self.renewal.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.stop().await {
                warn!(error = %e, "Renewal loop had ended with an error");
            }
        }
    }

    /// Returns the renewal status; `Idle` before the loop first started.
    pub fn renewal_status(&self) -> RenewalStatus {
        self.renewal_status
            .lock()
            .as_ref()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default()
    }

    /// Returns a receiver of renewal status updates of the current loop.
    pub fn watch_renewal(&self) -> Option<watch::Receiver<RenewalStatus>> {
        self.renewal_status.lock().clone()
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Stops renewal, then sends CloseSession deleting its subscriptions.
    ///
    /// Closing without a session succeeds.
    pub async fn close(&self) -> UaResult<()> {
        self.stop_renewal().await;

        let Some(session) = self.session.write().take() else {
            return Ok(());
        };
        let result = if self.connection.state().is_connected() {
            let request = CloseSessionRequest {
                request_header: RequestHeader::default(),
                delete_subscriptions: true,
            };
            self.connection
                .send_request(request.into())
                .await
                .and_then(CloseSessionResponse::try_from)
                .map(drop)
        } else {
            Ok(())
        };

        self.connection.set_authentication_token(NodeId::null());
        info!(session_id = %session.session_id, "Session closed");
        result
    }

    /// Forgets the session without telling the server.
    pub fn reset(&self) {
        self.session.write().take();
        self.connection.set_authentication_token(NodeId::null());
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the current session.
    pub fn info(&self) -> Option<SessionInfo> {
        self.session.read().clone()
    }

    /// Returns `true` once the session is activated.
    pub fn is_active(&self) -> bool {
        self.session.read().as_ref().is_some_and(|s| s.activated)
    }

    /// Returns the pinned server certificate.
    pub fn pinned_certificate(&self) -> Option<Vec<u8>> {
        self.pinned_certificate.read().clone()
    }

    /// Returns the revised session timeout.
    pub fn session_timeout(&self) -> Duration {
        *self.session_timeout.borrow()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &self.session.read().as_ref().map(|s| s.session_id.clone()))
            .field("sessions_created", &self.session_count.load(Ordering::Relaxed))
            .field("renewal", &self.renewal_status())
            .finish()
    }
}
