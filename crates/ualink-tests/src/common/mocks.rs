// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Handlers that record what they receive, and a deterministic security
//! policy for exercising signatures without real cryptography.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use ualink_client::security::{
    NoSecurity, PrivateKeySigner, SignatureHash, RSA_SHA256_URI,
};
use ualink_client::{
    DataChange, Event, SecurityPolicy, SecurityPolicyFactory, SecurityPolicyKind, StatusChange,
    StatusChangeHandler, SubscriptionHandler, UaResult, Variant,
};
use ualink_client::client::subscription::{HandlerError, HandlerResult};

// =============================================================================
// RecordingHandler
// =============================================================================

/// Subscription handler that records every notification in arrival order.
#[derive(Default)]
pub struct RecordingHandler {
    data_changes: Mutex<Vec<DataChange>>,
    events: Mutex<Vec<Event>>,
    failing: Mutex<HashSet<u32>>,
    panicking: Mutex<HashSet<u32>>,
    signal: Notify,
}

impl RecordingHandler {
    /// Creates an empty handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns an error for notifications of `client_handle`.
    pub fn fail_on(&self, client_handle: u32) {
        self.failing.lock().insert(client_handle);
    }

    /// Panics on notifications of `client_handle`.
    pub fn panic_on(&self, client_handle: u32) {
        self.panicking.lock().insert(client_handle);
    }

    /// Returns the recorded data changes.
    pub fn data_changes(&self) -> Vec<DataChange> {
        self.data_changes.lock().clone()
    }

    /// Returns the recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Returns the recorded values as `i32`, in arrival order.
    pub fn int_values(&self) -> Vec<i32> {
        self.data_changes
            .lock()
            .iter()
            .filter_map(|n| match n.value.value() {
                Variant::Int32(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Returns how many notifications were recorded.
    pub fn len(&self) -> usize {
        self.data_changes.lock().len() + self.events.lock().len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until at least `count` notifications were recorded.
    ///
    /// # Panics
    ///
    /// Panics after five seconds.
    pub async fn wait_for(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.signal.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("expected {count} notifications, got {}", self.len());
        }
    }

    fn outcome(&self, client_handle: u32) -> HandlerResult {
        if self.panicking.lock().contains(&client_handle) {
            panic!("handler panic for client handle {client_handle}");
        }
        if self.failing.lock().contains(&client_handle) {
            return Err(HandlerError::from(format!(
                "rejected client handle {client_handle}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionHandler for RecordingHandler {
    async fn on_data_change(&self, notification: DataChange) -> HandlerResult {
        let client_handle = notification.client_handle;
        self.data_changes.lock().push(notification);
        self.signal.notify_waiters();
        self.outcome(client_handle)
    }

    async fn on_event(&self, event: Event) -> HandlerResult {
        let client_handle = event.client_handle;
        self.events.lock().push(event);
        self.signal.notify_waiters();
        self.outcome(client_handle)
    }
}

// =============================================================================
// RecordingStatusHandler
// =============================================================================

/// Status change handler that records every change.
#[derive(Default)]
pub struct RecordingStatusHandler {
    changes: Mutex<Vec<StatusChange>>,
    signal: Notify,
}

impl RecordingStatusHandler {
    /// Creates an empty handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the recorded changes.
    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes.lock().clone()
    }

    /// Waits until at least `count` changes were recorded.
    pub async fn wait_for(&self, count: usize) {
        let wait = async {
            loop {
                let notified = self.signal.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.changes.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("expected {count} status changes");
        }
    }
}

#[async_trait]
impl StatusChangeHandler for RecordingStatusHandler {
    async fn on_status_change(&self, change: StatusChange) -> HandlerResult {
        self.changes.lock().push(change);
        self.signal.notify_waiters();
        Ok(())
    }
}

// =============================================================================
// Deterministic security
// =============================================================================

/// Asymmetric encryption URI reported by [`MirrorPolicy`].
pub const MIRROR_ENCRYPTION_URI: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep";

/// Basic256Sha256 stand-in: a signature is the data reversed, encryption
/// XORs with the key.
#[derive(Debug, Clone)]
pub struct MirrorPolicy {
    host_certificate: Vec<u8>,
    peer_certificate: Option<Vec<u8>>,
}

impl MirrorPolicy {
    /// Creates a policy holding `host_certificate`.
    pub fn new(host_certificate: impl Into<Vec<u8>>) -> Self {
        Self {
            host_certificate: host_certificate.into(),
            peer_certificate: None,
        }
    }

    /// Sets the peer certificate.
    pub fn with_peer(mut self, peer_certificate: impl Into<Vec<u8>>) -> Self {
        self.peer_certificate = Some(peer_certificate.into());
        self
    }

    /// Computes the signature of `data`.
    pub fn signature_of(data: &[u8]) -> Vec<u8> {
        data.iter().rev().copied().collect()
    }

    /// Reverses [`encrypt`](SecurityPolicy::encrypt).
    pub fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
        if key.is_empty() {
            return data.to_vec();
        }
        data.iter()
            .zip(key.iter().cycle())
            .map(|(d, k)| d ^ k)
            .collect()
    }
}

impl SecurityPolicy for MirrorPolicy {
    fn uri(&self) -> &str {
        SecurityPolicyKind::Basic256Sha256.uri()
    }

    fn symmetric_key_size(&self) -> usize {
        32
    }

    fn signature_size(&self) -> usize {
        32
    }

    fn host_certificate(&self) -> &[u8] {
        &self.host_certificate
    }

    fn peer_certificate(&self) -> Option<&[u8]> {
        self.peer_certificate.as_deref()
    }

    fn asymmetric_signature_uri(&self) -> Option<&str> {
        Some(RSA_SHA256_URI)
    }

    fn asymmetric_encryption_uri(&self) -> Option<&str> {
        Some(MIRROR_ENCRYPTION_URI)
    }

    fn sign(&self, data: &[u8]) -> UaResult<Vec<u8>> {
        Ok(Self::signature_of(data))
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> UaResult<bool> {
        Ok(Self::signature_of(data) == signature)
    }

    fn encrypt(&self, data: &[u8], key: &[u8]) -> UaResult<Vec<u8>> {
        Ok(Self::xor(data, key))
    }

    fn decrypt(&self, data: &[u8]) -> UaResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Factory creating [`MirrorPolicy`] for every secured URI.
#[derive(Debug, Clone, Default)]
pub struct MirrorPolicyFactory;

impl SecurityPolicyFactory for MirrorPolicyFactory {
    fn create(
        &self,
        uri: &str,
        peer_certificate: Option<&[u8]>,
    ) -> UaResult<Arc<dyn SecurityPolicy>> {
        if SecurityPolicyKind::is_none_uri(uri) {
            return Ok(Arc::new(NoSecurity));
        }
        let policy = MirrorPolicy::new(Vec::new())
            .with_peer(peer_certificate.unwrap_or_default().to_vec());
        Ok(Arc::new(policy))
    }
}

/// User key signer producing [`MirrorPolicy`] signatures.
#[derive(Debug, Clone, Default)]
pub struct MirrorSigner;

impl PrivateKeySigner for MirrorSigner {
    fn sign(&self, data: &[u8], _hash: SignatureHash) -> UaResult<Vec<u8>> {
        Ok(MirrorPolicy::signature_of(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_signature_round_trip() {
        let policy = MirrorPolicy::new(b"host".to_vec());
        let signature = policy.sign(b"challenge").unwrap();
        assert!(policy.verify(b"challenge", &signature).unwrap());
        assert!(!policy.verify(b"challenge", b"forged").unwrap());
    }

    #[test]
    fn test_xor_is_symmetric() {
        let encrypted = MirrorPolicy::xor(b"secret", b"key");
        assert_ne!(encrypted, b"secret");
        assert_eq!(MirrorPolicy::xor(&encrypted, b"key"), b"secret");
    }
}
