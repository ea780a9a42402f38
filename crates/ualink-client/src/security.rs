// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Security policy seam.
//!
//! The client never touches cryptographic primitives directly. Signing,
//! verification and encryption go through a [`SecurityPolicy`] supplied by
//! the application, usually backed by an RSA/AES implementation of its
//! choice. [`NoSecurity`] covers the `None` policy.
//!
//! A [`SecurityPolicyFactory`] creates policies by URI. The session layer
//! uses it to encrypt user passwords under the policy named by the server's
//! user token policy, which can differ from the channel policy.

use std::fmt;
use std::sync::Arc;

use bytes::BufMut;
use rand::RngCore;

use crate::error::{SecurityError, UaResult};
use crate::types::SecurityPolicyKind;

/// Signature algorithm URI for RSA with SHA-256.
pub const RSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// Signature algorithm URI for RSA with SHA-1.
pub const RSA_SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";

/// Length of the session client nonce.
pub const SESSION_NONCE_LENGTH: usize = 32;

// =============================================================================
// SecurityPolicy
// =============================================================================

/// Cryptographic operations of one security policy.
///
/// Implementations hold the host certificate and private key and, once
/// known, the peer certificate.
pub trait SecurityPolicy: Send + Sync + fmt::Debug {
    /// Policy URI.
    fn uri(&self) -> &str;

    /// Symmetric key size; also the length of the channel client nonce.
    fn symmetric_key_size(&self) -> usize;

    /// Size of the signature appended to each symmetric chunk.
    fn signature_size(&self) -> usize;

    /// Our certificate (DER); empty for the None policy.
    fn host_certificate(&self) -> &[u8];

    /// The peer certificate, when known.
    fn peer_certificate(&self) -> Option<&[u8]>;

    /// Asymmetric signature algorithm URI.
    fn asymmetric_signature_uri(&self) -> Option<&str>;

    /// Asymmetric encryption algorithm URI.
    fn asymmetric_encryption_uri(&self) -> Option<&str>;

    /// Signs `data` with our key.
    fn sign(&self, data: &[u8]) -> UaResult<Vec<u8>>;

    /// Checks a signature made by the peer.
    fn verify(&self, data: &[u8], signature: &[u8]) -> UaResult<bool>;

    /// Encrypts `data` under `key`.
    fn encrypt(&self, data: &[u8], key: &[u8]) -> UaResult<Vec<u8>>;

    /// Decrypts `data` received from the peer.
    fn decrypt(&self, data: &[u8]) -> UaResult<Vec<u8>>;

    /// Returns `true` for the None policy.
    fn is_none(&self) -> bool {
        SecurityPolicyKind::is_none_uri(self.uri())
    }
}

/// The `None` security policy: no signatures, no encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

impl SecurityPolicy for NoSecurity {
    fn uri(&self) -> &str {
        SecurityPolicyKind::NONE_URI
    }

    fn symmetric_key_size(&self) -> usize {
        0
    }

    fn signature_size(&self) -> usize {
        0
    }

    fn host_certificate(&self) -> &[u8] {
        &[]
    }

    fn peer_certificate(&self) -> Option<&[u8]> {
        None
    }

    fn asymmetric_signature_uri(&self) -> Option<&str> {
        None
    }

    fn asymmetric_encryption_uri(&self) -> Option<&str> {
        None
    }

    fn sign(&self, _data: &[u8]) -> UaResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn verify(&self, _data: &[u8], _signature: &[u8]) -> UaResult<bool> {
        Ok(true)
    }

    fn encrypt(&self, data: &[u8], _key: &[u8]) -> UaResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decrypt(&self, data: &[u8]) -> UaResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

// =============================================================================
// SecurityPolicyFactory
// =============================================================================

/// Creates security policies by URI.
pub trait SecurityPolicyFactory: Send + Sync + fmt::Debug {
    /// Creates the policy for `uri`, bound to the given peer certificate.
    fn create(
        &self,
        uri: &str,
        peer_certificate: Option<&[u8]>,
    ) -> UaResult<Arc<dyn SecurityPolicy>>;
}

/// Factory that only knows the None policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurityFactory;

impl SecurityPolicyFactory for NoSecurityFactory {
    fn create(
        &self,
        uri: &str,
        _peer_certificate: Option<&[u8]>,
    ) -> UaResult<Arc<dyn SecurityPolicy>> {
        if SecurityPolicyKind::is_none_uri(uri) {
            Ok(Arc::new(NoSecurity))
        } else {
            Err(SecurityError::unsupported_policy(uri).into())
        }
    }
}

// =============================================================================
// User certificates
// =============================================================================

/// Hash algorithm a certificate was signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureHash {
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl SignatureHash {
    /// Signature algorithm URI for user token signatures.
    pub const fn signature_uri(&self) -> &'static str {
        match self {
            Self::Sha1 => RSA_SHA1_URI,
            Self::Sha256 => RSA_SHA256_URI,
        }
    }

    /// Policy id used when the server offers no certificate policy.
    pub const fn default_policy_id(&self) -> &'static str {
        match self {
            Self::Sha1 => "certificate_basic256",
            Self::Sha256 => "certificate_basic256sha256",
        }
    }
}

/// Signs with a user's private key.
pub trait PrivateKeySigner: Send + Sync {
    /// Signs `data` using the given hash.
    fn sign(&self, data: &[u8], hash: SignatureHash) -> UaResult<Vec<u8>>;
}

/// An X.509 user identity: certificate plus the key that signs for it.
#[derive(Clone)]
pub struct UserCertificate {
    /// Certificate (DER).
    pub der: Vec<u8>,
    /// Hash algorithm of the certificate signature.
    pub hash: SignatureHash,
    /// Signer holding the private key.
    pub signer: Arc<dyn PrivateKeySigner>,
}

impl UserCertificate {
    /// Creates a user certificate.
    pub fn new(der: Vec<u8>, hash: SignatureHash, signer: Arc<dyn PrivateKeySigner>) -> Self {
        Self { der, hash, signer }
    }

    /// Signs the session challenge.
    pub fn sign(&self, data: &[u8]) -> UaResult<Vec<u8>> {
        self.signer.sign(data, self.hash)
    }
}

impl fmt::Debug for UserCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCertificate")
            .field("der_len", &self.der.len())
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Generates a random nonce of `length` bytes.
pub fn create_nonce(length: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Builds the plaintext of an encrypted password.
///
/// Layout: u32 little-endian length of `password + server_nonce`, then the
/// password bytes, then the nonce.
pub fn password_plaintext(password: &str, server_nonce: &[u8]) -> Vec<u8> {
    let length = password.len() + server_nonce.len();
    let mut buf = Vec::with_capacity(4 + length);
    buf.put_u32_le(length as u32);
    buf.put_slice(password.as_bytes());
    buf.put_slice(server_nonce);
    buf
}

/// Concatenates two byte strings for signing.
pub(crate) fn concat(first: &[u8], second: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(first.len() + second.len());
    data.extend_from_slice(first);
    data.extend_from_slice(second);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_plaintext_layout() {
        let plaintext = password_plaintext("pw", &[0xAA, 0xBB, 0xCC]);
        assert_eq!(&plaintext[..4], &5u32.to_le_bytes());
        assert_eq!(&plaintext[4..6], b"pw");
        assert_eq!(&plaintext[6..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_nonce_length() {
        assert_eq!(create_nonce(SESSION_NONCE_LENGTH).len(), 32);
        assert!(create_nonce(0).is_empty());
    }

    #[test]
    fn test_signature_hash_selection() {
        assert_eq!(SignatureHash::Sha256.signature_uri(), RSA_SHA256_URI);
        assert_eq!(SignatureHash::Sha1.signature_uri(), RSA_SHA1_URI);
        assert_eq!(
            SignatureHash::Sha256.default_policy_id(),
            "certificate_basic256sha256"
        );
        assert_eq!(SignatureHash::Sha1.default_policy_id(), "certificate_basic256");
    }

    #[test]
    fn test_no_security_factory() {
        let factory = NoSecurityFactory;
        let policy = factory.create("", None).unwrap();
        assert!(policy.is_none());
        assert!(policy.verify(b"data", b"").unwrap());
        assert!(factory
            .create(SecurityPolicyKind::Basic256Sha256.uri(), None)
            .is_err());
    }
}
