// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol value types shared by every layer of the client.
//!
//! - **NodeId**: node identifiers with string parsing
//! - **StatusCode**: numeric status codes with good/uncertain/bad categories
//! - **Variant / DataValue**: dynamically typed values
//! - **Enumerations**: security mode and policy, attribute ids, monitoring
//!   mode, timestamps, data change trigger, user token type

mod node_id;
mod status;
mod variant;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, UaError};

pub use node_id::{NodeId, NodeIdentifier};
pub use status::{StatusCategory, StatusCode};
pub use variant::{DataValue, ExtensionObject, LocalizedText, QualifiedName, Variant};

// =============================================================================
// MessageSecurityMode
// =============================================================================

/// Message security mode of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageSecurityMode {
    /// Messages are neither signed nor encrypted.
    #[default]
    None,

    /// Messages are signed but not encrypted.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl MessageSecurityMode {
    /// Returns the wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Returns `true` if this mode signs messages.
    #[inline]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Sign | Self::SignAndEncrypt)
    }

    /// Returns `true` if this mode encrypts messages.
    #[inline]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::SignAndEncrypt)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for MessageSecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MessageSecurityMode {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" | "nosecurity" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" | "encrypted" => Ok(Self::SignAndEncrypt),
            _ => Err(ConfigurationError::invalid_value("security_mode", s).into()),
        }
    }
}

// =============================================================================
// SecurityPolicyKind
// =============================================================================

/// The standard security policies, identified by URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicyKind {
    /// No security.
    #[default]
    None,
    /// Basic128Rsa15 (deprecated).
    Basic128Rsa15,
    /// Basic256 (deprecated).
    Basic256,
    /// Basic256Sha256.
    Basic256Sha256,
    /// Aes128_Sha256_RsaOaep.
    Aes128Sha256RsaOaep,
    /// Aes256_Sha256_RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicyKind {
    /// URI of the None policy.
    pub const NONE_URI: &'static str = "http://opcfoundation.org/UA/SecurityPolicy#None";

    /// Returns the policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => Self::NONE_URI,
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }

    /// Creates from URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::None,
            Self::Basic128Rsa15,
            Self::Basic256,
            Self::Basic256Sha256,
            Self::Aes128Sha256RsaOaep,
            Self::Aes256Sha256RsaPss,
        ]
        .into_iter()
        .find(|policy| policy.uri() == uri)
    }

    /// Returns `true` if the URI means "no security".
    ///
    /// An empty URI counts as None.
    pub fn is_none_uri(uri: &str) -> bool {
        uri.is_empty() || uri == Self::NONE_URI
    }
}

impl fmt::Display for SecurityPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicyKind {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(policy) = Self::from_uri(s) {
            return Ok(policy);
        }

        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic128rsa15" => Ok(Self::Basic128Rsa15),
            "basic256" => Ok(Self::Basic256),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(ConfigurationError::invalid_value("security_policy", s).into()),
        }
    }
}

// =============================================================================
// UserTokenType
// =============================================================================

/// Kind of user identity token a server policy accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTokenType {
    /// Anonymous.
    Anonymous,
    /// Username and password.
    UserName,
    /// X.509 certificate.
    Certificate,
    /// Externally issued token.
    IssuedToken,
}

impl fmt::Display for UserTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName => write!(f, "UserName"),
            Self::Certificate => write!(f, "Certificate"),
            Self::IssuedToken => write!(f, "IssuedToken"),
        }
    }
}

// =============================================================================
// AttributeId
// =============================================================================

/// Node attribute ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    /// NodeId attribute.
    NodeId,
    /// NodeClass attribute.
    NodeClass,
    /// BrowseName attribute.
    BrowseName,
    /// DisplayName attribute.
    DisplayName,
    /// Description attribute.
    Description,
    /// EventNotifier attribute.
    EventNotifier,
    /// Value attribute.
    #[default]
    Value,
    /// DataType attribute.
    DataType,
    /// AccessLevel attribute.
    AccessLevel,
}

impl AttributeId {
    /// Returns the wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::NodeId => 1,
            Self::NodeClass => 2,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::Description => 5,
            Self::EventNotifier => 12,
            Self::Value => 13,
            Self::DataType => 14,
            Self::AccessLevel => 17,
        }
    }

    /// Returns the attribute name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NodeId => "NodeId",
            Self::NodeClass => "NodeClass",
            Self::BrowseName => "BrowseName",
            Self::DisplayName => "DisplayName",
            Self::Description => "Description",
            Self::EventNotifier => "EventNotifier",
            Self::Value => "Value",
            Self::DataType => "DataType",
            Self::AccessLevel => "AccessLevel",
        }
    }
}

// =============================================================================
// MonitoringMode / TimestampsToReturn
// =============================================================================

/// Monitoring mode of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Monitoring disabled.
    Disabled,

    /// Sampling enabled, reporting disabled.
    Sampling,

    /// Sampling and reporting enabled.
    #[default]
    Reporting,
}

impl MonitoringMode {
    /// Returns the wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Sampling => 1,
            Self::Reporting => 2,
        }
    }
}

/// Which timestamps the server returns with values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampsToReturn {
    /// Source timestamp only.
    Source,
    /// Server timestamp only.
    Server,
    /// Both timestamps.
    #[default]
    Both,
    /// No timestamps.
    Neither,
}

// =============================================================================
// DataChangeTrigger / DeadbandType
// =============================================================================

/// Condition that makes a data change reportable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataChangeTrigger {
    /// Report on status change only.
    Status,
    /// Report on status or value change.
    #[default]
    StatusValue,
    /// Report on status, value, or source timestamp change.
    StatusValueTimestamp,
}

impl DataChangeTrigger {
    /// Creates from the wire value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Status),
            1 => Some(Self::StatusValue),
            2 => Some(Self::StatusValueTimestamp),
            _ => None,
        }
    }
}

/// Deadband kind of a data change filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadbandType {
    /// No deadband.
    #[default]
    None,
    /// Absolute deadband.
    Absolute,
    /// Percent of the EU range.
    Percent,
}

// =============================================================================
// BrowseDirection / NodeClass
// =============================================================================

/// Direction of references to follow when browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrowseDirection {
    /// Forward references.
    #[default]
    Forward,
    /// Inverse references.
    Inverse,
    /// Both directions.
    Both,
}

/// Class of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Object.
    Object,
    /// Variable.
    Variable,
    /// Method.
    Method,
    /// ObjectType.
    ObjectType,
    /// VariableType.
    VariableType,
    /// ReferenceType.
    ReferenceType,
    /// DataType.
    DataType,
    /// View.
    View,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_policy_uri_round_trip() {
        assert_eq!(
            SecurityPolicyKind::from_uri(SecurityPolicyKind::Basic256Sha256.uri()),
            Some(SecurityPolicyKind::Basic256Sha256)
        );
        assert_eq!(
            "Basic256Sha256".parse::<SecurityPolicyKind>().unwrap(),
            SecurityPolicyKind::Basic256Sha256
        );
        assert!(SecurityPolicyKind::is_none_uri(""));
        assert!(SecurityPolicyKind::is_none_uri(SecurityPolicyKind::NONE_URI));
        assert!(!SecurityPolicyKind::is_none_uri(SecurityPolicyKind::Basic256.uri()));
    }

    #[test]
    fn test_security_mode_parse() {
        assert_eq!(
            "sign_and_encrypt".parse::<MessageSecurityMode>().unwrap(),
            MessageSecurityMode::SignAndEncrypt
        );
        assert_eq!(MessageSecurityMode::Sign.value(), 2);
        assert!("bogus".parse::<MessageSecurityMode>().is_err());
    }
}
