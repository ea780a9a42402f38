// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node identifiers and their `ns=<n>;<kind>=<value>` text form.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigurationError, UaError};

/// Address of a node: namespace index plus identifier.
///
/// Namespace 0 holds the nodes defined by the OPC UA standard; its prefix
/// is left out of the text form.
///
/// ```
/// use ualink_client::types::NodeId;
///
/// let speed: NodeId = "ns=2;s=Line1.Speed".parse().unwrap();
/// assert_eq!(speed, NodeId::string(2, "Line1.Speed"));
/// assert_eq!(NodeId::numeric(0, 2259).to_string(), "i=2259");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Index into the server namespace array.
    pub namespace_index: u16,

    /// Identifier within the namespace.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Server_ServerStatus_State, read by the renewal loop as a liveness probe.
    pub const SERVER_STATUS_STATE: NodeId = NodeId::numeric(0, 2259);

    /// The Server object; default event source.
    pub const SERVER: NodeId = NodeId::numeric(0, 2253);

    /// The Objects folder.
    pub const OBJECTS_FOLDER: NodeId = NodeId::numeric(0, 85);

    /// BaseEventType.
    pub const BASE_EVENT_TYPE: NodeId = NodeId::numeric(0, 2041);

    /// HierarchicalReferences, the default browse reference type.
    pub const HIERARCHICAL_REFERENCES: NodeId = NodeId::numeric(0, 33);

    /// `ns=<namespace_index>;i=<value>`.
    #[inline]
    pub const fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// `ns=<namespace_index>;s=<value>`.
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self::with_identifier(namespace_index, NodeIdentifier::String(value.into()))
    }

    /// `ns=<namespace_index>;g=<value>`.
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self::with_identifier(namespace_index, NodeIdentifier::Guid(value))
    }

    /// `ns=<namespace_index>;b=<base64 value>`.
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self::with_identifier(namespace_index, NodeIdentifier::Opaque(value))
    }

    fn with_identifier(namespace_index: u16, identifier: NodeIdentifier) -> Self {
        Self {
            namespace_index,
            identifier,
        }
    }

    /// `i=0`, used for "no node" fields such as an unset authentication token.
    #[inline]
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Returns `true` for `i=0`.
    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    /// The numeric identifier, if any.
    pub fn as_numeric(&self) -> Option<u32> {
        if let NodeIdentifier::Numeric(value) = self.identifier {
            Some(value)
        } else {
            None
        }
    }

    /// The string identifier, if any.
    pub fn as_string(&self) -> Option<&str> {
        if let NodeIdentifier::String(value) = &self.identifier {
            Some(value.as_str())
        } else {
            None
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace_index {
            0 => fmt::Display::fmt(&self.identifier, f),
            ns => write!(f, "ns={ns};{}", self.identifier),
        }
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Accepts `[ns=<n>;]i=<u32>`, `s=<text>`, `g=<uuid>` and `b=<base64>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let reject = |reason: String| -> UaError { ConfigurationError::invalid_node_id(text, reason).into() };

        let (namespace_index, rest) = match text.strip_prefix("ns=") {
            None => (0, text),
            Some(qualified) => {
                let Some((ns, rest)) = qualified.split_once(';') else {
                    return Err(reject("namespace without identifier".to_string()));
                };
                let ns = ns
                    .parse::<u16>()
                    .map_err(|e| reject(format!("namespace index: {e}")))?;
                (ns, rest)
            }
        };

        let Some((kind, value)) = rest.split_once('=') else {
            return Err(reject("missing identifier kind".to_string()));
        };
        let identifier = match kind {
            "i" => NodeIdentifier::Numeric(
                value
                    .parse()
                    .map_err(|e| reject(format!("numeric identifier: {e}")))?,
            ),
            "s" => NodeIdentifier::String(value.to_string()),
            "g" => NodeIdentifier::Guid(
                Uuid::parse_str(value).map_err(|e| reject(format!("guid identifier: {e}")))?,
            ),
            "b" => NodeIdentifier::Opaque(
                BASE64
                    .decode(value)
                    .map_err(|e| reject(format!("opaque identifier: {e}")))?,
            ),
            other => return Err(reject(format!("unknown identifier kind '{other}'"))),
        };

        Ok(Self::with_identifier(namespace_index, identifier))
    }
}

/// Identifier kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// `i=`
    Numeric(u32),
    /// `s=`
    String(String),
    /// `g=`
    Guid(Uuid),
    /// `b=`, base64 in text form.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "i={value}"),
            Self::String(value) => write!(f, "s={value}"),
            Self::Guid(value) => write!(f, "g={value}"),
            Self::Opaque(value) => write!(f, "b={}", BASE64.encode(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        assert_eq!("i=2259".parse::<NodeId>().unwrap(), NodeId::SERVER_STATUS_STATE);
        assert_eq!(
            "ns=2;s=Line1.Speed".parse::<NodeId>().unwrap(),
            NodeId::string(2, "Line1.Speed")
        );
        assert_eq!(
            "ns=3;b=SGVsbG8=".parse::<NodeId>().unwrap(),
            NodeId::opaque(3, b"Hello".to_vec())
        );
        // String identifiers may contain '='.
        assert_eq!(
            "ns=2;s=a=b".parse::<NodeId>().unwrap(),
            NodeId::string(2, "a=b")
        );
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=1".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
        assert!("2253".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_display_omits_namespace_zero() {
        assert_eq!(NodeId::SERVER.to_string(), "i=2253");
        assert_eq!(NodeId::numeric(4, 7).to_string(), "ns=4;i=7");
    }

    #[test]
    fn test_null() {
        assert!(NodeId::default().is_null());
        assert!(!NodeId::numeric(1, 0).is_null());
        assert_eq!(NodeId::numeric(1, 5).as_numeric(), Some(5));
        assert_eq!(NodeId::string(1, "x").as_numeric(), None);
    }
}
