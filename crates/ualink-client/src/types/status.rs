// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA status codes.
//!
//! A status code is a 32-bit value. The two most significant bits select
//! the category (`00` good, `01` uncertain, `10`/`11` bad), the next 14 bits
//! the specific code, and the low 16 bits carry info flags that never affect
//! the category or the name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StatusCodeError, UaResult};

// =============================================================================
// StatusCategory
// =============================================================================

/// Severity category of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// The operation succeeded.
    Good,
    /// The operation succeeded with reduced confidence.
    Uncertain,
    /// The operation failed.
    Bad,
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "Good"),
            Self::Uncertain => write!(f, "Uncertain"),
            Self::Bad => write!(f, "Bad"),
        }
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// A numeric OPC UA status code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u32);

macro_rules! status_codes {
    ($($name:ident = $value:literal, $text:literal;)*) => {
        impl StatusCode {
            $(
                #[doc = concat!("`", $text, "`")]
                pub const $name: StatusCode = StatusCode($value);
            )*

            /// Returns the symbolic name of this code, ignoring info bits.
            pub fn name(&self) -> &'static str {
                match self.0 & 0xFFFF_0000 {
                    $($value => $text,)*
                    _ => match self.category() {
                        StatusCategory::Good => "Good",
                        StatusCategory::Uncertain => "Uncertain",
                        StatusCategory::Bad => "Bad",
                    },
                }
            }
        }
    };
}

status_codes! {
    GOOD = 0x0000_0000, "Good";
    GOOD_SUBSCRIPTION_TRANSFERRED = 0x002D_0000, "GoodSubscriptionTransferred";
    GOOD_COMPLETES_ASYNCHRONOUSLY = 0x002E_0000, "GoodCompletesAsynchronously";
    UNCERTAIN = 0x4000_0000, "Uncertain";
    UNCERTAIN_INITIAL_VALUE = 0x4092_0000, "UncertainInitialValue";
    BAD = 0x8000_0000, "Bad";
    BAD_UNEXPECTED_ERROR = 0x8001_0000, "BadUnexpectedError";
    BAD_INTERNAL_ERROR = 0x8002_0000, "BadInternalError";
    BAD_OUT_OF_MEMORY = 0x8003_0000, "BadOutOfMemory";
    BAD_RESOURCE_UNAVAILABLE = 0x8004_0000, "BadResourceUnavailable";
    BAD_COMMUNICATION_ERROR = 0x8005_0000, "BadCommunicationError";
    BAD_ENCODING_ERROR = 0x8006_0000, "BadEncodingError";
    BAD_DECODING_ERROR = 0x8007_0000, "BadDecodingError";
    BAD_ENCODING_LIMITS_EXCEEDED = 0x8008_0000, "BadEncodingLimitsExceeded";
    BAD_UNKNOWN_RESPONSE = 0x8009_0000, "BadUnknownResponse";
    BAD_TIMEOUT = 0x800A_0000, "BadTimeout";
    BAD_SERVICE_UNSUPPORTED = 0x800B_0000, "BadServiceUnsupported";
    BAD_SHUTDOWN = 0x800C_0000, "BadShutdown";
    BAD_SERVER_NOT_CONNECTED = 0x800D_0000, "BadServerNotConnected";
    BAD_SERVER_HALTED = 0x800E_0000, "BadServerHalted";
    BAD_NOTHING_TO_DO = 0x800F_0000, "BadNothingToDo";
    BAD_TOO_MANY_OPERATIONS = 0x8010_0000, "BadTooManyOperations";
    BAD_DATA_TYPE_ID_UNKNOWN = 0x8011_0000, "BadDataTypeIdUnknown";
    BAD_CERTIFICATE_INVALID = 0x8012_0000, "BadCertificateInvalid";
    BAD_SECURITY_CHECKS_FAILED = 0x8013_0000, "BadSecurityChecksFailed";
    BAD_CERTIFICATE_UNTRUSTED = 0x801A_0000, "BadCertificateUntrusted";
    BAD_USER_ACCESS_DENIED = 0x801F_0000, "BadUserAccessDenied";
    BAD_IDENTITY_TOKEN_INVALID = 0x8020_0000, "BadIdentityTokenInvalid";
    BAD_IDENTITY_TOKEN_REJECTED = 0x8021_0000, "BadIdentityTokenRejected";
    BAD_SECURE_CHANNEL_ID_INVALID = 0x8022_0000, "BadSecureChannelIdInvalid";
    BAD_INVALID_TIMESTAMP = 0x8023_0000, "BadInvalidTimestamp";
    BAD_NONCE_INVALID = 0x8024_0000, "BadNonceInvalid";
    BAD_SESSION_ID_INVALID = 0x8025_0000, "BadSessionIdInvalid";
    BAD_SESSION_CLOSED = 0x8026_0000, "BadSessionClosed";
    BAD_SESSION_NOT_ACTIVATED = 0x8027_0000, "BadSessionNotActivated";
    BAD_SUBSCRIPTION_ID_INVALID = 0x8028_0000, "BadSubscriptionIdInvalid";
    BAD_REQUEST_HEADER_INVALID = 0x802A_0000, "BadRequestHeaderInvalid";
    BAD_TIMESTAMPS_TO_RETURN_INVALID = 0x802B_0000, "BadTimestampsToReturnInvalid";
    BAD_REQUEST_CANCELLED_BY_CLIENT = 0x802C_0000, "BadRequestCancelledByClient";
    BAD_NODE_ID_INVALID = 0x8033_0000, "BadNodeIdInvalid";
    BAD_NODE_ID_UNKNOWN = 0x8034_0000, "BadNodeIdUnknown";
    BAD_ATTRIBUTE_ID_INVALID = 0x8035_0000, "BadAttributeIdInvalid";
    BAD_INDEX_RANGE_INVALID = 0x8036_0000, "BadIndexRangeInvalid";
    BAD_NOT_READABLE = 0x803A_0000, "BadNotReadable";
    BAD_NOT_WRITABLE = 0x803B_0000, "BadNotWritable";
    BAD_OUT_OF_RANGE = 0x803C_0000, "BadOutOfRange";
    BAD_NOT_SUPPORTED = 0x803D_0000, "BadNotSupported";
    BAD_NOT_FOUND = 0x803E_0000, "BadNotFound";
    BAD_MONITORING_MODE_INVALID = 0x8041_0000, "BadMonitoringModeInvalid";
    BAD_MONITORED_ITEM_ID_INVALID = 0x8042_0000, "BadMonitoredItemIdInvalid";
    BAD_MONITORED_ITEM_FILTER_INVALID = 0x8043_0000, "BadMonitoredItemFilterInvalid";
    BAD_MONITORED_ITEM_FILTER_UNSUPPORTED = 0x8044_0000, "BadMonitoredItemFilterUnsupported";
    BAD_FILTER_NOT_ALLOWED = 0x8045_0000, "BadFilterNotAllowed";
    BAD_TYPE_MISMATCH = 0x8074_0000, "BadTypeMismatch";
    BAD_TOO_MANY_PUBLISH_REQUESTS = 0x8078_0000, "BadTooManyPublishRequests";
    BAD_NO_SUBSCRIPTION = 0x8079_0000, "BadNoSubscription";
    BAD_SEQUENCE_NUMBER_UNKNOWN = 0x807A_0000, "BadSequenceNumberUnknown";
    BAD_MESSAGE_NOT_AVAILABLE = 0x807B_0000, "BadMessageNotAvailable";
    BAD_TCP_MESSAGE_TYPE_INVALID = 0x807E_0000, "BadTcpMessageTypeInvalid";
    BAD_TCP_SECURE_CHANNEL_UNKNOWN = 0x807F_0000, "BadTcpSecureChannelUnknown";
    BAD_TCP_MESSAGE_TOO_LARGE = 0x8080_0000, "BadTcpMessageTooLarge";
    BAD_TCP_NOT_ENOUGH_RESOURCES = 0x8081_0000, "BadTcpNotEnoughResources";
    BAD_TCP_INTERNAL_ERROR = 0x8082_0000, "BadTcpInternalError";
    BAD_TCP_ENDPOINT_URL_INVALID = 0x8083_0000, "BadTcpEndpointUrlInvalid";
    BAD_SECURE_CHANNEL_CLOSED = 0x8086_0000, "BadSecureChannelClosed";
    BAD_SECURE_CHANNEL_TOKEN_UNKNOWN = 0x8087_0000, "BadSecureChannelTokenUnknown";
    BAD_SEQUENCE_NUMBER_INVALID = 0x8088_0000, "BadSequenceNumberInvalid";
    BAD_CONNECTION_CLOSED = 0x80AE_0000, "BadConnectionClosed";
    BAD_REQUEST_TOO_LARGE = 0x80B8_0000, "BadRequestTooLarge";
    BAD_RESPONSE_TOO_LARGE = 0x80B9_0000, "BadResponseTooLarge";
    BAD_TOO_MANY_MONITORED_ITEMS = 0x80DB_0000, "BadTooManyMonitoredItems";
}

impl StatusCode {
    /// Creates a status code from its raw value.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns the category encoded in the two high bits.
    pub const fn category(&self) -> StatusCategory {
        if self.0 & 0x8000_0000 != 0 {
            StatusCategory::Bad
        } else if self.0 & 0x4000_0000 != 0 {
            StatusCategory::Uncertain
        } else {
            StatusCategory::Good
        }
    }

    /// Returns `true` for good codes.
    #[inline]
    pub const fn is_good(&self) -> bool {
        matches!(self.category(), StatusCategory::Good)
    }

    /// Returns `true` for uncertain codes.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        matches!(self.category(), StatusCategory::Uncertain)
    }

    /// Returns `true` for bad codes.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        matches!(self.category(), StatusCategory::Bad)
    }

    /// Returns `true` for codes that signal a failed security check.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            Self(self.0 & 0xFFFF_0000),
            Self::BAD_SECURITY_CHECKS_FAILED
                | Self::BAD_CERTIFICATE_INVALID
                | Self::BAD_CERTIFICATE_UNTRUSTED
                | Self::BAD_IDENTITY_TOKEN_INVALID
                | Self::BAD_IDENTITY_TOKEN_REJECTED
                | Self::BAD_USER_ACCESS_DENIED
                | Self::BAD_NONCE_INVALID
        )
    }

    /// Converts a bad code into an error.
    ///
    /// Good and uncertain codes pass; only the bad category fails.
    pub fn check(self) -> UaResult<()> {
        if self.is_bad() {
            Err(StatusCodeError::new(self).into())
        } else {
            Ok(())
        }
    }
}

impl From<u32> for StatusCode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl From<StatusCode> for u32 {
    fn from(status: StatusCode) -> Self {
        status.0
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusCode({}, 0x{:08X})", self.name(), self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_high_bits() {
        assert_eq!(StatusCode::GOOD.category(), StatusCategory::Good);
        assert_eq!(StatusCode::UNCERTAIN_INITIAL_VALUE.category(), StatusCategory::Uncertain);
        assert_eq!(StatusCode::BAD_TIMEOUT.category(), StatusCategory::Bad);
        assert_eq!(StatusCode::from_bits(0xC000_0000).category(), StatusCategory::Bad);
    }

    #[test]
    fn test_name_ignores_info_bits() {
        let code = StatusCode::from_bits(0x8034_0400);
        assert_eq!(code.name(), "BadNodeIdUnknown");
        assert_eq!(StatusCode::from_bits(0x8FFF_0000).name(), "Bad");
    }

    #[test]
    fn test_check() {
        assert!(StatusCode::GOOD.check().is_ok());
        assert!(StatusCode::UNCERTAIN.check().is_ok());
        let err = StatusCode::BAD_NO_SUBSCRIPTION.check().unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::BAD_NO_SUBSCRIPTION));
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusCode::BAD_TIMEOUT.to_string(), "BadTimeout (0x800A0000)");
    }

    #[test]
    fn test_security_failure() {
        assert!(StatusCode::BAD_SECURITY_CHECKS_FAILED.is_security_failure());
        assert!(!StatusCode::BAD_TIMEOUT.is_security_failure());
    }
}
