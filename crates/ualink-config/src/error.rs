// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Errors raised while loading configuration and installing logging.

use std::path::PathBuf;
use thiserror::Error;

use ualink_client::UaError;

/// Why a configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file content is not valid for its format.
    #[error("{}: cannot parse: {message}", path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A section parsed but holds an unusable value.
    #[error("invalid value for '{field}': {message}")]
    Validation {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The client section was rejected by the client crate.
    #[error("client section rejected: {0}")]
    Client(#[source] UaError),

    /// Reading the file failed.
    #[error("{}: cannot read: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file does not exist.
    #[error("{}: no such file", path.display())]
    FileNotFound {
        /// Missing file.
        path: PathBuf,
    },

    /// An override variable holds a value that does not parse.
    #[error("environment variable {name}: {message}")]
    InvalidEnvVar {
        /// Full variable name, prefix included.
        name: String,
        /// Accepted values.
        message: String,
    },

    /// The file extension names no known format.
    #[error("unsupported config format '{format}'")]
    UnsupportedFormat {
        /// The extension found.
        format: String,
    },

    /// In-memory content could not be deserialized.
    #[error("cannot deserialize config: {message}")]
    Serialization {
        /// Deserializer message.
        message: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("cannot initialize logging: {message}")]
    Logging {
        /// Cause.
        message: String,
    },
}

impl ConfigError {
    /// Parse failure in `path`.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Unusable value at `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Read failure on `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Missing file.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Bad override variable.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Unknown extension.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Deserialization failure.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Subscriber install failure.
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Returns `true` for file system failures.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::FileNotFound { .. })
    }

    /// Short machine-readable kind, used as a log field.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Validation { .. } => "validation",
            Self::Client(_) => "client",
            Self::Io { .. } => "io",
            Self::FileNotFound { .. } => "file_not_found",
            Self::InvalidEnvVar { .. } => "invalid_env_var",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Serialization { .. } => "serialization",
            Self::Logging { .. } => "logging",
        }
    }
}

impl From<UaError> for ConfigError {
    fn from(err: UaError) -> Self {
        Self::Client(err)
    }
}

/// Result alias for this crate.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::validation("logging.level", "unknown level");
        assert_eq!(
            err.to_string(),
            "invalid value for 'logging.level': unknown level"
        );

        let err = ConfigError::file_not_found("/etc/ualink.yaml");
        assert!(err.to_string().contains("/etc/ualink.yaml"));
        assert!(err.is_io_error());
    }

    #[test]
    fn test_client_error_is_wrapped() {
        let err: ConfigError = UaError::invalid_config("endpoint_url", "must not be empty").into();
        assert_eq!(err.error_type(), "client");
        assert!(std::error::Error::source(&err).is_some());
    }
}
