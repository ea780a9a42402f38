// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file; the extension selects YAML, TOML or JSON
//! 2. Resolve `${VAR}` and `${VAR:default}` placeholders
//! 3. Parse into [`UalinkConfig`]
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! UALINK_ENDPOINT_URL=opc.tcp://plc-02:4840
//! UALINK_SECURITY_MODE=sign_and_encrypt
//! UALINK_SESSION_TIMEOUT_MS=600000
//! UALINK_CHANNEL_LIFETIME_MS=300000
//! UALINK_LOG_LEVEL=debug
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::UalinkConfig;

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "UALINK";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader.
///
/// # Examples
///
/// ```no_run
/// use ualink_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("ualink.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve placeholders and apply overrides.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `UALINK` prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Returns the environment variable prefix.
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Loads configuration from a file.
    ///
    /// The file format is determined by the file extension:
    /// - `.yaml` or `.yml` - YAML format
    /// - `.toml` - TOML format
    /// - `.json` - JSON format
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<UalinkConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let format = ConfigFormat::from_path(path)?;

        let config = self.load_from_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;

        debug!(
            endpoint = %config.client.endpoint_url,
            security_mode = %config.client.security_mode,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<UalinkConfig> {
        let mut config: UalinkConfig = if self.resolve_env_vars {
            parse_str(&self.resolve_env_placeholders(content), format)?
        } else {
            parse_str(content, format)?
        };

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolves `${VAR_NAME}` and `${VAR_NAME:default}` placeholders.
    ///
    /// An unset variable without default keeps its placeholder.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                return result;
            };

            let body = &after[..end];
            let (name, default) = match body.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (body, None),
            };

            match (env::var(name), default) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    warn!(variable = name, "Environment variable not found");
                    result.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }

        result.push_str(rest);
        result
    }

    /// Applies `{prefix}_*` environment variable overrides.
    fn apply_env_overrides(&self, config: &mut UalinkConfig) -> ConfigResult<()> {
        if let Some(value) = self.var("ENDPOINT_URL") {
            config.client.endpoint_url = value;
        }

        if let Some(value) = self.var("SECURITY_MODE") {
            config.client.security_mode = value.parse().map_err(|_| {
                ConfigError::invalid_env_var(
                    self.var_name("SECURITY_MODE"),
                    "expected none, sign or sign_and_encrypt",
                )
            })?;
        }

        if let Some(value) = self.var("SESSION_TIMEOUT_MS") {
            config.client.session_timeout = self.parse_millis("SESSION_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = self.var("CHANNEL_LIFETIME_MS") {
            config.client.secure_channel_lifetime =
                self.parse_millis("CHANNEL_LIFETIME_MS", &value)?;
        }

        if let Some(value) = self.var("LOG_LEVEL") {
            config.logging.level = value.parse().map_err(|_| {
                ConfigError::invalid_env_var(
                    self.var_name("LOG_LEVEL"),
                    "expected trace, debug, info, warn or error",
                )
            })?;
        }

        Ok(())
    }

    fn var_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.env_prefix, suffix)
    }

    fn var(&self, suffix: &str) -> Option<String> {
        env::var(self.var_name(suffix)).ok()
    }

    fn parse_millis(&self, suffix: &str, value: &str) -> ConfigResult<Duration> {
        value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::invalid_env_var(self.var_name(suffix), "expected milliseconds"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .and_then(config::Config::try_deserialize)
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<UalinkConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<UalinkConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogFormat, LogLevel};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use ualink_client::{MessageSecurityMode, SecurityPolicyKind};

    const YAML: &str = r#"
client:
  endpoint_url: "opc.tcp://plc-01:4840"
  application_name: Line Monitor
  security_policy: basic256_sha256
  security_mode: sign_and_encrypt
  session_timeout: 10m
  secure_channel_lifetime: 5m

logging:
  level: debug
  format: json
"#;

    fn loader(prefix: &str) -> ConfigLoader {
        ConfigLoader::new().with_env_prefix(prefix)
    }

    #[test]
    fn test_load_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = loader("UALINK_TEST_YAML").load(file.path()).unwrap();
        assert_eq!(config.client.endpoint_url, "opc.tcp://plc-01:4840");
        assert_eq!(config.client.application_name, "Line Monitor");
        assert_eq!(config.client.security_policy, SecurityPolicyKind::Basic256Sha256);
        assert_eq!(config.client.security_mode, MessageSecurityMode::SignAndEncrypt);
        assert_eq!(config.client.session_timeout, Duration::from_secs(600));
        assert_eq!(config.client.secure_channel_lifetime, Duration::from_secs(300));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_toml_with_defaults() {
        let toml = r#"
[client]
endpoint_url = "opc.tcp://localhost:4840"
"#;
        let config = loader("UALINK_TEST_TOML")
            .load_from_str(toml, ConfigFormat::Toml)
            .unwrap();
        assert_eq!(config.client.session_timeout, Duration::from_millis(3_600_000));
        assert_eq!(config.client.max_inflight_publish, 2);
        assert_eq!(config.client.locale_ids, vec!["en".to_string()]);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_load_json() {
        let json = r#"{"client": {"endpoint_url": "opc.tcp://localhost:4840", "request_timeout": "750ms"}}"#;
        let config = loader("UALINK_TEST_JSON")
            .load_from_str(json, ConfigFormat::Json)
            .unwrap();
        assert_eq!(config.client.request_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.JSON")).unwrap(), ConfigFormat::Json);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let resolved = loader("UALINK_TEST_PH")
            .resolve_env_placeholders("url: ${UALINK_TEST_PH_UNSET_VAR:opc.tcp://fallback:4840}");
        assert_eq!(resolved, "url: opc.tcp://fallback:4840");
    }

    #[test]
    fn test_env_placeholder_from_environment() {
        env::set_var("UALINK_TEST_PH_HOST", "plc-07");
        let resolved = loader("UALINK_TEST_PH2")
            .resolve_env_placeholders("opc.tcp://${UALINK_TEST_PH_HOST}:4840 ${UNCLOSED");
        assert_eq!(resolved, "opc.tcp://plc-07:4840 ${UNCLOSED");
    }

    #[test]
    fn test_unset_placeholder_is_kept() {
        let resolved =
            loader("UALINK_TEST_PH3").resolve_env_placeholders("a ${UALINK_TEST_PH3_MISSING} b");
        assert_eq!(resolved, "a ${UALINK_TEST_PH3_MISSING} b");
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("UALINK_TEST_OVR_ENDPOINT_URL", "opc.tcp://override:4841");
        env::set_var("UALINK_TEST_OVR_SESSION_TIMEOUT_MS", "120000");
        env::set_var("UALINK_TEST_OVR_CHANNEL_LIFETIME_MS", "60000");
        env::set_var("UALINK_TEST_OVR_LOG_LEVEL", "warn");

        let config = loader("UALINK_TEST_OVR")
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();
        assert_eq!(config.client.endpoint_url, "opc.tcp://override:4841");
        assert_eq!(config.client.session_timeout, Duration::from_secs(120));
        assert_eq!(config.client.secure_channel_lifetime, Duration::from_secs(60));
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_env_override() {
        env::set_var("UALINK_TEST_BAD_SESSION_TIMEOUT_MS", "ten minutes");
        let err = loader("UALINK_TEST_BAD")
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "UALINK_TEST_BAD_SESSION_TIMEOUT_MS"));
    }

    #[test]
    fn test_env_vars_disabled() {
        env::set_var("UALINK_TEST_OFF_ENDPOINT_URL", "opc.tcp://ignored:1");
        let config = loader("UALINK_TEST_OFF")
            .with_env_vars(false)
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();
        assert_eq!(config.client.endpoint_url, "opc.tcp://plc-01:4840");
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let toml = "[client]\nendpoint_url = \"http://localhost\"\n";
        let err = loader("UALINK_TEST_EP")
            .load_from_str(toml, ConfigFormat::Toml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Client(_)));
    }

    #[test]
    fn test_file_not_found() {
        let result = ConfigLoader::new().load("/nonexistent/path/ualink.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = loader("UALINK_TEST_PARSE").load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
