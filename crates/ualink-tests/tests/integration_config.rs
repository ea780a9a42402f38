// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration files feeding a working client.

use std::env;
use std::time::Duration;

use ualink_client::messages::ServiceRequest;
use ualink_client::testing::{MockServer, MOCK_ENDPOINT};
use ualink_client::ConnectionState;
use ualink_config::{ConfigError, ConfigFormat, ConfigLoader, LogFormat, LogLevel, build_filter};
use ualink_tests::common::*;

fn isolated_loader(prefix: &str) -> ConfigLoader {
    ConfigLoader::new().with_env_prefix(prefix)
}

#[test]
fn test_every_format_loads_the_same_config() {
    let files = ConfigFileBuilder::new();
    let loader = isolated_loader("UALINK_IT_FORMATS");

    for (content, format) in [
        (ConfigFixtures::yaml(), ConfigFormat::Yaml),
        (ConfigFixtures::toml(), ConfigFormat::Toml),
        (ConfigFixtures::json(), ConfigFormat::Json),
    ] {
        let path = files.write(content, format);
        let config = loader.load(&path).unwrap();

        assert_eq!(config.client.endpoint_url, MOCK_ENDPOINT, "{format:?}");
        assert_eq!(config.client.application_name, "Packaging Line");
        assert_eq!(config.client.session_timeout, Duration::from_secs(20 * 60));
        assert_eq!(config.client.secure_channel_lifetime, Duration::from_secs(10 * 60));
        assert_eq!(config.client.max_inflight_publish, 3);
        assert_eq!(config.client.locale_ids, vec!["en".to_string(), "de".to_string()]);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }
}

#[test]
fn test_yml_extension_is_yaml() {
    let files = ConfigFileBuilder::new();
    let path = files.write_named("plant.yml", ConfigFixtures::yaml());
    let config = isolated_loader("UALINK_IT_YML").load(&path).unwrap();
    assert_eq!(config.client.application_name, "Packaging Line");
}

#[test]
fn test_missing_file_is_reported() {
    let files = ConfigFileBuilder::new();
    let path = files.write_named("present.yaml", ConfigFixtures::yaml());
    let missing = path.with_file_name("absent.yaml");

    let err = isolated_loader("UALINK_IT_MISSING").load(&missing).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn test_unknown_extension_is_rejected() {
    let files = ConfigFileBuilder::new();
    let path = files.write_named("plant.ini", "endpoint_url = x");

    let err = isolated_loader("UALINK_IT_INI").load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
}

#[test]
fn test_broken_file_names_its_path() {
    let files = ConfigFileBuilder::new();
    let path = files.write("client: [unterminated", ConfigFormat::Yaml);

    let err = isolated_loader("UALINK_IT_BROKEN").load(&path).unwrap_err();
    match err {
        ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("expected parse error, got {other}"),
    }
}

#[test]
fn test_invalid_endpoint_fails_validation() {
    let files = ConfigFileBuilder::new();
    let path = files.write(
        "client:\n  endpoint_url: \"http://not-opc:80\"\n",
        ConfigFormat::Yaml,
    );

    let err = isolated_loader("UALINK_IT_INVALID").load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Client(_)));
}

#[test]
fn test_environment_overrides_file() {
    let files = ConfigFileBuilder::new();
    let path = files.write(ConfigFixtures::toml(), ConfigFormat::Toml);

    env::set_var("UALINK_IT_ENV_ENDPOINT_URL", "opc.tcp://plc-02:4840");
    env::set_var("UALINK_IT_ENV_SESSION_TIMEOUT_MS", "90000");
    env::set_var("UALINK_IT_ENV_LOG_LEVEL", "warn");
    let result = isolated_loader("UALINK_IT_ENV").load(&path);
    env::remove_var("UALINK_IT_ENV_ENDPOINT_URL");
    env::remove_var("UALINK_IT_ENV_SESSION_TIMEOUT_MS");
    env::remove_var("UALINK_IT_ENV_LOG_LEVEL");

    let config = result.unwrap();
    assert_eq!(config.client.endpoint_url, "opc.tcp://plc-02:4840");
    assert_eq!(config.client.session_timeout, Duration::from_secs(90));
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(config.client.application_name, "Packaging Line");
}

#[test]
fn test_placeholders_resolve_from_environment() {
    let files = ConfigFileBuilder::new();
    let path = files.write(
        "client:\n  endpoint_url: \"${UALINK_IT_PH_HOST:opc.tcp://fallback:4840}\"\n  application_name: \"${UALINK_IT_PH_NAME}\"\n",
        ConfigFormat::Yaml,
    );

    env::set_var("UALINK_IT_PH_NAME", "Filler");
    let result = isolated_loader("UALINK_IT_PH").load(&path);
    env::remove_var("UALINK_IT_PH_NAME");

    let config = result.unwrap();
    assert_eq!(config.client.endpoint_url, "opc.tcp://fallback:4840");
    assert_eq!(config.client.application_name, "Filler");
}

#[test]
fn test_invalid_security_mode_override_is_rejected() {
    env::set_var("UALINK_IT_MODE_SECURITY_MODE", "sideways");
    let result = isolated_loader("UALINK_IT_MODE").load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml);
    env::remove_var("UALINK_IT_MODE_SECURITY_MODE");

    assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
}

#[test]
fn test_secured_mode_without_policy_fails_validation() {
    env::set_var("UALINK_IT_SIGN_SECURITY_MODE", "sign");
    let result = isolated_loader("UALINK_IT_SIGN").load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml);
    env::remove_var("UALINK_IT_SIGN_SECURITY_MODE");

    assert!(matches!(result, Err(ConfigError::Client(_))));
}

#[test]
fn test_logging_section_builds_filter() {
    let config = isolated_loader("UALINK_IT_LOG")
        .load_from_str(ConfigFixtures::yaml(), ConfigFormat::Yaml)
        .unwrap();
    assert!(build_filter(&config.logging).is_ok());
}

#[tokio::test]
async fn test_loaded_config_drives_a_session() {
    let files = ConfigFileBuilder::new();
    let path = files.write(ConfigFixtures::json(), ConfigFormat::Json);
    let config = isolated_loader("UALINK_IT_SESSION").load(&path).unwrap();

    let harness = TestHarness::with_config(MockServer::new(), config.client);
    harness.connect().await;
    assert_eq!(harness.client.state(), ConnectionState::SessionActive);

    let requests = harness.server.requests();
    let create = requests
        .iter()
        .find_map(|r| match r {
            ServiceRequest::CreateSession(r) => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(create.requested_session_timeout, 1_200_000.0);
    assert!(create.session_name.starts_with("Packaging Line"));

    let activate = requests
        .iter()
        .find_map(|r| match r {
            ServiceRequest::ActivateSession(r) => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(activate.locale_ids, vec!["en".to_string(), "de".to_string()]);

    harness.shutdown().await;
}
