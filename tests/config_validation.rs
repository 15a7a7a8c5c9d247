//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use endpoint_protocol::config::{env_name, ClientConfig, NetworkConfig, ServerConfig, TransportConfig};
use endpoint_protocol::core::serialization::SerializationFormat;
use endpoint_protocol::protocol::instance::{InstanceFlavor, InstanceType};
use serial_test::serial;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = NetworkConfig::default();
    config.server.max_connections = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_client_address_accepts_host_names() {
    let mut config = NetworkConfig::default();
    config.client.address = "seed.example.com:8768".to_string();
    assert!(config.client.validate().is_empty());

    config.client.address = "seed.example.com".to_string();
    assert!(config
        .client
        .validate()
        .iter()
        .any(|e| e.contains("Invalid client address")));
}

#[test]
fn test_zero_outgoing_concurrency() {
    let mut config = NetworkConfig::default();
    config.client.outgoing_concurrency = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Outgoing concurrency must be greater than 0")));
}

#[test]
fn test_reconnect_without_attempts() {
    let mut config = NetworkConfig::default();
    config.client.auto_reconnect = true;
    config.client.max_reconnect_attempts = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max reconnect attempts")));

    config.client.auto_reconnect = false;
    assert!(config.validate().is_empty());
}

#[test]
fn test_idle_timeout_must_exceed_heartbeat() {
    let mut config = NetworkConfig::default();
    config.transport.heartbeat_interval = Duration::from_secs(30);
    config.transport.idle_timeout = Duration::from_secs(30);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Idle timeout must be longer")));
}

#[test]
fn test_zero_backpressure_limit() {
    let mut config = NetworkConfig::default();
    config.transport.backpressure_limit = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Backpressure limit must be greater than 0")));
}

#[test]
fn test_payload_size_bounds() {
    let mut config = NetworkConfig::default();
    config.transport.max_payload_size = 512;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max payload size too small")));

    config.transport.max_payload_size = 0;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max payload size cannot be 0")));
}

#[test]
fn test_short_traffic_interval() {
    let mut config = NetworkConfig::default();
    config.transport.traffic_interval = Duration::from_millis(10);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Traffic interval too short")));

    config.transport.traffic_interval = Duration::ZERO;
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_flavor_for_instance() {
    let mut config = NetworkConfig::default();
    config.instance.instance = InstanceType::Server;
    config.instance.flavor = InstanceFlavor::Lifegem;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("not valid for instance")));
}

#[test]
fn test_malformed_level_directive() {
    let mut config = NetworkConfig::default();
    config.logging.levels = vec!["tokio=warn".into(), "nonsense".into(), "=info".into()];

    let errors = config.validate();
    let bad: Vec<_> = errors
        .iter()
        .filter(|e| e.contains("Invalid level directive"))
        .collect();
    assert_eq!(bad.len(), 2);
}

#[test]
fn test_file_logging_requires_path() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_output() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_multiple_errors_reported() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();
    config.server.max_connections = 0;
    config.transport.backpressure_limit = 0;

    let errors = config.validate();
    assert!(errors.len() >= 3, "got {errors:?}");
}

#[test]
fn test_validate_strict() {
    assert!(NetworkConfig::default().validate_strict().is_ok());

    let mut config = NetworkConfig::default();
    config.server.max_connections = 0;
    let err = config.validate_strict().unwrap_err();
    assert!(err.to_string().contains("Configuration validation failed"));
}

#[test]
fn test_toml_sections_default_when_missing() {
    let config = NetworkConfig::from_toml(
        r#"
        [instance]
        instance = "client"
        flavor = "soapstone"

        [transport]
        format = "json"
        max_payload_size = 65536
        message_timeout = 250
        heartbeat_interval = 1000
        idle_timeout = 5000
        backpressure_limit = 8
        traffic_interval = 0
        log_traffic_raw = false
        log_traffic_decoded = true
        "#,
    )
    .expect("parse");

    assert_eq!(config.instance.instance, InstanceType::Client);
    assert_eq!(config.instance.flavor, InstanceFlavor::Soapstone);
    assert_eq!(config.transport.format, SerializationFormat::Json);
    assert_eq!(config.transport.message_timeout, Duration::from_millis(250));
    assert!(config.transport.log_traffic_decoded);
    assert_eq!(config.server.max_connections, 1000);
    assert!(config.validate().is_empty());
}

#[test]
fn test_toml_partial_sections_keep_defaults() {
    let config = NetworkConfig::from_toml(
        r#"
        [server]
        address = "0.0.0.0:9000"

        [transport]
        format = "json"

        [client]
        auto_reconnect = false
        "#,
    )
    .expect("parse");

    assert_eq!(config.server.address, "0.0.0.0:9000");
    assert_eq!(config.server.max_connections, 1000);
    assert_eq!(
        config.server.handshake_timeout,
        ServerConfig::default().handshake_timeout
    );
    assert_eq!(config.transport.format, SerializationFormat::Json);
    assert_eq!(
        config.transport.message_timeout,
        TransportConfig::default().message_timeout
    );
    assert!(!config.client.auto_reconnect);
    assert_eq!(config.client.address, ClientConfig::default().address);
    assert!(config.validate().is_empty());
}

#[test]
fn test_server_handshake_timeout_minimum() {
    let mut config = NetworkConfig::default();
    config.server.handshake_timeout = Duration::from_millis(50);

    let errors = config.validate();
    assert!(
        errors.iter().any(|e| e.contains("Handshake timeout too short")),
        "got {errors:?}"
    );
}

#[test]
fn test_toml_rejects_unknown_instance() {
    let result = NetworkConfig::from_toml(
        r#"
        [instance]
        instance = "router"
        flavor = "vanilla"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_example_config_round_trips() {
    let text = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&text).expect("example config parses");
    assert_eq!(parsed.server.address, NetworkConfig::default().server.address);
    assert_eq!(parsed.logging.log_level, Level::INFO);
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("endpoint.toml");

    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "0.0.0.0:9100".into();
        c.resolver.default_port = 9100;
    });
    config.save_to_file(&path).expect("save");

    let loaded = NetworkConfig::from_file(&path).expect("load");
    assert_eq!(loaded.server.address, "0.0.0.0:9100");
    assert_eq!(loaded.resolver.default_port, 9100);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = NetworkConfig::from_file("/nonexistent/endpoint.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}

#[test]
#[serial]
fn test_env_overrides() {
    let vars = [
        ("server.address", "0.0.0.0:7000"),
        ("server.max_connections", "12"),
        ("client.outgoing_concurrency", "2"),
        ("net.format", "msgpack"),
        ("net.message_timeout", "300"),
        ("net.logging.decoded", "true"),
        ("log.level", "debug"),
        ("log.levels", "tokio=error, endpoint_protocol=trace"),
    ];
    for (key, value) in vars {
        std::env::set_var(env_name(key), value);
    }

    let config = NetworkConfig::from_env().expect("env config");

    for (key, _) in vars {
        std::env::remove_var(env_name(key));
    }

    assert_eq!(config.server.address, "0.0.0.0:7000");
    assert_eq!(config.server.max_connections, 12);
    assert_eq!(config.client.outgoing_concurrency, 2);
    assert_eq!(config.transport.format, SerializationFormat::MessagePack);
    assert_eq!(config.transport.message_timeout, Duration::from_millis(300));
    assert!(config.transport.log_traffic_decoded);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(
        config.logging.levels,
        vec!["tokio=error".to_string(), "endpoint_protocol=trace".to_string()]
    );
}

#[test]
#[serial]
fn test_invalid_env_values_ignored() {
    std::env::set_var(env_name("server.max_connections"), "0");
    std::env::set_var(env_name("net.message_timeout"), "soon");

    let config = NetworkConfig::from_env().expect("env config");

    std::env::remove_var(env_name("server.max_connections"));
    std::env::remove_var(env_name("net.message_timeout"));

    let defaults = NetworkConfig::default();
    assert_eq!(config.server.max_connections, defaults.server.max_connections);
    assert_eq!(config.transport.message_timeout, defaults.transport.message_timeout);
}
