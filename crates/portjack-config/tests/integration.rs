//! Integration tests for portjack-config.
//!
//! These tests go from a file on disk to a running stream on the loopback
//! server.

use std::sync::Arc;

use portjack_config::{BackendConfig, ConfigError, LoopbackConfig, find_config};
use portjack_core::{
    Backend, CallbackResult, ChannelParameters, LoopbackServer, StreamParameters,
};
use tempfile::TempDir;

/// Saving then loading yields the same configuration, parent dirs included.
#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let config = BackendConfig {
        client_name: "recorder".to_string(),
        xrun_limit: Some(3),
        loopback: LoopbackConfig {
            buffer_size: 512,
            ..LoopbackConfig::default()
        },
        ..BackendConfig::default()
    };
    config.save(&path).unwrap();

    assert!(path.is_file());
    assert_eq!(BackendConfig::load(&path).unwrap(), config);
}

/// A missing file reports the path it tried.
#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    match BackendConfig::load(&path) {
        Err(ConfigError::ReadFile { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected ReadFile, got {other:?}"),
    }
}

/// Invalid values on disk are rejected at load time.
#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "client_name = \"\"\n").unwrap();

    let err = BackendConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("client_name"), "got: {err}");
}

/// An explicit path wins; a missing explicit path is an error, not a fallback.
#[test]
fn test_explicit_path_resolution() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("portjack.toml");
    std::fs::write(&path, "auto_connect = false\n").unwrap();

    assert_eq!(find_config(Some(&path)), Some(path.clone()));
    assert!(!BackendConfig::load_or_default(Some(&path)).unwrap().auto_connect);

    let missing = dir.path().join("missing.toml");
    assert!(matches!(
        BackendConfig::load_or_default(Some(&missing)),
        Err(ConfigError::ReadFile { .. })
    ));
}

/// A loaded file drives the backend: client name, loopback shape and
/// auto-connection all take effect.
#[test]
fn test_config_drives_backend() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
client_name = "drone"
auto_connect = false

[loopback]
buffer_size = 32
physical_outputs = 4
"#,
    )
    .unwrap();

    let config = BackendConfig::load(&path).unwrap();
    let server = LoopbackServer::new(config.loopback_settings());
    let registry = Arc::new(config.registry().unwrap());
    let backend =
        Backend::initialize(Arc::clone(&registry), &server, config.backend_options()).unwrap();

    assert_eq!(registry.client_name().unwrap(), "drone");
    assert_eq!(backend.buffer_size(), 32);
    assert_eq!(
        server
            .port_names()
            .iter()
            .filter(|name| name.starts_with("system:playback_"))
            .count(),
        4
    );

    let params = StreamParameters::new().with_output(ChannelParameters::interleaved(2));
    let stream = backend
        .open_stream(&params, Box::new(|_| CallbackResult::Continue))
        .unwrap();
    for port in stream.ports().iter() {
        assert!(stream.connections(port).is_empty());
    }
}
