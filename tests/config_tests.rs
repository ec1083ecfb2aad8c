// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use luma_relay::backends::gstreamer::{Codec, EncoderKind, capture_description, stream_description};
use luma_relay::telemetry::TelemetryFormat;
use luma_relay::{BackendKind, ConfigError, RelayConfig};
use std::io::Write;

#[test]
fn test_config_default() {
    // Test that default config can be created
    let config = RelayConfig::default();

    // Check sensible defaults
    assert_eq!(config.workers, 2);
    assert_eq!((config.width, config.height, config.fps), (1920, 1080, 60));
    assert_eq!(config.codec, Codec::H264);
    assert_eq!(config.backend, BackendKind::Auto);
    assert_eq!(config.telemetry_format, TelemetryFormat::Text);
    assert!(!config.preserve_timestamps, "Timestamps should be left to the appsrc by default");
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_load_from_file() {
    let dir = std::env::temp_dir().join(format!("luma-relay-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
workers = 3
width = 1280
height = 720
fps = 30
codec = "h265"
encoder = "software"
backend = "cpu"
host = "192.168.1.20"
telemetry_format = "json"
"#
    )
    .unwrap();

    let config = RelayConfig::load(&path).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    assert_eq!(config.workers, 3);
    assert_eq!(config.codec, Codec::H265);
    assert_eq!(config.encoder, EncoderKind::Software);
    assert_eq!(config.backend, BackendKind::Cpu);
    assert_eq!(config.telemetry_format, TelemetryFormat::Json);
    // Unset bitrate follows the resolution tier
    assert_eq!(config.effective_bitrate_kbps(), 8_000);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_missing_file() {
    let result = RelayConfig::load(std::path::Path::new("/nonexistent/luma-relay.toml"));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn test_config_validation_bounds() {
    let cases = [
        RelayConfig {
            workers: 0,
            ..RelayConfig::default()
        },
        RelayConfig {
            workers: 9,
            ..RelayConfig::default()
        },
        RelayConfig {
            fps: 0,
            ..RelayConfig::default()
        },
        RelayConfig {
            fps: 240,
            ..RelayConfig::default()
        },
        RelayConfig {
            width: 0,
            ..RelayConfig::default()
        },
        RelayConfig {
            bitrate_kbps: Some(0),
            ..RelayConfig::default()
        },
        RelayConfig {
            port: 0,
            ..RelayConfig::default()
        },
    ];
    for config in cases {
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid { .. })),
            "{:?} should be rejected",
            config
        );
    }
}

#[test]
fn test_descriptions_follow_config() {
    let config = RelayConfig {
        width: 3840,
        height: 2160,
        fps: 30,
        encoder: EncoderKind::Hardware,
        port: 5600,
        ..RelayConfig::default()
    };

    let capture = capture_description(&config);
    assert!(capture.contains("width=3840,height=2160,framerate=30/1"));

    let stream = stream_description(&config);
    assert!(stream.contains("width=3840,height=2160,framerate=30/1"));
    assert!(stream.contains("omxh264enc"));
    assert!(stream.contains("target-bitrate=50000"));
    assert!(stream.contains("port=5600"));
}
