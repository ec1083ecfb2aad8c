// SPDX-License-Identifier: GPL-3.0-only

//! Operator configuration
//!
//! Loaded once from an optional TOML file, overridden by command-line flags,
//! validated, then treated as immutable for the life of the relay.

use crate::accelerator::BackendKind;
use crate::backends::gstreamer::{Codec, EncoderKind};
use crate::constants::{BitratePreset, limits, pipeline, telemetry, timing};
use crate::errors::ConfigError;
use crate::frame::FrameGeometry;
use crate::telemetry::TelemetryFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const APP_DIR: &str = "luma-relay";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Worker threads, each with its own accelerator context
    pub workers: usize,
    pub width: u32,
    pub height: u32,
    /// Capture and stream frame rate
    pub fps: u32,
    pub codec: Codec,
    pub encoder: EncoderKind,
    /// Explicit encoder bitrate; derived from `bitrate_preset` when unset
    pub bitrate_kbps: Option<u32>,
    pub bitrate_preset: BitratePreset,
    /// V4L2 capture device
    pub device: String,
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub poll_timeout_ms: u64,
    pub telemetry_interval_secs: u64,
    pub backlog_threshold: usize,
    pub telemetry_format: TelemetryFormat,
    /// Carry capture timestamps onto output buffers instead of letting the
    /// appsrc stamp them on arrival
    pub preserve_timestamps: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            width: 1920,
            height: 1080,
            fps: 60,
            codec: Codec::default(),
            encoder: EncoderKind::default(),
            bitrate_kbps: None,
            bitrate_preset: BitratePreset::default(),
            device: pipeline::DEFAULT_DEVICE.to_string(),
            host: pipeline::DEFAULT_HOST.to_string(),
            port: pipeline::DEFAULT_PORT,
            backend: BackendKind::default(),
            poll_timeout_ms: timing::POLL_TIMEOUT.as_millis() as u64,
            telemetry_interval_secs: timing::TELEMETRY_INTERVAL.as_secs(),
            backlog_threshold: telemetry::BACKLOG_THRESHOLD,
            telemetry_format: TelemetryFormat::default(),
            preserve_timestamps: false,
        }
    }
}

impl RelayConfig {
    /// `$XDG_CONFIG_HOME/luma-relay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Parse a TOML file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load `explicit` if given, else the default path if it exists, else
    /// built-in defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(limits::MIN_WORKERS..=limits::MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::invalid(
                "workers",
                format!(
                    "{} is outside {}..={}",
                    self.workers,
                    limits::MIN_WORKERS,
                    limits::MAX_WORKERS
                ),
            ));
        }
        self.geometry()
            .validate()
            .map_err(|e| ConfigError::invalid("width/height", e.to_string()))?;
        if self.fps == 0 || self.fps > limits::MAX_FPS {
            return Err(ConfigError::invalid(
                "fps",
                format!("{} is outside 1..={}", self.fps, limits::MAX_FPS),
            ));
        }
        if self.bitrate_kbps == Some(0) {
            return Err(ConfigError::invalid("bitrate_kbps", "must be positive"));
        }
        if self.device.trim().is_empty() {
            return Err(ConfigError::invalid("device", "must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "must not be 0"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::invalid("poll_timeout_ms", "must be positive"));
        }
        if self.telemetry_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "telemetry_interval_secs",
                "must be positive",
            ));
        }
        Ok(())
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width, self.height)
    }

    /// Explicit bitrate, or the preset's value for the capture width
    pub fn effective_bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
            .unwrap_or_else(|| self.bitrate_preset.bitrate_kbps(self.width))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_bitrate_kbps(), 20_000);
        assert_eq!(config.poll_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RelayConfig::from_toml("workers = 4\ncodec = \"h265\"\n").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.codec, Codec::H265);
        assert_eq!(config.width, 1920);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            RelayConfig::from_toml("wrokers = 4"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_odd_height() {
        let config = RelayConfig {
            height: 1081,
            ..RelayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "width/height", .. })
        ));
    }
}
