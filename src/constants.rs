// SPDX-License-Identifier: GPL-3.0-only

//! Relay-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Encoder bitrate presets
///
/// Used to derive a default target bitrate from the capture resolution when
/// the operator does not set one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitratePreset {
    /// Low bitrate - constrained links
    Low,
    /// Medium bitrate - balanced (default)
    #[default]
    Medium,
    /// High bitrate - LAN streaming
    High,
}

impl BitratePreset {
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Target bitrate in kbps for a given capture width
    ///
    /// Live relay tiers run hotter than file recording because the encoder is
    /// configured for low-delay P frames with short IDR periodicity:
    /// - SD: Low=1.5, Medium=3, High=6 Mbps
    /// - HD (720p): Low=4, Medium=8, High=12 Mbps
    /// - Full HD: Low=8, Medium=20, High=30 Mbps
    /// - 2K: Low=15, Medium=30, High=45 Mbps
    /// - 4K: Low=30, Medium=50, High=80 Mbps
    pub fn bitrate_kbps(&self, width: u32) -> u32 {
        self.bitrate_for_tier(get_resolution_tier(width))
    }

    pub fn bitrate_for_tier(&self, tier: ResolutionTier) -> u32 {
        match (tier, self) {
            (ResolutionTier::SD, BitratePreset::Low) => 1_500,
            (ResolutionTier::SD, BitratePreset::Medium) => 3_000,
            (ResolutionTier::SD, BitratePreset::High) => 6_000,
            (ResolutionTier::HD, BitratePreset::Low) => 4_000,
            (ResolutionTier::HD, BitratePreset::Medium) => 8_000,
            (ResolutionTier::HD, BitratePreset::High) => 12_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 8_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 20_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 30_000,
            (ResolutionTier::TwoK, BitratePreset::Low) => 15_000,
            (ResolutionTier::TwoK, BitratePreset::Medium) => 30_000,
            (ResolutionTier::TwoK, BitratePreset::High) => 45_000,
            (ResolutionTier::FourK, BitratePreset::Low) => 30_000,
            (ResolutionTier::FourK, BitratePreset::Medium) => 50_000,
            (ResolutionTier::FourK, BitratePreset::High) => 80_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// SD: below 1280 wide
    SD,
    /// HD: 1280x720
    HD,
    /// Full HD: 1920x1080
    FullHD,
    /// 2K: 2560x1440
    TwoK,
    /// 4K: 3840x2160 and above
    FourK,
}

/// Get the resolution tier for a given width
pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 2560 => ResolutionTier::TwoK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format bitrate for display (e.g., "8 Mbps" or "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Frame layout constants
pub mod frame {
    /// Value written to every chroma byte of an output frame (neutral grey)
    pub const NEUTRAL_CHROMA: u8 = 128;

    /// Number of luma intensity levels the enhancement kernel works with
    pub const LUMA_LEVELS: usize = 256;
}

/// Operator-facing limits
pub mod limits {
    /// Smallest worker pool
    pub const MIN_WORKERS: usize = 1;

    /// Largest worker pool
    pub const MAX_WORKERS: usize = 8;

    /// Highest accepted capture frame rate
    pub const MAX_FPS: u32 = 120;
}

/// GStreamer pipeline constants
pub mod pipeline {
    /// Capture device used when none is configured
    pub const DEFAULT_DEVICE: &str = "/dev/video0";

    /// Default stream destination
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Default RTP destination port
    pub const DEFAULT_PORT: u16 = 5004;

    /// Leaky queue depth between camera and appsink (smoothing)
    pub const CAPTURE_QUEUE_BUFFERS: u32 = 8;

    /// Leaky queue depth between appsrc and encoder
    pub const OUTPUT_QUEUE_BUFFERS: u32 = 2;

    /// Element names used to attach probes and look elements up
    pub const CAPTURE_QUEUE_NAME: &str = "q_cam";
    pub const APPSINK_NAME: &str = "relay_sink";
    pub const APPSRC_NAME: &str = "relay_src";
    pub const OUTPUT_QUEUE_NAME: &str = "q_after_src";
    pub const ENCODER_NAME: &str = "enc";

    /// Pixel format on both sides of the relay
    pub const PIXEL_FORMAT: &str = "NV12";

    /// Frames between IDR pictures
    pub const IDR_PERIOD: u32 = 240;

    /// Kernel send buffer requested by the udpsink
    pub const UDP_BUFFER_SIZE: u32 = 60_000_000;

    /// DSCP marking on outgoing RTP packets
    pub const QOS_DSCP: u32 = 60;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Worker queue-pop timeout; bounds how long a stop request goes unseen
    pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);

    /// Telemetry tick period
    pub const TELEMETRY_INTERVAL: Duration = Duration::from_secs(2);

    /// Frame counter modulo for periodic per-frame logging
    pub const FRAME_LOG_INTERVAL: u64 = 300;

    /// Bus poll interval while the relay runs
    pub const BUS_POLL_MS: u64 = 100;

    /// Pipeline state change timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// Pipeline state change timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;
}

/// Telemetry constants
pub mod telemetry {
    /// Queue depth above which the relay is reported as backlogged
    pub const BACKLOG_THRESHOLD: usize = 5;

    /// `tracing` target used for periodic reports
    pub const TARGET: &str = "telemetry";
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_tiers() {
        assert_eq!(get_resolution_tier(3840), ResolutionTier::FourK);
        assert_eq!(get_resolution_tier(1920), ResolutionTier::FullHD);
        assert_eq!(get_resolution_tier(1280), ResolutionTier::HD);
        assert_eq!(get_resolution_tier(640), ResolutionTier::SD);
    }

    #[test]
    fn test_format_bitrate() {
        assert_eq!(format_bitrate(20_000), "20 Mbps");
        assert_eq!(format_bitrate(1_500), "1.5 Mbps");
    }
}
