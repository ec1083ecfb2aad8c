// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline description strings for `gstreamer::parse::launch`
//!
//! Capture: camera → NV12 caps → rate limiter → leaky queue → appsink.
//! Stream: appsrc → NV12 caps → leaky queue → encoder → RTP → udpsink.
//! Element names come from [`crate::constants::pipeline`] so probes and
//! lookups can find them again.

use crate::config::RelayConfig;
use crate::constants::pipeline;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Output video codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
}

impl Codec {
    /// Caps media type between encoder and payloader
    pub fn media_type(&self) -> &'static str {
        match self {
            Codec::H264 => "video/x-h264",
            Codec::H265 => "video/x-h265",
        }
    }

    /// Stream alignment the payloader expects from the hardware encoder
    pub fn alignment(&self) -> &'static str {
        match self {
            Codec::H264 => "nal",
            Codec::H265 => "au",
        }
    }

    pub fn hardware_encoder(&self) -> &'static str {
        match self {
            Codec::H264 => "omxh264enc",
            Codec::H265 => "omxh265enc",
        }
    }

    pub fn software_encoder(&self) -> &'static str {
        match self {
            Codec::H264 => "x264enc",
            Codec::H265 => "x265enc",
        }
    }

    pub fn parser(&self) -> &'static str {
        match self {
            Codec::H264 => "h264parse",
            Codec::H265 => "h265parse",
        }
    }

    pub fn payloader(&self) -> &'static str {
        match self {
            Codec::H264 => "rtph264pay",
            Codec::H265 => "rtph265pay",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::H264 => write!(f, "h264"),
            Codec::H265 => write!(f, "h265"),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Codec::H264),
            "h265" | "hevc" => Ok(Codec::H265),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

/// Encoder selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// OMX hardware encoder when the element exists, software otherwise
    #[default]
    Auto,
    /// OMX hardware encoder tuned for low-delay P frames
    Hardware,
    /// x264/x265 with zero-latency tuning
    Software,
}

impl EncoderKind {
    /// Resolve `Auto` against the element registry
    ///
    /// Never returns `Auto`.
    pub fn resolve(self, codec: Codec) -> EncoderKind {
        match self {
            EncoderKind::Auto => {
                let _ = gstreamer::init();
                let element = codec.hardware_encoder();
                if gstreamer::ElementFactory::find(element).is_some() {
                    debug!(element, "Hardware encoder available");
                    EncoderKind::Hardware
                } else {
                    info!(
                        element,
                        fallback = codec.software_encoder(),
                        "Hardware encoder not found, using software encoder"
                    );
                    EncoderKind::Software
                }
            }
            other => other,
        }
    }
}

impl std::fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderKind::Auto => write!(f, "auto"),
            EncoderKind::Hardware => write!(f, "hardware"),
            EncoderKind::Software => write!(f, "software"),
        }
    }
}

impl std::str::FromStr for EncoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EncoderKind::Auto),
            "hardware" | "hw" | "omx" => Ok(EncoderKind::Hardware),
            "software" | "sw" => Ok(EncoderKind::Software),
            other => Err(format!("unknown encoder '{}'", other)),
        }
    }
}

fn raw_caps(config: &RelayConfig) -> String {
    format!(
        "video/x-raw,format={},width={},height={},framerate={}/1",
        pipeline::PIXEL_FORMAT,
        config.width,
        config.height,
        config.fps
    )
}

fn leaky_queue(name: &str, buffers: u32) -> String {
    format!(
        "queue name={} leaky=downstream max-size-buffers={} max-size-time=0 max-size-bytes=0",
        name, buffers
    )
}

/// Camera to appsink
///
/// The appsink keeps a single buffer and drops older ones so a slow relay
/// never stalls the camera.
pub fn capture_description(config: &RelayConfig) -> String {
    format!(
        "v4l2src device={} io-mode=dmabuf ! {} ! videorate drop-only=true max-rate={} ! {} ! \
         appsink name={} emit-signals=true max-buffers=1 drop=true sync=false",
        config.device,
        raw_caps(config),
        config.fps,
        leaky_queue(pipeline::CAPTURE_QUEUE_NAME, pipeline::CAPTURE_QUEUE_BUFFERS),
        pipeline::APPSINK_NAME,
    )
}

fn encoder_chain(config: &RelayConfig, encoder: EncoderKind) -> String {
    let codec = config.codec;
    let bitrate = config.effective_bitrate_kbps();
    match encoder.resolve(codec) {
        EncoderKind::Software => format!(
            "{} name={} bitrate={} tune=zerolatency speed-preset=ultrafast key-int-max={} ! \
             {} config-interval=1 ! {} config-interval=1 pt=96 aggregate-mode=zero-latency",
            codec.software_encoder(),
            pipeline::ENCODER_NAME,
            bitrate,
            pipeline::IDR_PERIOD,
            codec.parser(),
            codec.payloader(),
        ),
        _ => format!(
            "{} name={} num-slices=8 periodicity-idr={} cpb-size=500 gdr-mode=horizontal \
             initial-delay=250 control-rate=low-latency prefetch-buffer=true target-bitrate={} \
             gop-mode=low-delay-p ! {},alignment={} ! {}",
            codec.hardware_encoder(),
            pipeline::ENCODER_NAME,
            pipeline::IDR_PERIOD,
            bitrate,
            codec.media_type(),
            codec.alignment(),
            codec.payloader(),
        ),
    }
}

/// Appsrc to UDP
///
/// The appsrc timestamps buffers on arrival unless the relay preserves
/// capture timestamps.
pub fn stream_description(config: &RelayConfig) -> String {
    format!(
        "appsrc name={} is-live=true format=time do-timestamp={} ! {} ! {} ! {} ! \
         udpsink buffer-size={} host={} port={} async=false max-lateness=-1 qos-dscp={}",
        pipeline::APPSRC_NAME,
        !config.preserve_timestamps,
        raw_caps(config),
        leaky_queue(pipeline::OUTPUT_QUEUE_NAME, pipeline::OUTPUT_QUEUE_BUFFERS),
        encoder_chain(config, config.encoder),
        pipeline::UDP_BUFFER_SIZE,
        config.host,
        config.port,
        pipeline::QOS_DSCP,
    )
}
