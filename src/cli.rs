// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the relay
//!
//! This module provides command-line functionality for:
//! - Running the relay end to end
//! - Printing the pipeline descriptions a run would use
//! - Listing compute adapters

use luma_relay::BackendKind;
use luma_relay::RelayConfig;
use luma_relay::backends::gstreamer::{
    Codec, EncoderKind, SessionEnd, StreamSession, capture_description, stream_description,
};
use luma_relay::constants::{app_info, format_bitrate};
use luma_relay::gpu;
use luma_relay::telemetry::TelemetryFormat;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Flags that override the configuration file
#[derive(clap::Args, Debug, Default)]
pub struct RelayArgs {
    /// Worker threads (1-8)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Capture width
    #[arg(long)]
    width: Option<u32>,

    /// Capture height
    #[arg(long)]
    height: Option<u32>,

    /// Capture and stream frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Output codec (h264, h265)
    #[arg(long)]
    codec: Option<Codec>,

    /// Encoder (auto, hardware, software)
    #[arg(long)]
    encoder: Option<EncoderKind>,

    /// Encoder target bitrate in kbps
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// V4L2 capture device
    #[arg(short, long)]
    device: Option<String>,

    /// Stream destination host
    #[arg(long)]
    host: Option<String>,

    /// Stream destination port
    #[arg(short, long)]
    port: Option<u16>,

    /// Accelerator backend (gpu, cpu, auto)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Telemetry output (text, json)
    #[arg(long)]
    telemetry: Option<TelemetryFormat>,

    /// Carry capture timestamps onto output frames
    #[arg(long)]
    preserve_timestamps: bool,
}

impl RelayArgs {
    fn apply(self, config: &mut RelayConfig) {
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.width {
            config.width = v;
        }
        if let Some(v) = self.height {
            config.height = v;
        }
        if let Some(v) = self.fps {
            config.fps = v;
        }
        if let Some(v) = self.codec {
            config.codec = v;
        }
        if let Some(v) = self.encoder {
            config.encoder = v;
        }
        if let Some(v) = self.bitrate {
            config.bitrate_kbps = Some(v);
        }
        if let Some(v) = self.device {
            config.device = v;
        }
        if let Some(v) = self.host {
            config.host = v;
        }
        if let Some(v) = self.port {
            config.port = v;
        }
        if let Some(v) = self.backend {
            config.backend = v;
        }
        if let Some(v) = self.telemetry {
            config.telemetry_format = v;
        }
        if self.preserve_timestamps {
            config.preserve_timestamps = true;
        }
    }
}

fn resolve_config(
    path: Option<&Path>,
    args: RelayArgs,
) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    let mut config = RelayConfig::load_or_default(path)?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Run the relay until Ctrl+C or a pipeline ends
pub fn run_relay(path: Option<&Path>, args: RelayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(path, args)?;

    info!(
        version = app_info::version(),
        workers = config.workers,
        geometry = %config.geometry(),
        fps = config.fps,
        codec = %config.codec,
        bitrate = %format_bitrate(config.effective_bitrate_kbps()),
        backend = %config.backend,
        "Starting luma-relay"
    );

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    let (end, report) = StreamSession::new(config).run(interrupt)?;

    println!();
    println!("Frames captured:   {}", report.counters.captured.frames);
    println!("Frames queued:     {}", report.queue.pushed);
    println!("Frames processed:  {}", report.counters.processed.frames);
    println!("Frames pushed:     {}", report.counters.pushed.frames);
    println!("Frames drained:    {}", report.drained);
    println!(
        "Errors:            {} processing, {} accelerator, {} push",
        report.counters.processing_errors(),
        report.counters.accelerator_errors(),
        report.counters.push_failures
    );

    match end {
        SessionEnd::Error(e) => Err(format!("pipeline error: {}", e).into()),
        SessionEnd::Interrupted | SessionEnd::Eos => Ok(()),
    }
}

/// Print both pipeline descriptions for the resolved configuration
pub fn print_pipelines(
    path: Option<&Path>,
    args: RelayArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(path, args)?;

    println!("Capture:");
    println!("  {}", capture_description(&config));
    println!();
    println!("Stream:");
    println!("  {}", stream_description(&config));
    Ok(())
}

/// List compute adapters
pub fn list_adapters() -> Result<(), Box<dyn std::error::Error>> {
    let adapters = gpu::list_adapters();

    if adapters.is_empty() {
        warn!("No compute adapters found");
        println!("No compute adapters found; the relay will use CPU equalization.");
        return Ok(());
    }

    println!("Available adapters:");
    println!();
    for (index, adapter) in adapters.iter().enumerate() {
        println!("  [{}] {}", index, adapter.adapter_name);
        println!(
            "      Backend: {:?}  Type: {:?}  Driver: {}",
            adapter.backend, adapter.device_type, adapter.driver
        );
    }
    Ok(())
}
