// SPDX-License-Identifier: GPL-3.0-only

//! Encoding/streaming pipeline fed by the workers through an appsrc

use super::{BusEvent, attach_stage_probe, halt, launch, play, poll_bus, stream_description};
use crate::config::RelayConfig;
use crate::constants::{pipeline, timing};
use crate::errors::{PushError, StartupError, StartupResult};
use crate::frame::FrameBuffer;
use crate::relay::FrameSink;
use crate::telemetry::Counters;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

const LABEL: &str = "stream";

/// `appsrc … ! encoder ! rtp payloader ! udpsink`
pub struct StreamPipeline {
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
}

impl StreamPipeline {
    pub fn new(config: &RelayConfig) -> StartupResult<Self> {
        info!(
            codec = %config.codec,
            encoder = %config.encoder,
            bitrate_kbps = config.effective_bitrate_kbps(),
            host = %config.host,
            port = config.port,
            "Creating stream pipeline"
        );

        let pipeline = launch(&stream_description(config))?;

        let appsrc = pipeline
            .by_name(pipeline::APPSRC_NAME)
            .ok_or_else(|| StartupError::Pipeline("Failed to get appsrc".into()))?
            .dynamic_cast::<AppSrc>()
            .map_err(|_| StartupError::Pipeline("Failed to cast appsrc".into()))?;

        Ok(Self { pipeline, appsrc })
    }

    /// Count buffers leaving the appsrc queue and entering the encoder
    pub fn attach_probes(&self, counters: Arc<Counters>) -> StartupResult<()> {
        attach_stage_probe(
            &self.pipeline,
            pipeline::OUTPUT_QUEUE_NAME,
            "src",
            Arc::clone(&counters),
            |c| &c.after_src,
        )?;
        attach_stage_probe(
            &self.pipeline,
            pipeline::ENCODER_NAME,
            "sink",
            counters,
            |c| &c.encoded,
        )
    }

    pub fn start(&self) -> StartupResult<()> {
        play(&self.pipeline, LABEL)
    }

    /// Sink handle for the worker pool
    pub fn sink(&self) -> AppSrcSink {
        AppSrcSink {
            appsrc: self.appsrc.clone(),
            pushed: AtomicU64::new(0),
        }
    }

    /// Flush the encoder with EOS, then release the pipeline
    pub fn stop(&self) {
        info!("Stopping stream pipeline");
        if let Err(e) = self.appsrc.end_of_stream() {
            debug!(error = ?e, "Failed to send EOS to appsrc");
        }
        halt(&self.pipeline, LABEL);
    }

    pub fn poll_bus(&self, timeout_ms: u64) -> BusEvent {
        poll_bus(&self.pipeline, LABEL, timeout_ms)
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        debug!("Dropping stream pipeline");
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

/// [`FrameSink`] that pushes into the stream pipeline's appsrc
pub struct AppSrcSink {
    appsrc: AppSrc,
    pushed: AtomicU64,
}

impl FrameSink for AppSrcSink {
    fn push(&self, frame: FrameBuffer) -> Result<(), PushError> {
        match self.appsrc.push_buffer(frame.into_gst_buffer()) {
            Ok(_) => {
                let count = self.pushed.fetch_add(1, Ordering::Relaxed);
                if count % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(frame = count, "Frames pushed to appsrc");
                }
                Ok(())
            }
            Err(gstreamer::FlowError::Flushing) | Err(gstreamer::FlowError::Eos) => {
                Err(PushError::Closed)
            }
            Err(e) => {
                warn!(?e, "Failed to push frame to appsrc");
                Err(PushError::Refused(format!("{:?}", e)))
            }
        }
    }
}
