// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture pipeline feeding the ingest adapter

use super::{BusEvent, attach_stage_probe, capture_description, halt, launch, play, poll_bus};
use crate::config::RelayConfig;
use crate::constants::{pipeline, timing};
use crate::errors::{StartupError, StartupResult};
use crate::frame::{FrameBuffer, FrameGeometry};
use crate::relay::IngestAdapter;
use crate::telemetry::Counters;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::{VideoFormat, VideoInfo};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const LABEL: &str = "capture";

/// `v4l2src … ! appsink` whose samples go straight to an [`IngestAdapter`]
///
/// The appsink callback only wraps the buffer (no copy) and enqueues it.
pub struct CapturePipeline {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
}

impl CapturePipeline {
    pub fn new(
        config: &RelayConfig,
        ingest: Arc<IngestAdapter>,
        counters: Arc<Counters>,
    ) -> StartupResult<Self> {
        info!(
            device = %config.device,
            geometry = %config.geometry(),
            fps = config.fps,
            "Creating capture pipeline"
        );

        let pipeline = launch(&capture_description(config))?;

        let appsink = pipeline
            .by_name(pipeline::APPSINK_NAME)
            .ok_or_else(|| StartupError::Pipeline("Failed to get appsink".into()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| StartupError::Pipeline("Failed to cast appsink".into()))?;

        attach_stage_probe(
            &pipeline,
            pipeline::CAPTURE_QUEUE_NAME,
            "sink",
            Arc::clone(&counters),
            |c| &c.captured,
        )?;
        attach_stage_probe(
            &pipeline,
            pipeline::APPSINK_NAME,
            "sink",
            counters,
            |c| &c.appsink_in,
        )?;

        let mut frame_num: u64 = 0;
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let buffer = sample.buffer_owned().ok_or_else(|| {
                        debug!(frame = frame_num, "No buffer in sample");
                        gstreamer::FlowError::Error
                    })?;

                    let mut frame = FrameBuffer::from_gst(buffer);
                    if let Some(geometry) = sample_geometry(&sample, frame_num) {
                        frame = frame.with_geometry(geometry);
                    }

                    let status = ingest.on_frame(frame);
                    if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(frame = frame_num, ?status, "Capture sample");
                    } else {
                        trace!(frame = frame_num, ?status, "Capture sample");
                    }
                    frame_num += 1;

                    // Refused frames are released and counted by the adapter
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(Self { pipeline, appsink })
    }

    pub fn start(&self) -> StartupResult<()> {
        play(&self.pipeline, LABEL)
    }

    /// Detach the callback and release the camera
    pub fn stop(&self) {
        info!("Stopping capture pipeline");
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        halt(&self.pipeline, LABEL);
    }

    pub fn poll_bus(&self, timeout_ms: u64) -> BusEvent {
        poll_bus(&self.pipeline, LABEL, timeout_ms)
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        debug!("Dropping capture pipeline");
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

/// Geometry from the sample caps; only NV12 qualifies
fn sample_geometry(sample: &gstreamer::Sample, frame_num: u64) -> Option<FrameGeometry> {
    let caps = sample.caps()?;
    let info = VideoInfo::from_caps(caps).ok()?;
    if info.format() != VideoFormat::Nv12 {
        if frame_num == 0 {
            warn!(format = ?info.format(), "Capture format is not NV12");
        }
        return None;
    }
    if frame_num == 0 && info.stride()[0] as u32 != info.width() {
        warn!(
            stride = info.stride()[0],
            width = info.width(),
            "Luma stride differs from width, rows carry padding"
        );
    }
    Some(FrameGeometry::new(info.width(), info.height()))
}
