// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer boundary: camera capture in, encoded RTP out
//!
//! The relay core never sees GStreamer types beyond [`crate::frame::FrameBuffer`].
//! This module wires the appsink callback to the
//! [`IngestAdapter`](crate::relay::IngestAdapter), exposes the appsrc as a
//! [`FrameSink`](crate::relay::FrameSink) and feeds stage counters from pad
//! probes.

pub mod capture;
pub mod description;
pub mod output;
pub mod session;

pub use capture::CapturePipeline;
pub use description::{Codec, EncoderKind, capture_description, stream_description};
pub use output::{AppSrcSink, StreamPipeline};
pub use session::{SessionEnd, StreamSession};

use crate::constants::timing;
use crate::errors::{StartupError, StartupResult};
use crate::telemetry::{Counters, StageCounter};
use gstreamer::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Parse a description into a pipeline
pub(crate) fn launch(description: &str) -> StartupResult<gstreamer::Pipeline> {
    gstreamer::init().map_err(|e| StartupError::Pipeline(format!("GStreamer init failed: {}", e)))?;

    debug!(pipeline = %description, "Parsing pipeline");
    gstreamer::parse::launch(description)
        .map_err(|e| StartupError::Pipeline(format!("Failed to parse pipeline: {}", e)))?
        .dynamic_cast::<gstreamer::Pipeline>()
        .map_err(|_| StartupError::Pipeline("Failed to cast to pipeline".into()))
}

/// Count buffers crossing `element`'s `pad` into `stage`
pub(crate) fn attach_stage_probe(
    pipeline: &gstreamer::Pipeline,
    element: &str,
    pad: &str,
    counters: Arc<Counters>,
    stage: fn(&Counters) -> &StageCounter,
) -> StartupResult<()> {
    let target = pipeline
        .by_name(element)
        .ok_or_else(|| StartupError::Pipeline(format!("No element named '{}'", element)))?;
    let pad_ref = target
        .static_pad(pad)
        .ok_or_else(|| StartupError::Pipeline(format!("'{}' has no {} pad", element, pad)))?;

    pad_ref.add_probe(gstreamer::PadProbeType::BUFFER, move |_pad, info| {
        if let Some(gstreamer::PadProbeData::Buffer(ref buffer)) = info.data {
            stage(&counters).record(buffer.size());
        }
        gstreamer::PadProbeReturn::Ok
    });
    debug!(element, pad, "Stage probe attached");
    Ok(())
}

/// Set Playing and wait for the state change to settle
pub(crate) fn play(pipeline: &gstreamer::Pipeline, label: &str) -> StartupResult<()> {
    pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
        log_bus_error(pipeline);
        StartupError::Pipeline(format!("Failed to start {} pipeline: {}", label, e))
    })?;

    let (result, state, pending) = pipeline.state(gstreamer::ClockTime::from_seconds(
        timing::START_TIMEOUT_SECS,
    ));
    debug!(?result, ?state, ?pending, label, "Pipeline state");
    if result.is_err() {
        log_bus_error(pipeline);
        let _ = pipeline.set_state(gstreamer::State::Null);
        return Err(StartupError::Pipeline(format!(
            "{} pipeline failed to reach Playing",
            label
        )));
    }
    if state != gstreamer::State::Playing {
        warn!(label, ?state, ?pending, "Pipeline is not in PLAYING state yet");
    }
    info!(label, "Pipeline playing");
    Ok(())
}

/// Set Null and wait briefly so elements release devices and buffers
pub(crate) fn halt(pipeline: &gstreamer::Pipeline, label: &str) {
    if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
        error!(label, error = ?e, "Failed to set pipeline to Null");
        return;
    }
    let (result, state, _) = pipeline.state(gstreamer::ClockTime::from_seconds(
        timing::STOP_TIMEOUT_SECS,
    ));
    match result {
        Ok(_) => debug!(label, ?state, "Pipeline stopped"),
        Err(e) => debug!(label, error = ?e, ?state, "Pipeline state change had issues"),
    }
}

/// What the bus reported during one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Quiet,
    Eos,
    Error(String),
}

/// Pop at most one Error/EOS/Warning message, waiting up to `timeout_ms`
pub(crate) fn poll_bus(pipeline: &gstreamer::Pipeline, label: &str, timeout_ms: u64) -> BusEvent {
    let Some(bus) = pipeline.bus() else {
        return BusEvent::Quiet;
    };
    let Some(msg) = bus.timed_pop_filtered(
        gstreamer::ClockTime::from_mseconds(timeout_ms),
        &[
            gstreamer::MessageType::Error,
            gstreamer::MessageType::Eos,
            gstreamer::MessageType::Warning,
        ],
    ) else {
        return BusEvent::Quiet;
    };

    match msg.view() {
        gstreamer::MessageView::Error(err) => {
            error!(
                label,
                error = %err.error(),
                debug = ?err.debug(),
                source = ?err.src().map(|s| s.name()),
                "GStreamer error"
            );
            BusEvent::Error(err.error().to_string())
        }
        gstreamer::MessageView::Eos(_) => {
            info!(label, "End of stream");
            BusEvent::Eos
        }
        gstreamer::MessageView::Warning(w) => {
            warn!(
                label,
                warning = %w.error(),
                debug = ?w.debug(),
                source = ?w.src().map(|s| s.name()),
                "GStreamer warning"
            );
            BusEvent::Quiet
        }
        _ => BusEvent::Quiet,
    }
}

fn log_bus_error(pipeline: &gstreamer::Pipeline) {
    if let Some(bus) = pipeline.bus()
        && let Some(msg) = bus.timed_pop_filtered(
            gstreamer::ClockTime::from_mseconds(timing::BUS_POLL_MS),
            &[gstreamer::MessageType::Error],
        )
        && let gstreamer::MessageView::Error(err) = msg.view()
    {
        error!(
            error = %err.error(),
            debug = ?err.debug(),
            source = ?err.src().map(|s| s.name()),
            "GStreamer ERROR during pipeline start"
        );
    }
}
