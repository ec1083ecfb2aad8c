// SPDX-License-Identifier: GPL-3.0-only

//! One end-to-end run: camera → relay → encoder → network

use super::{BusEvent, CapturePipeline, StreamPipeline};
use crate::config::RelayConfig;
use crate::constants::timing;
use crate::errors::StartupResult;
use crate::relay::{FrameSink, Relay, RelaySettings, ShutdownReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The operator asked to stop
    Interrupted,
    /// A pipeline reached end of stream
    Eos,
    /// A pipeline posted an error
    Error(String),
}

pub struct StreamSession {
    config: RelayConfig,
}

impl StreamSession {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Build both pipelines around a relay and run until interrupted or a
    /// pipeline ends
    ///
    /// Startup failures are returned before any frame is captured. Teardown
    /// stops the camera first so the ingest side goes quiet, then shuts the
    /// relay down in order, then flushes the encoder.
    pub fn run(self, interrupt: Arc<AtomicBool>) -> StartupResult<(SessionEnd, ShutdownReport)> {
        let config = self.config;

        let stream = StreamPipeline::new(&config)?;
        let sink: Arc<dyn FrameSink> = Arc::new(stream.sink());
        let relay = Relay::start(RelaySettings::from(&config), sink)?;
        stream.attach_probes(relay.counters())?;

        let capture = CapturePipeline::new(&config, relay.ingest(), relay.counters())?;
        stream.start()?;
        capture.start()?;

        info!(
            workers = relay.running_workers(),
            destination = %format!("{}:{}", config.host, config.port),
            "Streaming"
        );

        let end = loop {
            if interrupt.load(Ordering::SeqCst) {
                break SessionEnd::Interrupted;
            }
            match capture.poll_bus(timing::BUS_POLL_MS) {
                BusEvent::Quiet => {}
                BusEvent::Eos => break SessionEnd::Eos,
                BusEvent::Error(e) => break SessionEnd::Error(e),
            }
            match stream.poll_bus(0) {
                BusEvent::Quiet => {}
                BusEvent::Eos => break SessionEnd::Eos,
                BusEvent::Error(e) => break SessionEnd::Error(e),
            }
        };

        match &end {
            SessionEnd::Error(e) => warn!(error = %e, "Session ended by pipeline error"),
            other => info!(reason = ?other, "Session ending"),
        }

        capture.stop();
        let report = relay.shutdown();
        stream.stop();

        Ok((end, report))
    }
}
