// SPDX-License-Identifier: GPL-3.0-only

//! Periodic rate derivation and health classification

use super::counters::{CounterSnapshot, Counters, StageSample};
use crate::constants::telemetry::TARGET;
use crate::queue::WorkQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Overall relay health, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Device buffer allocation or kernel execution failures were recorded
    AcceleratorErrors,
    /// Map, size or output-allocation failures were recorded
    ProcessingErrors,
    /// Queue depth exceeds the backlog threshold
    Backlogged,
    /// Frames are flowing out of the workers
    Active,
    Idle,
}

impl Health {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Health::AcceleratorErrors | Health::ProcessingErrors)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Health::AcceleratorErrors => "degraded (accelerator errors)",
            Health::ProcessingErrors => "degraded (processing errors)",
            Health::Backlogged => "backlogged",
            Health::Active => "active",
            Health::Idle => "idle",
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a snapshot
///
/// Deterministic: the same snapshot, rate and threshold always give the same
/// answer. Error counts are cumulative over the run.
pub fn classify(snapshot: &CounterSnapshot, output_fps: f64, backlog_threshold: usize) -> Health {
    if snapshot.accelerator_errors() > 0 {
        Health::AcceleratorErrors
    } else if snapshot.processing_errors() > 0 {
        Health::ProcessingErrors
    } else if snapshot.queue_depth > backlog_threshold {
        Health::Backlogged
    } else if output_fps > 0.0 {
        Health::Active
    } else {
        Health::Idle
    }
}

/// Per-stage frame rates over one interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageRates {
    pub capture_fps: f64,
    pub appsink_fps: f64,
    pub ingest_fps: f64,
    pub output_fps: f64,
    pub push_fps: f64,
    pub after_src_fps: f64,
    pub encoder_fps: f64,
}

/// One telemetry tick
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport {
    pub timestamp: String,
    pub interval_secs: f64,
    pub rates: StageRates,
    pub bitrate_kbps: f64,
    pub queue_depth: usize,
    pub live_workers: usize,
    pub processing_errors: u64,
    pub accelerator_errors: u64,
    pub push_failures: u64,
    pub rejected: u64,
    pub avg_processing_ms: f64,
    pub health: Health,
}

/// How reports are written out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryFormat {
    /// Structured `tracing` event
    #[default]
    Text,
    /// One JSON object per line on stdout
    Json,
}

impl std::str::FromStr for TelemetryFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(TelemetryFormat::Text),
            "json" => Ok(TelemetryFormat::Json),
            other => Err(format!("unknown telemetry format '{}'", other)),
        }
    }
}

fn rate(delta: u64, secs: f64) -> f64 {
    if secs > 0.0 { delta as f64 / secs } else { 0.0 }
}

/// Derive a report from two snapshots taken `elapsed` apart
pub fn report(
    previous: &CounterSnapshot,
    current: &CounterSnapshot,
    elapsed: Duration,
    backlog_threshold: usize,
) -> TelemetryReport {
    let secs = elapsed.as_secs_f64();
    let delta = |cur: &StageSample, prev: &StageSample| cur.delta(prev);

    let encoded = delta(&current.encoded, &previous.encoded);
    let pushed = delta(&current.pushed, &previous.pushed);

    let rates = StageRates {
        capture_fps: rate(delta(&current.captured, &previous.captured).frames, secs),
        appsink_fps: rate(delta(&current.appsink_in, &previous.appsink_in).frames, secs),
        ingest_fps: rate(delta(&current.arrived, &previous.arrived).frames, secs),
        output_fps: rate(delta(&current.processed, &previous.processed).frames, secs),
        push_fps: rate(pushed.frames, secs),
        after_src_fps: rate(delta(&current.after_src, &previous.after_src).frames, secs),
        encoder_fps: rate(encoded.frames, secs),
    };

    // No encoder probe in headless runs; fall back to what the sink accepted
    let bitrate_bytes = if current.encoded.frames > 0 {
        encoded.bytes
    } else {
        pushed.bytes
    };
    let bitrate_kbps = rate(bitrate_bytes * 8, secs) / 1000.0;

    TelemetryReport {
        timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        interval_secs: secs,
        rates,
        bitrate_kbps,
        queue_depth: current.queue_depth,
        live_workers: current.live_workers,
        processing_errors: current.processing_errors(),
        accelerator_errors: current.accelerator_errors(),
        push_failures: current.push_failures,
        rejected: current.rejected,
        avg_processing_ms: current.average_processing_ms(),
        health: classify(current, rates.output_fps, backlog_threshold),
    }
}

/// Samples shared counters on each tick and keeps the previous snapshot
///
/// Only reads atomics and the queue depth; never touches worker state.
pub struct TelemetryCollector {
    counters: Arc<Counters>,
    queue: WorkQueue,
    previous: CounterSnapshot,
    last_tick: Option<Instant>,
    interval: Duration,
    backlog_threshold: usize,
    format: TelemetryFormat,
}

impl TelemetryCollector {
    pub fn new(
        counters: Arc<Counters>,
        queue: WorkQueue,
        interval: Duration,
        backlog_threshold: usize,
        format: TelemetryFormat,
    ) -> Self {
        Self {
            counters,
            queue,
            previous: CounterSnapshot::default(),
            last_tick: None,
            interval,
            backlog_threshold,
            format,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take a snapshot and derive rates against the previous one
    ///
    /// Rates use the measured time since the last tick; the first tick
    /// falls back to the configured interval.
    pub fn tick(&mut self) -> TelemetryReport {
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map(|last| now.duration_since(last))
            .unwrap_or(self.interval);

        let current = self.counters.snapshot(self.queue.len());
        let report = report(&self.previous, &current, elapsed, self.backlog_threshold);

        self.previous = current;
        self.last_tick = Some(now);
        report
    }

    /// Tick and write the report in the configured format
    pub fn tick_and_emit(&mut self) -> TelemetryReport {
        let report = self.tick();
        emit(&report, self.format);
        report
    }
}

/// Write a report as a `tracing` event or a JSON line
pub fn emit(report: &TelemetryReport, format: TelemetryFormat) {
    match format {
        TelemetryFormat::Json => match serde_json::to_string(report) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to serialize telemetry report"),
        },
        TelemetryFormat::Text => {
            let r = &report.rates;
            info!(
                target: TARGET,
                capture_fps = format_args!("{:.1}", r.capture_fps),
                appsink_fps = format_args!("{:.1}", r.appsink_fps),
                ingest_fps = format_args!("{:.1}", r.ingest_fps),
                output_fps = format_args!("{:.1}", r.output_fps),
                push_fps = format_args!("{:.1}", r.push_fps),
                after_src_fps = format_args!("{:.1}", r.after_src_fps),
                encoder_fps = format_args!("{:.1}", r.encoder_fps),
                bitrate_kbps = format_args!("{:.0}", report.bitrate_kbps),
                queue = report.queue_depth,
                workers = report.live_workers,
                avg_ms = format_args!("{:.2}", report.avg_processing_ms),
                processing_errors = report.processing_errors,
                accelerator_errors = report.accelerator_errors,
                push_failures = report.push_failures,
                rejected = report.rejected,
                status = %report.health,
                "Relay status"
            );
        }
    }
}
