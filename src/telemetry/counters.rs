// SPDX-License-Identifier: GPL-3.0-only

//! Atomic stage and error counters
//!
//! Every counter is monotonically increasing and updated with relaxed
//! ordering. They feed observability only and never gate control flow.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Frame and byte tallies for one pipeline stage
#[derive(Debug, Default)]
pub struct StageCounter {
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl StageCounter {
    pub fn record(&self, bytes: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn sample(&self) -> StageSample {
        StageSample {
            frames: self.frames.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`StageCounter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageSample {
    pub frames: u64,
    pub bytes: u64,
}

impl StageSample {
    pub fn delta(&self, previous: &StageSample) -> StageSample {
        StageSample {
            frames: self.frames.saturating_sub(previous.frames),
            bytes: self.bytes.saturating_sub(previous.bytes),
        }
    }
}

/// Counters shared by the ingest adapter, workers, sink and probes
///
/// Owned by an explicit `Arc<Counters>` handed to each component rather than
/// living in process globals, so several relays can coexist in one process.
#[derive(Debug, Default)]
pub struct Counters {
    /// Frames entering the capture queue
    pub captured: StageCounter,
    /// Frames reaching the appsink input
    pub appsink_in: StageCounter,
    /// Frames accepted by the ingest adapter
    pub arrived: StageCounter,
    /// Frames for which a worker produced an output
    pub processed: StageCounter,
    /// Outputs accepted by the sink
    pub pushed: StageCounter,
    /// Outputs leaving the queue behind the appsrc
    pub after_src: StageCounter,
    /// Buffers reaching the encoder input
    pub encoded: StageCounter,

    pub map_failures: AtomicU64,
    pub size_mismatches: AtomicU64,
    pub output_failures: AtomicU64,
    pub alloc_failures: AtomicU64,
    pub kernel_failures: AtomicU64,
    pub push_failures: AtomicU64,
    pub rejected: AtomicU64,

    pub processing_time_us: AtomicU64,
    live_workers: AtomicUsize,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_processing_time(&self, micros: u64) {
        self.processing_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.live_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.live_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Relaxed)
    }

    /// Copy every counter, tagging the copy with the current queue depth
    pub fn snapshot(&self, queue_depth: usize) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            captured: self.captured.sample(),
            appsink_in: self.appsink_in.sample(),
            arrived: self.arrived.sample(),
            processed: self.processed.sample(),
            pushed: self.pushed.sample(),
            after_src: self.after_src.sample(),
            encoded: self.encoded.sample(),
            map_failures: load(&self.map_failures),
            size_mismatches: load(&self.size_mismatches),
            output_failures: load(&self.output_failures),
            alloc_failures: load(&self.alloc_failures),
            kernel_failures: load(&self.kernel_failures),
            push_failures: load(&self.push_failures),
            rejected: load(&self.rejected),
            processing_time_us: load(&self.processing_time_us),
            queue_depth,
            live_workers: self.live_workers(),
        }
    }
}

/// Plain copy of [`Counters`] at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub captured: StageSample,
    pub appsink_in: StageSample,
    pub arrived: StageSample,
    pub processed: StageSample,
    pub pushed: StageSample,
    pub after_src: StageSample,
    pub encoded: StageSample,
    pub map_failures: u64,
    pub size_mismatches: u64,
    pub output_failures: u64,
    pub alloc_failures: u64,
    pub kernel_failures: u64,
    pub push_failures: u64,
    pub rejected: u64,
    pub processing_time_us: u64,
    pub queue_depth: usize,
    pub live_workers: usize,
}

impl CounterSnapshot {
    /// Host-side per-frame failures
    pub fn processing_errors(&self) -> u64 {
        self.map_failures + self.size_mismatches + self.output_failures
    }

    /// Device-side per-frame failures
    pub fn accelerator_errors(&self) -> u64 {
        self.alloc_failures + self.kernel_failures
    }

    /// Frames that left the queue and ended in exactly one outcome
    pub fn settled(&self) -> u64 {
        self.processed.frames + self.processing_errors() + self.accelerator_errors()
    }

    /// Mean processing latency over the whole run, in milliseconds
    pub fn average_processing_ms(&self) -> f64 {
        if self.processed.frames == 0 {
            0.0
        } else {
            self.processing_time_us as f64 / self.processed.frames as f64 / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_counter_records_frames_and_bytes() {
        let counter = StageCounter::default();
        counter.record(100);
        counter.record(50);
        assert_eq!(
            counter.sample(),
            StageSample {
                frames: 2,
                bytes: 150
            }
        );
    }

    #[test]
    fn test_error_aggregates() {
        let counters = Counters::new();
        Counters::incr(&counters.map_failures);
        Counters::incr(&counters.size_mismatches);
        Counters::incr(&counters.kernel_failures);
        Counters::incr(&counters.push_failures);

        let snapshot = counters.snapshot(3);
        assert_eq!(snapshot.processing_errors(), 2);
        assert_eq!(snapshot.accelerator_errors(), 1);
        assert_eq!(snapshot.queue_depth, 3);
    }

    #[test]
    fn test_average_processing_ms() {
        let counters = Counters::new();
        assert_eq!(counters.snapshot(0).average_processing_ms(), 0.0);

        counters.processed.record(10);
        counters.processed.record(10);
        counters.add_processing_time(6_000);
        assert!((counters.snapshot(0).average_processing_ms() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_live_worker_gauge() {
        let counters = Counters::new();
        counters.worker_started();
        counters.worker_started();
        counters.worker_stopped();
        assert_eq!(counters.live_workers(), 1);
    }
}
