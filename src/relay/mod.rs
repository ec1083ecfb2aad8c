// SPDX-License-Identifier: GPL-3.0-only

//! Relay orchestration: startup, steady state and ordered shutdown
//!
//! ```text
//! source ──► IngestAdapter ──► WorkQueue ──► WorkerPool ──► FrameSink
//!                                   │             │
//!                                   └── Counters ◄┘──► TelemetryCollector
//! ```
//!
//! Startup runs shared accelerator init, then the pool (fatal if no worker
//! comes up), then the telemetry ticker. Shutdown is the reverse: stop flag,
//! drain, join workers (their contexts drop on their own threads), release
//! the shared context, final telemetry report.

pub mod frame_loop;
pub mod ingest;
pub mod sink;
pub mod worker;

pub use frame_loop::{LoopAction, LoopController};
pub use ingest::{IngestAdapter, IngestStatus};
pub use sink::FrameSink;
pub use worker::{DropReason, FrameOutcome, WorkerPool, WorkerSettings, WorkerState};

use crate::accelerator::{Accelerator, AcceleratorContextManager, BackendKind};
use crate::config::RelayConfig;
use crate::errors::{AcceleratorError, StartupError, StartupResult};
use crate::queue::{QueueStats, WorkQueue};
use crate::telemetry::{CounterSnapshot, Counters, TelemetryCollector, TelemetryFormat};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Runtime settings for one relay, fixed at startup
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub workers: usize,
    pub backend: BackendKind,
    pub worker: WorkerSettings,
    pub telemetry_interval: Duration,
    pub backlog_threshold: usize,
    pub telemetry_format: TelemetryFormat,
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            workers: config.workers,
            backend: config.backend,
            worker: WorkerSettings {
                poll_timeout: config.poll_timeout(),
                preserve_timestamps: config.preserve_timestamps,
            },
            telemetry_interval: config.telemetry_interval(),
            backlog_threshold: config.backlog_threshold,
            telemetry_format: config.telemetry_format,
        }
    }
}

/// Accounting returned by [`Relay::shutdown`]
#[derive(Debug, Clone, Copy)]
pub struct ShutdownReport {
    /// Frames released from the queue without processing
    pub drained: u64,
    pub queue: QueueStats,
    pub counters: CounterSnapshot,
}

/// A running relay
pub struct Relay {
    manager: AcceleratorContextManager,
    queue: WorkQueue,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    ingest: Arc<IngestAdapter>,
    pool: Option<WorkerPool>,
    telemetry: Option<LoopController>,
}

impl Relay {
    /// Start with the backend named in `settings`
    pub fn start(settings: RelaySettings, sink: Arc<dyn FrameSink>) -> StartupResult<Self> {
        let backend = settings.backend;
        Self::start_with(settings, sink, move || crate::accelerator::open_backend(backend))
    }

    /// Start with an explicit shared-context factory
    pub fn start_with<F>(
        settings: RelaySettings,
        sink: Arc<dyn FrameSink>,
        factory: F,
    ) -> StartupResult<Self>
    where
        F: FnOnce() -> Result<Arc<dyn Accelerator>, AcceleratorError>,
    {
        let manager = AcceleratorContextManager::new();
        let accelerator = manager
            .init_shared(factory)
            .map_err(|e| StartupError::SharedContextInit(e.to_string()))?;

        let queue = WorkQueue::new();
        let counters = Arc::new(Counters::new());
        let stop = Arc::new(AtomicBool::new(false));

        let pool = WorkerPool::start(
            settings.workers,
            accelerator,
            queue.clone(),
            sink,
            Arc::clone(&counters),
            settings.worker,
            Arc::clone(&stop),
        )?;

        let collector = TelemetryCollector::new(
            Arc::clone(&counters),
            queue.clone(),
            settings.telemetry_interval,
            settings.backlog_threshold,
            settings.telemetry_format,
        );
        let telemetry = spawn_telemetry(collector)?;

        let ingest = Arc::new(IngestAdapter::new(
            queue.clone(),
            Arc::clone(&counters),
            Arc::clone(&stop),
        ));

        info!(
            workers = pool.running(),
            requested = settings.workers,
            "Relay running"
        );

        Ok(Self {
            manager,
            queue,
            counters,
            stop,
            ingest,
            pool: Some(pool),
            telemetry: Some(telemetry),
        })
    }

    /// Boundary handle for the frame source
    pub fn ingest(&self) -> Arc<IngestAdapter> {
        Arc::clone(&self.ingest)
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.counters.snapshot(self.queue.len())
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.as_ref().map(WorkerPool::states).unwrap_or_default()
    }

    pub fn processed_per_worker(&self) -> Vec<u64> {
        self.pool
            .as_ref()
            .map(WorkerPool::processed_per_worker)
            .unwrap_or_default()
    }

    pub fn running_workers(&self) -> usize {
        self.pool.as_ref().map(WorkerPool::running).unwrap_or(0)
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Block until `predicate` holds for a snapshot or `timeout` passes
    pub fn wait_for<P>(&self, timeout: Duration, mut predicate: P) -> bool
    where
        P: FnMut(&CounterSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.snapshot()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Stop, drain, join and release in order
    pub fn shutdown(mut self) -> ShutdownReport {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> ShutdownReport {
        info!("Relay shutting down");

        // (1) stop flag: ingest refuses new frames, workers leave on next pop
        self.stop.store(true, Ordering::SeqCst);
        // Callers already past the stop check finish their push first
        self.ingest.wait_idle();

        // (2) release what's still queued
        let mut drained = self.queue.drain();

        // (3) + (4) join workers; each drops its own context on exit
        if let Some(mut pool) = self.pool.take() {
            pool.join();
        }
        drained += self.queue.drain();

        // (5) shared context last
        self.manager.release_shared();

        if let Some(mut telemetry) = self.telemetry.take() {
            telemetry.stop();
        }

        let report = ShutdownReport {
            drained,
            queue: self.queue.stats(),
            counters: self.snapshot(),
        };
        info!(
            drained,
            pushed = report.queue.pushed,
            popped = report.queue.popped,
            processed = report.counters.processed.frames,
            "Relay stopped"
        );
        report
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.pool.is_some() {
            self.shutdown_inner();
        }
    }
}

/// Ticker thread: waits out the interval in short slices, reports, repeats
///
/// Emits one last report when stopped so the final counters are logged.
fn spawn_telemetry(mut collector: TelemetryCollector) -> StartupResult<LoopController> {
    const SLICE: Duration = Duration::from_millis(50);

    let stop = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&stop);
    LoopController::start("relay-telemetry", stop, move || {
        let deadline = Instant::now() + collector.interval();
        while Instant::now() < deadline && !observed.load(Ordering::SeqCst) {
            thread::sleep(SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
        collector.tick_and_emit();
        if observed.load(Ordering::SeqCst) {
            LoopAction::Stop
        } else {
            LoopAction::Continue
        }
    })
}
