// SPDX-License-Identifier: GPL-3.0-only

//! Worker pool: dequeue, enhance, hand off
//!
//! Each worker walks STARTING -> RUNNING -> DRAINING -> STOPPED. A worker
//! whose accelerator context fails to initialize goes straight from
//! STARTING to STOPPED without touching a frame. Inside RUNNING every
//! failure is per-frame: one counter is bumped, the frame is released, and
//! the worker moves on.

use super::frame_loop::{LoopAction, LoopController};
use super::sink::FrameSink;
use crate::accelerator::{Accelerator, WorkerContext, apply_enhancement_into};
use crate::constants::frame::NEUTRAL_CHROMA;
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::{AcceleratorError, FrameError, StartupError, StartupResult};
use crate::frame::FrameBuffer;
use crate::queue::WorkQueue;
use crate::telemetry::Counters;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Lifecycle state of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

/// Per-worker observable state
#[derive(Debug)]
struct WorkerSlot {
    state: AtomicU8,
    processed: AtomicU64,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Starting as u8),
            processed: AtomicU64::new(0),
        }
    }

    fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Settings every worker reads; fixed for the run
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Longest a worker waits on an empty queue before re-checking stop
    pub poll_timeout: Duration,
    /// Carry input timestamps onto outputs instead of leaving them unset
    pub preserve_timestamps: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: crate::constants::timing::POLL_TIMEOUT,
            preserve_timestamps: false,
        }
    }
}

/// What happened to one dequeued frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Output produced and accepted by the sink
    Delivered,
    /// Output produced, sink refused it
    PushFailed,
    /// Frame discarded before an output existed
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Map,
    SizeMismatch,
    OutputAllocation,
    BufferAllocation,
    Kernel,
}

/// Shared resources handed to every worker thread
struct WorkerShared {
    queue: WorkQueue,
    sink: Arc<dyn FrameSink>,
    counters: Arc<Counters>,
    settings: WorkerSettings,
}

/// Loop state owned by one worker thread
struct WorkerRuntime {
    worker_id: usize,
    context: Option<WorkerContext>,
    slot: Arc<WorkerSlot>,
    shared: Arc<WorkerShared>,
}

impl WorkerRuntime {
    fn process(&mut self, frame: FrameBuffer) -> FrameOutcome {
        let Some(context) = self.context.as_mut() else {
            Counters::incr(&self.shared.counters.kernel_failures);
            return FrameOutcome::Dropped(DropReason::Kernel);
        };

        let outcome = process_frame(context, frame, &self.shared);
        if !matches!(outcome, FrameOutcome::Dropped(_)) {
            let processed = self.slot.processed.fetch_add(1, Ordering::Relaxed) + 1;
            if processed % FRAME_LOG_INTERVAL == 0 {
                debug!(worker_id = self.worker_id, processed, "Worker progress");
            }
        }
        outcome
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        if self.slot.get() == WorkerState::Running {
            self.slot.set(WorkerState::Draining);
        }
        // Per-worker accelerator resources go on this thread
        self.context.take();
        self.shared.counters.worker_stopped();
        self.slot.set(WorkerState::Stopped);
        info!(
            worker_id = self.worker_id,
            processed = self.slot.processed.load(Ordering::Relaxed),
            "Worker stopped"
        );
    }
}

/// Process one frame end to end
///
/// Exactly one of: output produced (then pushed or counted as a push
/// failure), or one error counter incremented.
fn process_frame(context: &mut WorkerContext, frame: FrameBuffer, shared: &WorkerShared) -> FrameOutcome {
    let counters = &shared.counters;
    let started = Instant::now();

    let Some(geometry) = frame.geometry() else {
        Counters::incr(&counters.size_mismatches);
        return FrameOutcome::Dropped(DropReason::SizeMismatch);
    };

    let map = match frame.map() {
        Ok(map) => map,
        Err(e) => {
            debug!(worker_id = context.worker_id(), error = %e, "Frame map failed");
            Counters::incr(&counters.map_failures);
            return FrameOutcome::Dropped(DropReason::Map);
        }
    };

    let frame_size = geometry.frame_size();
    let luma_size = geometry.luma_size();
    if map.len() < frame_size {
        let e = FrameError::SizeMismatch {
            expected: frame_size,
            actual: map.len(),
        };
        debug!(worker_id = context.worker_id(), error = %e, "Frame rejected");
        Counters::incr(&counters.size_mismatches);
        return FrameOutcome::Dropped(DropReason::SizeMismatch);
    }

    let mut output = Vec::new();
    if output.try_reserve_exact(frame_size).is_err() {
        let e = FrameError::OutputAllocation(frame_size);
        warn!(worker_id = context.worker_id(), error = %e, "Output allocation failed");
        Counters::incr(&counters.output_failures);
        return FrameOutcome::Dropped(DropReason::OutputAllocation);
    }
    output.resize(frame_size, NEUTRAL_CHROMA);

    if let Err(e) =
        apply_enhancement_into(context, &map[..luma_size], geometry, &mut output[..luma_size])
    {
        debug!(worker_id = context.worker_id(), error = %e, "Enhancement failed");
        let reason = match e {
            AcceleratorError::BufferAllocation { .. } => {
                Counters::incr(&counters.alloc_failures);
                DropReason::BufferAllocation
            }
            AcceleratorError::PlaneSize { .. } => {
                Counters::incr(&counters.size_mismatches);
                DropReason::SizeMismatch
            }
            _ => {
                Counters::incr(&counters.kernel_failures);
                DropReason::Kernel
            }
        };
        return FrameOutcome::Dropped(reason);
    }

    let (pts, duration) = if shared.settings.preserve_timestamps {
        (frame.pts(), frame.duration())
    } else {
        (None, None)
    };
    drop(map);
    drop(frame);

    counters.processed.record(frame_size);
    counters.add_processing_time(started.elapsed().as_micros() as u64);

    let output = FrameBuffer::from_bytes(output)
        .with_geometry(geometry)
        .with_timestamps(pts, duration);
    match shared.sink.push(output) {
        Ok(()) => {
            counters.pushed.record(frame_size);
            FrameOutcome::Delivered
        }
        Err(e) => {
            trace!(worker_id = context.worker_id(), error = %e, "Sink refused frame");
            Counters::incr(&counters.push_failures);
            FrameOutcome::PushFailed
        }
    }
}

/// N long-lived worker threads sharing one queue and one stop signal
pub struct WorkerPool {
    controllers: Vec<LoopController>,
    slots: Vec<Arc<WorkerSlot>>,
    running: usize,
}

impl WorkerPool {
    /// Spawn `size` workers and wait for each to report its init outcome
    ///
    /// Fails only if no worker at all came up.
    pub fn start(
        size: usize,
        accelerator: Arc<dyn Accelerator>,
        queue: WorkQueue,
        sink: Arc<dyn FrameSink>,
        counters: Arc<Counters>,
        settings: WorkerSettings,
        stop: Arc<AtomicBool>,
    ) -> StartupResult<Self> {
        let shared = Arc::new(WorkerShared {
            queue,
            sink,
            counters,
            settings,
        });
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<(usize, bool)>(size);

        let mut controllers = Vec::with_capacity(size);
        let mut slots = Vec::with_capacity(size);

        for worker_id in 0..size {
            let slot = Arc::new(WorkerSlot::new());
            slots.push(Arc::clone(&slot));

            let init = {
                let accelerator = Arc::clone(&accelerator);
                let shared = Arc::clone(&shared);
                let ready = ready_tx.clone();
                move || match WorkerContext::create(&accelerator, worker_id) {
                    Ok(context) => {
                        shared.counters.worker_started();
                        slot.set(WorkerState::Running);
                        let _ = ready.send((worker_id, true));
                        Ok(WorkerRuntime {
                            worker_id,
                            context: Some(context),
                            slot,
                            shared,
                        })
                    }
                    Err(e) => {
                        slot.set(WorkerState::Stopped);
                        let _ = ready.send((worker_id, false));
                        Err(e)
                    }
                }
            };

            let body = {
                let shared = Arc::clone(&shared);
                let stop = Arc::clone(&stop);
                move |runtime: &mut WorkerRuntime| {
                    if let Some(frame) = shared.queue.pop_timeout(shared.settings.poll_timeout) {
                        runtime.process(frame);
                        if stop.load(Ordering::SeqCst) {
                            runtime.slot.set(WorkerState::Draining);
                            return LoopAction::Stop;
                        }
                    }
                    LoopAction::Continue
                }
            };

            let name = format!("relay-worker-{}", worker_id);
            match LoopController::start_with_init(&name, Arc::clone(&stop), init, body) {
                Ok(controller) => controllers.push(controller),
                Err(e) => {
                    stop.store(true, Ordering::SeqCst);
                    drop(controllers);
                    return Err(e);
                }
            }
        }
        drop(ready_tx);

        let mut running = 0;
        for _ in 0..size {
            match ready_rx.recv() {
                Ok((_, true)) => running += 1,
                Ok((worker_id, false)) => {
                    warn!(worker_id, "Worker failed to initialize, continuing with reduced capacity");
                }
                // Every worker thread is gone
                Err(_) => break,
            }
        }

        if running == 0 {
            for controller in &mut controllers {
                controller.join();
            }
            return Err(StartupError::NoWorkersStarted { requested: size });
        }

        info!(requested = size, running, "Worker pool started");
        Ok(Self {
            controllers,
            slots,
            running,
        })
    }

    /// Workers that initialized successfully
    pub fn running(&self) -> usize {
        self.running
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.slots.iter().map(|slot| slot.get()).collect()
    }

    pub fn processed_per_worker(&self) -> Vec<u64> {
        self.slots
            .iter()
            .map(|slot| slot.processed.load(Ordering::Relaxed))
            .collect()
    }

    /// Wait for every worker to exit; the stop signal must already be set
    pub fn join(&mut self) {
        for controller in &mut self.controllers {
            controller.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::CpuAccelerator;
    use crate::errors::PushError;
    use crate::frame::FrameGeometry;
    use std::sync::Mutex;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_timeout: Duration::from_millis(5),
            preserve_timestamps: false,
        }
    }

    fn shared_with(sink: Arc<dyn FrameSink>, preserve_timestamps: bool) -> WorkerShared {
        WorkerShared {
            queue: WorkQueue::new(),
            sink,
            counters: Arc::new(Counters::new()),
            settings: WorkerSettings {
                preserve_timestamps,
                ..settings()
            },
        }
    }

    fn cpu_context() -> WorkerContext {
        let accel: Arc<dyn Accelerator> = Arc::new(CpuAccelerator::new());
        WorkerContext::create(&accel, 0).unwrap()
    }

    fn collecting_sink() -> (Arc<dyn FrameSink>, Arc<Mutex<Vec<FrameBuffer>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&frames);
        let sink = move |frame: FrameBuffer| -> Result<(), PushError> {
            store.lock().unwrap().push(frame);
            Ok(())
        };
        let sink: Arc<dyn FrameSink> = Arc::new(sink);
        (sink, frames)
    }

    #[test]
    fn test_output_has_neutral_chroma_and_same_size() {
        let (sink, frames) = collecting_sink();
        let shared = shared_with(sink, false);
        let mut ctx = cpu_context();

        let geometry = FrameGeometry::new(4, 2);
        let mut data = vec![20u8, 20, 20, 20, 90, 90, 90, 90];
        data.extend_from_slice(&[7, 9, 7, 9]);
        let frame = FrameBuffer::from_bytes(data)
            .with_geometry(geometry)
            .with_timestamps(Some(Duration::from_millis(16)), None);

        assert_eq!(process_frame(&mut ctx, frame, &shared), FrameOutcome::Delivered);

        let frames = frames.lock().unwrap();
        let out = frames[0].map().unwrap();
        assert_eq!(out.len(), geometry.frame_size());
        assert_eq!(&out[..8], &[0, 0, 0, 0, 255, 255, 255, 255]);
        assert!(out[8..].iter().all(|&b| b == NEUTRAL_CHROMA));
        assert_eq!(frames[0].pts(), None);
    }

    #[test]
    fn test_timestamps_preserved_when_configured() {
        let (sink, frames) = collecting_sink();
        let shared = shared_with(sink, true);
        let mut ctx = cpu_context();

        let frame = FrameBuffer::from_bytes(vec![1u8; 12])
            .with_geometry(FrameGeometry::new(4, 2))
            .with_timestamps(Some(Duration::from_millis(33)), Some(Duration::from_millis(16)));
        process_frame(&mut ctx, frame, &shared);

        let frames = frames.lock().unwrap();
        assert_eq!(frames[0].pts(), Some(Duration::from_millis(33)));
        assert_eq!(frames[0].duration(), Some(Duration::from_millis(16)));
    }

    #[test]
    fn test_truncated_frame_counts_one_size_mismatch() {
        let (sink, frames) = collecting_sink();
        let shared = shared_with(sink, false);
        let mut ctx = cpu_context();

        let frame = FrameBuffer::from_bytes(vec![0u8; 11]).with_geometry(FrameGeometry::new(4, 2));
        assert_eq!(
            process_frame(&mut ctx, frame, &shared),
            FrameOutcome::Dropped(DropReason::SizeMismatch)
        );

        let snap = shared.counters.snapshot(0);
        assert_eq!(snap.size_mismatches, 1);
        assert_eq!(snap.processing_errors(), 1);
        assert_eq!(snap.processed.frames, 0);
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_oversized_input_gives_frame_size_output() {
        let (sink, frames) = collecting_sink();
        let shared = shared_with(sink, false);
        let mut ctx = cpu_context();

        let geometry = FrameGeometry::new(4, 2);
        let frame = FrameBuffer::from_bytes(vec![3u8; 20]).with_geometry(geometry);
        assert_eq!(process_frame(&mut ctx, frame, &shared), FrameOutcome::Delivered);
        assert_eq!(frames.lock().unwrap()[0].size(), geometry.frame_size());
    }

    #[test]
    fn test_push_failure_is_counted_not_fatal() {
        let sink = |_: FrameBuffer| -> Result<(), PushError> { Err(PushError::Closed) };
        let shared = shared_with(Arc::new(sink), false);
        let mut ctx = cpu_context();

        let frame = FrameBuffer::from_bytes(vec![0u8; 12]).with_geometry(FrameGeometry::new(4, 2));
        assert_eq!(process_frame(&mut ctx, frame, &shared), FrameOutcome::PushFailed);

        let snap = shared.counters.snapshot(0);
        assert_eq!(snap.push_failures, 1);
        assert_eq!(snap.processed.frames, 1);
        assert_eq!(snap.pushed.frames, 0);
    }

    #[test]
    fn test_runtime_without_context_counts_the_drop() {
        let (sink, frames) = collecting_sink();
        let shared = Arc::new(shared_with(sink, false));
        shared.counters.worker_started();
        let mut runtime = WorkerRuntime {
            worker_id: 0,
            context: None,
            slot: Arc::new(WorkerSlot::new()),
            shared: Arc::clone(&shared),
        };

        let frame = FrameBuffer::from_bytes(vec![0u8; 12]).with_geometry(FrameGeometry::new(4, 2));
        assert_eq!(runtime.process(frame), FrameOutcome::Dropped(DropReason::Kernel));
        drop(runtime);

        let snap = shared.counters.snapshot(0);
        assert_eq!(snap.kernel_failures, 1);
        assert_eq!(snap.settled(), 1);
        assert_eq!(snap.live_workers, 0);
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_worker_state_round_trip() {
        for state in [
            WorkerState::Starting,
            WorkerState::Running,
            WorkerState::Draining,
            WorkerState::Stopped,
        ] {
            assert_eq!(WorkerState::from_u8(state as u8), state);
        }
    }
}
