// SPDX-License-Identifier: GPL-3.0-only

//! Capture-side boundary: O(1) enqueue of ready frames

use crate::frame::{FrameBuffer, FrameGeometry};
use crate::queue::WorkQueue;
use crate::telemetry::Counters;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, trace};

/// Outcome of handing one frame to the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    /// Frame is in the work queue
    Queued,
    /// Frame was released without queueing (stopping, or no usable geometry)
    Rejected,
}

/// Callback target for the external frame source
///
/// Never blocks and never runs enhancement work. The geometry of the first
/// frame is captured and stamped on every later frame; if it cannot be
/// determined the adapter refuses frames for the rest of the run.
pub struct IngestAdapter {
    queue: WorkQueue,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    geometry: OnceLock<Option<FrameGeometry>>,
    /// Calls that passed the stop check and may still push
    in_flight: AtomicUsize,
}

impl IngestAdapter {
    pub fn new(queue: WorkQueue, counters: Arc<Counters>, stop: Arc<AtomicBool>) -> Self {
        Self {
            queue,
            counters,
            stop,
            geometry: OnceLock::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn on_frame(&self, frame: FrameBuffer) -> IngestStatus {
        // Registered before the stop check so `wait_idle` cannot miss a
        // caller that is about to push
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let status = self.enqueue(frame);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        status
    }

    /// Block until every call that saw the stop flag clear has returned
    ///
    /// After the stop flag is set and this returns, no frame can reach the
    /// queue any more.
    pub fn wait_idle(&self) {
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
    }

    fn enqueue(&self, frame: FrameBuffer) -> IngestStatus {
        if self.stop.load(Ordering::SeqCst) {
            return self.reject(frame);
        }

        let geometry = *self.geometry.get_or_init(|| capture_geometry(frame.geometry()));
        let Some(geometry) = geometry else {
            return self.reject(frame);
        };

        let size = frame.size();
        self.counters.arrived.record(size);
        self.queue.push(frame.with_geometry(geometry));
        trace!(size, depth = self.queue.len(), "Frame queued");
        IngestStatus::Queued
    }

    /// Geometry captured from the first frame, if any
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry.get().copied().flatten()
    }

    /// Whether geometry capture failed for this run
    pub fn is_failed(&self) -> bool {
        matches!(self.geometry.get(), Some(None))
    }

    fn reject(&self, frame: FrameBuffer) -> IngestStatus {
        drop(frame);
        Counters::incr(&self.counters.rejected);
        IngestStatus::Rejected
    }
}

fn capture_geometry(reported: Option<FrameGeometry>) -> Option<FrameGeometry> {
    match reported {
        Some(geometry) => match geometry.validate() {
            Ok(()) => {
                info!(%geometry, frame_size = geometry.frame_size(), "Captured frame geometry");
                Some(geometry)
            }
            Err(e) => {
                error!(error = %e, "Unusable frame geometry, refusing frames for this run");
                None
            }
        },
        None => {
            error!("First frame carried no geometry, refusing frames for this run");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> (IngestAdapter, WorkQueue, Arc<Counters>, Arc<AtomicBool>) {
        let queue = WorkQueue::new();
        let counters = Arc::new(Counters::new());
        let stop = Arc::new(AtomicBool::new(false));
        let adapter = IngestAdapter::new(queue.clone(), Arc::clone(&counters), Arc::clone(&stop));
        (adapter, queue, counters, stop)
    }

    #[test]
    fn test_first_geometry_is_stamped_on_later_frames() {
        let (adapter, queue, counters, _) = adapter();
        let geometry = FrameGeometry::new(4, 2);

        let first = FrameBuffer::from_bytes(vec![0u8; 12]).with_geometry(geometry);
        assert_eq!(adapter.on_frame(first), IngestStatus::Queued);
        // Later frames keep the captured geometry even if they report another
        let second = FrameBuffer::from_bytes(vec![0u8; 6]).with_geometry(FrameGeometry::new(2, 2));
        assert_eq!(adapter.on_frame(second), IngestStatus::Queued);

        assert_eq!(adapter.geometry(), Some(geometry));
        assert_eq!(queue.len(), 2);
        let snapshot = counters.snapshot(0);
        assert_eq!(snapshot.arrived.frames, 2);
        assert_eq!(snapshot.arrived.bytes, 18);

        for _ in 0..2 {
            let frame = queue.pop_timeout(std::time::Duration::from_millis(1)).unwrap();
            assert_eq!(frame.geometry(), Some(geometry));
        }
    }

    #[test]
    fn test_missing_geometry_fails_permanently() {
        let (adapter, queue, counters, _) = adapter();
        assert_eq!(
            adapter.on_frame(FrameBuffer::from_bytes(vec![0u8; 12])),
            IngestStatus::Rejected
        );
        let valid = FrameBuffer::from_bytes(vec![0u8; 12]).with_geometry(FrameGeometry::new(4, 2));
        assert_eq!(adapter.on_frame(valid), IngestStatus::Rejected);

        assert!(adapter.is_failed());
        assert!(queue.is_empty());
        assert_eq!(counters.snapshot(0).rejected, 2);
    }

    #[test]
    fn test_odd_geometry_is_rejected() {
        let (adapter, _, _, _) = adapter();
        let frame = FrameBuffer::from_bytes(vec![0u8; 12]).with_geometry(FrameGeometry::new(3, 2));
        assert_eq!(adapter.on_frame(frame), IngestStatus::Rejected);
        assert!(adapter.is_failed());
    }

    #[test]
    fn test_refuses_after_stop() {
        let (adapter, queue, counters, stop) = adapter();
        stop.store(true, Ordering::SeqCst);
        let frame = FrameBuffer::from_bytes(vec![0u8; 12]).with_geometry(FrameGeometry::new(4, 2));
        assert_eq!(adapter.on_frame(frame), IngestStatus::Rejected);
        assert!(queue.is_empty());
        assert_eq!(counters.snapshot(0).rejected, 1);
        assert_eq!(counters.snapshot(0).arrived.frames, 0);
    }
}
