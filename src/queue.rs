// SPDX-License-Identifier: GPL-3.0-only

//! Multi-producer/multi-consumer frame handoff
//!
//! The ingest side pushes without ever blocking; workers pop with a bounded
//! timeout so they can re-check the stop flag while idle. Tallies of pushed,
//! popped and drained items make shutdown accounting checkable.

use crate::frame::FrameBuffer;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Item tallies for a [`WorkQueue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pushed: u64,
    pub popped: u64,
    pub drained: u64,
}

impl QueueStats {
    /// Items pushed but neither popped nor drained yet
    pub fn outstanding(&self) -> u64 {
        self.pushed.saturating_sub(self.popped + self.drained)
    }
}

#[derive(Debug, Default)]
struct Tallies {
    pushed: AtomicU64,
    popped: AtomicU64,
    drained: AtomicU64,
}

/// Unbounded FIFO of frame handles, cheap to clone across threads
#[derive(Clone)]
pub struct WorkQueue {
    sender: Sender<FrameBuffer>,
    receiver: Receiver<FrameBuffer>,
    tallies: Arc<Tallies>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            tallies: Arc::new(Tallies::default()),
        }
    }

    /// Enqueue a frame; never blocks
    pub fn push(&self, frame: FrameBuffer) {
        // Both ends live in self, so the channel can't be disconnected here
        if self.sender.send(frame).is_ok() {
            self.tallies.pushed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wait up to `timeout` for the next frame
    pub fn pop_timeout(&self, timeout: Duration) -> Option<FrameBuffer> {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => {
                self.tallies.popped.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Release every queued frame, returning how many were dropped
    pub fn drain(&self) -> u64 {
        let mut released = 0u64;
        loop {
            match self.receiver.try_recv() {
                Ok(frame) => {
                    drop(frame);
                    released += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if released > 0 {
            self.tallies.drained.fetch_add(released, Ordering::Relaxed);
            debug!(released, "Drained work queue");
        }
        released
    }

    /// Current depth
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.tallies.pushed.load(Ordering::Relaxed),
            popped: self.tallies.popped.load(Ordering::Relaxed),
            drained: self.tallies.drained.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(tag: u8) -> FrameBuffer {
        FrameBuffer::from_bytes(vec![tag; 4])
    }

    #[test]
    fn test_fifo_single_producer() {
        let queue = WorkQueue::new();
        for tag in 0..5 {
            queue.push(frame(tag));
        }
        for tag in 0..5 {
            let popped = queue.pop_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(popped.map().unwrap()[0], tag);
        }
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = WorkQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_drain_releases_references() {
        let queue = WorkQueue::new();
        let data: Arc<[u8]> = Arc::from(vec![0u8; 8]);
        for _ in 0..3 {
            queue.push(FrameBuffer::from_bytes(Arc::clone(&data)));
        }
        assert_eq!(Arc::strong_count(&data), 4);

        assert_eq!(queue.drain(), 3);
        assert_eq!(Arc::strong_count(&data), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_conservation_across_threads() {
        let queue = WorkQueue::new();
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut taken = 0u64;
                while taken < 40 {
                    if queue.pop_timeout(Duration::from_millis(20)).is_some() {
                        taken += 1;
                    }
                }
                taken
            })
        };

        for tag in 0..100u8 {
            queue.push(frame(tag));
        }
        let taken = consumer.join().unwrap();
        queue.drain();

        let stats = queue.stats();
        assert_eq!(stats.pushed, 100);
        assert_eq!(stats.popped, taken);
        assert_eq!(stats.popped + stats.drained, stats.pushed);
        assert_eq!(stats.outstanding(), 0);
    }
}
