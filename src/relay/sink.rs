// SPDX-License-Identifier: GPL-3.0-only

//! Downstream boundary for enhanced frames

use crate::errors::PushError;
use crate::frame::FrameBuffer;

/// Receiver of enhanced frames
///
/// Called concurrently from every worker. Failures are reported through the
/// return value and only ever counted; they never stop a worker.
pub trait FrameSink: Send + Sync {
    fn push(&self, frame: FrameBuffer) -> Result<(), PushError>;
}

impl<F> FrameSink for F
where
    F: Fn(FrameBuffer) -> Result<(), PushError> + Send + Sync,
{
    fn push(&self, frame: FrameBuffer) -> Result<(), PushError> {
        self(frame)
    }
}
