// SPDX-License-Identifier: GPL-3.0-only

//! Frame buffers and the 4:2:0 planar layout
//!
//! A [`FrameBuffer`] is a cheap-to-clone, reference-counted handle over raw
//! NV12-style pixel data: one luma plane of `width * height` bytes followed
//! by an interleaved chroma region of `width * height / 2` bytes.
//!
//! Buffers either own their bytes on the heap (`Arc<[u8]>`) or wrap a
//! GStreamer buffer directly, so frames coming off an appsink are queued
//! without copying.

use crate::errors::FrameError;
use gstreamer::buffer::Readable;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Width and height of a 4:2:0 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check the geometry can describe a 4:2:0 frame (non-zero, even)
    pub fn validate(&self) -> Result<(), FrameError> {
        let valid = self.width > 0
            && self.height > 0
            && self.width % 2 == 0
            && self.height % 2 == 0;
        if valid {
            Ok(())
        } else {
            Err(FrameError::InvalidGeometry {
                width: self.width,
                height: self.height,
            })
        }
    }

    /// Bytes in the luma plane
    pub fn luma_size(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes in the chroma region
    pub fn chroma_size(&self) -> usize {
        self.luma_size() / 2
    }

    /// Minimum total bytes of a frame with this geometry
    pub fn frame_size(&self) -> usize {
        self.luma_size() + self.chroma_size()
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Debug)]
enum Storage {
    Heap(Arc<[u8]>),
    Gst(gstreamer::Buffer),
}

/// Shared-ownership handle to one frame
///
/// Cloning bumps a reference count; the pixel data is released when the last
/// handle is dropped.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    storage: Storage,
    pts: Option<Duration>,
    duration: Option<Duration>,
    geometry: Option<FrameGeometry>,
}

impl FrameBuffer {
    /// Wrap heap bytes
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            storage: Storage::Heap(data.into()),
            pts: None,
            duration: None,
            geometry: None,
        }
    }

    /// Wrap a GStreamer buffer, carrying its timestamps
    pub fn from_gst(buffer: gstreamer::Buffer) -> Self {
        let pts = buffer.pts().map(|t| Duration::from_nanos(t.nseconds()));
        let duration = buffer.duration().map(|t| Duration::from_nanos(t.nseconds()));
        Self {
            storage: Storage::Gst(buffer),
            pts,
            duration,
            geometry: None,
        }
    }

    /// Attach the geometry reported by the source
    pub fn with_geometry(mut self, geometry: FrameGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Attach presentation timestamp and duration
    pub fn with_timestamps(mut self, pts: Option<Duration>, duration: Option<Duration>) -> Self {
        self.pts = pts;
        self.duration = duration;
        self
    }

    /// Total size in bytes
    pub fn size(&self) -> usize {
        match &self.storage {
            Storage::Heap(data) => data.len(),
            Storage::Gst(buffer) => buffer.size(),
        }
    }

    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    pub fn pts(&self) -> Option<Duration> {
        self.pts
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Map the frame for reading
    pub fn map(&self) -> Result<FrameMap<'_>, FrameError> {
        match &self.storage {
            Storage::Heap(data) => Ok(FrameMap::Heap(data)),
            Storage::Gst(buffer) => buffer
                .map_readable()
                .map(FrameMap::Gst)
                .map_err(|e| FrameError::Map(e.to_string())),
        }
    }

    /// Convert into a GStreamer buffer for an appsrc
    ///
    /// Heap frames are wrapped without copying; timestamps are set only when
    /// the frame carries them, otherwise left unset for the downstream stage.
    pub fn into_gst_buffer(self) -> gstreamer::Buffer {
        let mut buffer = match self.storage {
            Storage::Heap(data) => gstreamer::Buffer::from_slice(data),
            Storage::Gst(buffer) => buffer,
        };

        let buffer_ref = buffer.make_mut();
        buffer_ref.set_pts(self.pts.map(duration_to_clock_time));
        buffer_ref.set_dts(gstreamer::ClockTime::NONE);
        buffer_ref.set_duration(self.duration.map(duration_to_clock_time));

        buffer
    }
}

fn duration_to_clock_time(duration: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

/// Read view of a mapped frame
pub enum FrameMap<'a> {
    Heap(&'a [u8]),
    Gst(gstreamer::BufferMap<'a, Readable>),
}

impl Deref for FrameMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FrameMap::Heap(data) => data,
            FrameMap::Gst(map) => map.as_slice(),
        }
    }
}
