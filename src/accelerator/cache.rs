// SPDX-License-Identifier: GPL-3.0-only

//! Size-keyed buffer cache shared by the accelerator backends

use crate::errors::AcceleratorError;

/// Buffers cached against the byte size they were allocated for
///
/// Buffers are reused while the requested size stays the same and
/// reallocated exactly once when it changes. A failed allocation leaves the
/// cache empty so the next frame retries.
#[derive(Debug)]
pub struct DeviceBufferCache<B> {
    size: usize,
    buffers: Option<B>,
    allocations: u64,
}

impl<B> Default for DeviceBufferCache<B> {
    fn default() -> Self {
        Self {
            size: 0,
            buffers: None,
            allocations: 0,
        }
    }
}

impl<B> DeviceBufferCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the cached buffers can't serve `size`
    pub fn needs_update(&self, size: usize) -> bool {
        self.buffers.is_none() || self.size != size
    }

    /// Make sure buffers for `size` exist, allocating with `alloc` if not
    ///
    /// Returns `Ok(true)` when an allocation happened.
    pub fn ensure<F>(&mut self, size: usize, alloc: F) -> Result<bool, AcceleratorError>
    where
        F: FnOnce(usize) -> Result<B, AcceleratorError>,
    {
        if !self.needs_update(size) {
            return Ok(false);
        }

        // Release the old set before asking for a new one
        self.buffers = None;
        self.size = 0;

        let buffers = alloc(size)?;
        self.buffers = Some(buffers);
        self.size = size;
        self.allocations += 1;
        Ok(true)
    }

    pub fn get(&self) -> Option<&B> {
        self.buffers.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut B> {
        self.buffers.as_mut()
    }

    /// Byte size the current buffers were allocated for (0 if none)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of successful (re)allocations so far
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn is_initialized(&self) -> bool {
        self.buffers.is_some()
    }
}

/// Calculate compute shader dispatch size (workgroups needed)
#[inline]
pub fn compute_dispatch_size(dimension: u32, workgroup_size: u32) -> u32 {
    dimension.div_ceil(workgroup_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_for_identical_size() {
        let mut cache = DeviceBufferCache::<Vec<u8>>::new();
        assert!(!cache.is_initialized());

        assert!(cache.ensure(64, |s| Ok(vec![0; s])).unwrap());
        assert!(!cache.ensure(64, |s| Ok(vec![0; s])).unwrap());
        assert_eq!(cache.allocations(), 1);
        assert_eq!(cache.size(), 64);
    }

    #[test]
    fn test_single_reallocation_on_size_change() {
        let mut cache = DeviceBufferCache::<Vec<u8>>::new();
        cache.ensure(64, |s| Ok(vec![0; s])).unwrap();
        assert!(cache.ensure(128, |s| Ok(vec![0; s])).unwrap());
        assert!(!cache.ensure(128, |s| Ok(vec![0; s])).unwrap());
        assert_eq!(cache.allocations(), 2);
        assert_eq!(cache.get().map(Vec::len), Some(128));
    }

    #[test]
    fn test_failed_allocation_leaves_cache_empty() {
        let mut cache = DeviceBufferCache::<Vec<u8>>::new();
        cache.ensure(64, |s| Ok(vec![0; s])).unwrap();

        let err = cache
            .ensure(128, |size| {
                Err(AcceleratorError::BufferAllocation {
                    size,
                    reason: "out of memory".into(),
                })
            })
            .unwrap_err();
        assert!(err.is_allocation());
        assert!(!cache.is_initialized());
        assert_eq!(cache.size(), 0);

        // Next frame retries
        assert!(cache.ensure(128, |s| Ok(vec![0; s])).unwrap());
        assert_eq!(cache.allocations(), 2);
    }

    #[test]
    fn test_compute_dispatch_size() {
        assert_eq!(compute_dispatch_size(640, 16), 40);
        assert_eq!(compute_dispatch_size(641, 16), 41);
        assert_eq!(compute_dispatch_size(16, 16), 1);
        assert_eq!(compute_dispatch_size(1, 256), 1);
    }
}
