// SPDX-License-Identifier: GPL-3.0-only

//! Software histogram equalization
//!
//! Same contract as the GPU backend: stage the plane into cached working
//! memory, run the kernel, write the result into the caller's plane. Used
//! when no adapter can be opened and as the reference in tests.

use super::cache::DeviceBufferCache;
use super::{Accelerator, KernelContext};
use crate::constants::frame::LUMA_LEVELS;
use crate::errors::AcceleratorError;
use crate::frame::FrameGeometry;
use tracing::debug;

/// Build the equalization lookup table for a plane
///
/// `lut[v] = round((cdf[v] - cdf_min) * 255 / (total - cdf_min))`, rounding
/// half up in integer arithmetic. A constant (or empty) plane maps to itself.
pub fn equalization_lut(plane: &[u8]) -> [u8; LUMA_LEVELS] {
    let mut histogram = [0u64; LUMA_LEVELS];
    for &value in plane {
        histogram[value as usize] += 1;
    }

    let mut lut = [0u8; LUMA_LEVELS];
    let total = plane.len() as u64;
    let cdf_min = histogram.iter().copied().find(|&count| count > 0).unwrap_or(0);
    let denom = total - cdf_min;

    if denom == 0 {
        for (level, entry) in lut.iter_mut().enumerate() {
            *entry = level as u8;
        }
        return lut;
    }

    let mut running = 0u64;
    for (level, entry) in lut.iter_mut().enumerate() {
        running += histogram[level];
        if running < cdf_min {
            continue;
        }
        let num = (running - cdf_min) * 255;
        let (q, r) = (num / denom, num % denom);
        let rounded = if 2 * r >= denom { q + 1 } else { q };
        *entry = rounded.min(255) as u8;
    }
    lut
}

/// Equalize `input` into `output` (both one luma plane)
pub fn equalize_histogram(input: &[u8], output: &mut [u8]) {
    let lut = equalization_lut(input);
    for (dst, &src) in output.iter_mut().zip(input) {
        *dst = lut[src as usize];
    }
}

/// Host CPU "device"
#[derive(Debug, Default)]
pub struct CpuAccelerator;

impl CpuAccelerator {
    pub fn new() -> Self {
        Self
    }
}

impl Accelerator for CpuAccelerator {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_kernel_context(
        &self,
        worker_id: usize,
    ) -> Result<Box<dyn KernelContext>, AcceleratorError> {
        Ok(Box::new(CpuKernel {
            worker_id,
            staging: DeviceBufferCache::new(),
        }))
    }
}

struct CpuKernel {
    worker_id: usize,
    staging: DeviceBufferCache<Vec<u8>>,
}

impl KernelContext for CpuKernel {
    fn ensure_buffers(&mut self, size: usize) -> Result<bool, AcceleratorError> {
        let worker_id = self.worker_id;
        self.staging.ensure(size, |size| {
            let mut buffer = Vec::new();
            buffer
                .try_reserve_exact(size)
                .map_err(|e| AcceleratorError::BufferAllocation {
                    size,
                    reason: e.to_string(),
                })?;
            buffer.resize(size, 0);
            debug!(worker_id, size, "Allocated CPU staging plane");
            Ok(buffer)
        })
    }

    fn run(
        &mut self,
        input: &[u8],
        _geometry: FrameGeometry,
        output: &mut [u8],
    ) -> Result<(), AcceleratorError> {
        let staging = self.staging.get_mut().ok_or_else(|| {
            AcceleratorError::KernelExecution("staging plane not allocated".into())
        })?;
        if staging.len() != input.len() || output.len() != input.len() {
            return Err(AcceleratorError::PlaneSize {
                expected: staging.len(),
                actual: input.len(),
            });
        }

        staging.copy_from_slice(input);
        equalize_histogram(staging, output);
        Ok(())
    }

    fn allocations(&self) -> u64 {
        self.staging.allocations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_level_image_stretches_to_full_range() {
        let input = [50u8, 50, 50, 50, 200, 200, 200, 200];
        let mut output = [0u8; 8];
        equalize_histogram(&input, &mut output);
        assert_eq!(output, [0, 0, 0, 0, 255, 255, 255, 255]);
    }

    #[test]
    fn test_constant_image_unchanged() {
        let input = [77u8; 16];
        let mut output = [0u8; 16];
        equalize_histogram(&input, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_lut_is_monotonic() {
        let input: Vec<u8> = (0..=255u8).cycle().take(1024).map(|v| v / 3 + 10).collect();
        let lut = equalization_lut(&input);
        assert!(lut.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(lut[10], 0);
        assert_eq!(lut[(255 / 3 + 10) as usize], 255);
    }

    #[test]
    fn test_kernel_reuses_staging() {
        let accel = CpuAccelerator::new();
        let mut kernel = accel.create_kernel_context(0).unwrap();
        let geometry = FrameGeometry::new(4, 2);

        assert!(kernel.ensure_buffers(8).unwrap());
        assert!(!kernel.ensure_buffers(8).unwrap());
        assert_eq!(kernel.allocations(), 1);

        let input = [0u8, 0, 0, 0, 10, 10, 10, 10];
        let mut output = [0u8; 8];
        kernel.run(&input, geometry, &mut output).unwrap();
        assert_eq!(output, [0, 0, 0, 0, 255, 255, 255, 255]);
    }
}
