// SPDX-License-Identifier: GPL-3.0-only

//! Accelerator contexts and the enhancement invocation contract
//!
//! Initialization happens in two phases:
//!
//! 1. **Shared**: once per process, before any worker starts. Opens the
//!    device and builds the program. Failure is fatal for the relay.
//! 2. **Worker**: once per worker thread, on that thread. Derives a private
//!    [`KernelContext`] (kernel handles plus a size-keyed buffer cache).
//!    Failure stops only that worker.
//!
//! After phase 1 the shared context is immutable and read by all workers
//! without locking.

pub mod cache;
pub mod cpu;
pub mod gpu;

use crate::errors::AcceleratorError;
use crate::frame::FrameGeometry;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

pub use cache::DeviceBufferCache;
pub use cpu::CpuAccelerator;
pub use gpu::GpuAccelerator;

/// Process-wide accelerator resource: device plus compiled program
pub trait Accelerator: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Derive a private execution context for one worker
    fn create_kernel_context(
        &self,
        worker_id: usize,
    ) -> Result<Box<dyn KernelContext>, AcceleratorError>;
}

/// Per-worker execution context
///
/// Owned by exactly one worker thread for its whole life.
pub trait KernelContext: Send {
    /// Make sure device buffers for a `size`-byte plane exist
    ///
    /// Returns `Ok(true)` when buffers were (re)allocated, `Ok(false)` when
    /// the cached set was reused.
    fn ensure_buffers(&mut self, size: usize) -> Result<bool, AcceleratorError>;

    /// Transfer `input`, run the kernel synchronously, read back into `output`
    fn run(
        &mut self,
        input: &[u8],
        geometry: FrameGeometry,
        output: &mut [u8],
    ) -> Result<(), AcceleratorError>;

    /// Number of device buffer (re)allocations so far
    fn allocations(&self) -> u64;
}

/// Which accelerator implementation to open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// wgpu compute device, required
    Gpu,
    /// Software equalization on the host
    Cpu,
    /// GPU when an adapter opens, CPU otherwise
    #[default]
    Auto,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Gpu => write!(f, "gpu"),
            BackendKind::Cpu => write!(f, "cpu"),
            BackendKind::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(BackendKind::Gpu),
            "cpu" => Ok(BackendKind::Cpu),
            "auto" => Ok(BackendKind::Auto),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Open the shared accelerator for `kind`
pub fn open_backend(kind: BackendKind) -> Result<Arc<dyn Accelerator>, AcceleratorError> {
    match kind {
        BackendKind::Cpu => Ok(Arc::new(CpuAccelerator::new())),
        BackendKind::Gpu => Ok(Arc::new(GpuAccelerator::new()?)),
        BackendKind::Auto => match GpuAccelerator::new() {
            Ok(accel) => Ok(Arc::new(accel)),
            Err(AcceleratorError::NoDevice(reason)) => {
                warn!(%reason, "No GPU adapter, falling back to CPU equalization");
                Ok(Arc::new(CpuAccelerator::new()))
            }
            Err(e) => Err(e),
        },
    }
}

/// A worker's exclusively owned accelerator resources
///
/// Holds a reference to the shared context so the device outlives every
/// worker using it. Dropped on the owning worker's thread.
pub struct WorkerContext {
    worker_id: usize,
    kernel: Box<dyn KernelContext>,
    shared: Arc<dyn Accelerator>,
}

impl WorkerContext {
    pub fn create(shared: &Arc<dyn Accelerator>, worker_id: usize) -> Result<Self, AcceleratorError> {
        let kernel = shared.create_kernel_context(worker_id)?;
        debug!(worker_id, backend = shared.name(), "Worker accelerator context ready");
        Ok(Self {
            worker_id,
            kernel,
            shared: Arc::clone(shared),
        })
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn backend(&self) -> &str {
        self.shared.name()
    }

    /// Device buffer (re)allocations performed by this worker
    pub fn allocations(&self) -> u64 {
        self.kernel.allocations()
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        debug!(
            worker_id = self.worker_id,
            allocations = self.kernel.allocations(),
            "Releasing worker accelerator context"
        );
    }
}

/// Enhance one luma plane into a freshly allocated plane
pub fn apply_enhancement(
    ctx: &mut WorkerContext,
    input_plane: &[u8],
    geometry: FrameGeometry,
) -> Result<Vec<u8>, AcceleratorError> {
    let size = geometry.luma_size();
    let mut output = Vec::new();
    output
        .try_reserve_exact(size)
        .map_err(|e| AcceleratorError::BufferAllocation {
            size,
            reason: e.to_string(),
        })?;
    output.resize(size, 0);
    apply_enhancement_into(ctx, input_plane, geometry, &mut output)?;
    Ok(output)
}

/// Enhance one luma plane into `output`
///
/// Synchronous: transfers the plane, runs the kernel and reads back before
/// returning. Runs entirely on the calling worker's thread.
pub fn apply_enhancement_into(
    ctx: &mut WorkerContext,
    input_plane: &[u8],
    geometry: FrameGeometry,
    output: &mut [u8],
) -> Result<(), AcceleratorError> {
    let expected = geometry.luma_size();
    if input_plane.len() != expected {
        return Err(AcceleratorError::PlaneSize {
            expected,
            actual: input_plane.len(),
        });
    }
    if output.len() != expected {
        return Err(AcceleratorError::PlaneSize {
            expected,
            actual: output.len(),
        });
    }

    if ctx.kernel.ensure_buffers(expected)? {
        debug!(worker_id = ctx.worker_id, size = expected, "Device buffers (re)allocated");
    }
    ctx.kernel.run(input_plane, geometry, output)
}

/// Owns the shared accelerator and hands out worker contexts
#[derive(Default)]
pub struct AcceleratorContextManager {
    shared: OnceLock<Result<Arc<dyn Accelerator>, AcceleratorError>>,
}

impl AcceleratorContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run shared initialization at most once
    ///
    /// Later calls return the recorded outcome without running `factory`.
    pub fn init_shared<F>(&self, factory: F) -> Result<Arc<dyn Accelerator>, AcceleratorError>
    where
        F: FnOnce() -> Result<Arc<dyn Accelerator>, AcceleratorError>,
    {
        self.shared
            .get_or_init(|| {
                let outcome = factory();
                match &outcome {
                    Ok(accel) => info!(backend = accel.name(), "Shared accelerator context ready"),
                    Err(e) => error!(error = %e, "Shared accelerator context failed"),
                }
                outcome
            })
            .clone()
    }

    /// Whether shared initialization ran and succeeded
    pub fn is_initialized(&self) -> bool {
        matches!(self.shared.get(), Some(Ok(_)))
    }

    pub fn shared(&self) -> Option<Arc<dyn Accelerator>> {
        match self.shared.get() {
            Some(Ok(accel)) => Some(Arc::clone(accel)),
            _ => None,
        }
    }

    /// Derive a context for one worker from the shared accelerator
    pub fn init_worker(&self, worker_id: usize) -> Result<WorkerContext, AcceleratorError> {
        let shared = self.shared().ok_or_else(|| {
            AcceleratorError::ContextCreation("shared context not initialized".into())
        })?;
        WorkerContext::create(&shared, worker_id)
    }

    /// Drop the manager's reference to the shared context
    ///
    /// Called last in shutdown, after every worker context is gone.
    pub fn release_shared(&mut self) {
        if let Some(Ok(accel)) = self.shared.take() {
            let others = Arc::strong_count(&accel) - 1;
            if others > 0 {
                warn!(others, "Shared accelerator still referenced at release");
            }
            info!(backend = accel.name(), "Released shared accelerator context");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cpu_factory() -> Result<Arc<dyn Accelerator>, AcceleratorError> {
        Ok(Arc::new(CpuAccelerator::new()))
    }

    #[test]
    fn test_init_shared_runs_once() {
        let calls = AtomicUsize::new(0);
        let manager = AcceleratorContextManager::new();
        for _ in 0..3 {
            manager
                .init_shared(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    cpu_factory()
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.is_initialized());
    }

    #[test]
    fn test_init_shared_records_failure() {
        let manager = AcceleratorContextManager::new();
        let first = manager
            .init_shared(|| Err(AcceleratorError::NoDevice("none".into())))
            .err();
        let second = manager.init_shared(cpu_factory).err();
        assert_eq!(first, second);
        assert!(manager.init_worker(0).is_err());
    }

    #[test]
    fn test_apply_enhancement_checks_plane_size() {
        let manager = AcceleratorContextManager::new();
        manager.init_shared(cpu_factory).unwrap();
        let mut ctx = manager.init_worker(0).unwrap();

        let geometry = FrameGeometry::new(4, 2);
        let err = apply_enhancement(&mut ctx, &[0u8; 7], geometry).unwrap_err();
        assert_eq!(
            err,
            AcceleratorError::PlaneSize {
                expected: 8,
                actual: 7
            }
        );

        let out = apply_enhancement(&mut ctx, &[1, 1, 1, 1, 9, 9, 9, 9], geometry).unwrap();
        assert_eq!(out, vec![0, 0, 0, 0, 255, 255, 255, 255]);
    }

    #[test]
    fn test_buffer_cache_reuse_through_contract() {
        let manager = AcceleratorContextManager::new();
        manager.init_shared(cpu_factory).unwrap();
        let mut ctx = manager.init_worker(3).unwrap();

        let small = FrameGeometry::new(4, 2);
        let large = FrameGeometry::new(8, 4);
        apply_enhancement(&mut ctx, &[5u8; 8], small).unwrap();
        apply_enhancement(&mut ctx, &[6u8; 8], small).unwrap();
        assert_eq!(ctx.allocations(), 1);

        apply_enhancement(&mut ctx, &[7u8; 32], large).unwrap();
        apply_enhancement(&mut ctx, &[8u8; 32], large).unwrap();
        assert_eq!(ctx.allocations(), 2);
    }

    #[test]
    fn test_release_shared() {
        let mut manager = AcceleratorContextManager::new();
        manager.init_shared(cpu_factory).unwrap();
        let ctx = manager.init_worker(0).unwrap();
        drop(ctx);
        manager.release_shared();
        assert!(!manager.is_initialized());
        assert!(manager.shared().is_none());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("GPU".parse::<BackendKind>(), Ok(BackendKind::Gpu));
        assert_eq!("auto".parse::<BackendKind>(), Ok(BackendKind::Auto));
        assert!("opencl".parse::<BackendKind>().is_err());
    }
}
