// SPDX-License-Identifier: GPL-3.0-only

//! wgpu compute backend
//!
//! The shared context owns the device, the compiled equalization module and
//! the pipeline layout. Each worker derives its own pipelines (kernel
//! handles), command encoders and a size-keyed buffer set from it.
//!
//! wgpu exposes a single queue per device; workers share it for submission
//! while keeping every other resource private.

use super::cache::{DeviceBufferCache, compute_dispatch_size};
use super::{Accelerator, KernelContext};
use crate::constants::frame::LUMA_LEVELS;
use crate::errors::AcceleratorError;
use crate::frame::FrameGeometry;
use crate::gpu::{self, GpuDeviceInfo, wgpu};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) const EQUALIZE_SHADER: &str = include_str!("equalize.wgsl");

const WORKGROUP_SIZE: u32 = 256;
const BIN_BYTES: u64 = (LUMA_LEVELS * std::mem::size_of::<u32>()) as u64;

/// Largest plane whose `count * 255` still fits the kernel's u32 arithmetic
pub const MAX_PIXELS: usize = (u32::MAX / 255) as usize;

/// Parameters uniform
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    width: u32,
    height: u32,
    pixel_count: u32,
    word_count: u32,
}

/// Run `f` inside validation and out-of-memory error scopes
fn scoped<T>(
    device: &wgpu::Device,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    (value, validation.or(oom))
}

/// Shared GPU context: device plus compiled program
pub struct GpuAccelerator {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

impl GpuAccelerator {
    /// Open a device and build the equalization program
    pub fn new() -> Result<Self, AcceleratorError> {
        let (device, queue, info) =
            pollster::block_on(gpu::create_compute_device("luma_relay_accelerator"))
                .map_err(AcceleratorError::NoDevice)?;

        info!(
            adapter_name = %info.adapter_name,
            adapter_backend = ?info.backend,
            "GPU device created for luma equalization"
        );

        let ((module, bind_group_layout, pipeline_layout), error) =
            scoped(&device, || build_program(&device));
        if let Some(e) = error {
            return Err(AcceleratorError::ProgramBuild(e.to_string()));
        }

        // Build the entry points once so a broken program fails startup
        let (_, error) = scoped(&device, || {
            KernelPipelines::create(&device, &module, &pipeline_layout, "probe")
        });
        if let Some(e) = error {
            return Err(AcceleratorError::ProgramBuild(e.to_string()));
        }

        Ok(Self {
            device,
            queue,
            info,
            module,
            bind_group_layout,
            pipeline_layout,
        })
    }

    pub fn info(&self) -> &GpuDeviceInfo {
        &self.info
    }
}

fn build_program(
    device: &wgpu::Device,
) -> (wgpu::ShaderModule, wgpu::BindGroupLayout, wgpu::PipelineLayout) {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("equalize_shader"),
        source: wgpu::ShaderSource::Wgsl(EQUALIZE_SHADER.into()),
    });

    let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("equalize_bind_group_layout"),
        entries: &[
            // Input luma words
            storage(0, true),
            // Output luma words
            storage(1, false),
            // Histogram bins (256 atomic u32)
            storage(2, false),
            // Lookup table
            storage(3, false),
            wgpu::BindGroupLayoutEntry {
                binding: 4,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("equalize_pipeline_layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    (module, bind_group_layout, pipeline_layout)
}

struct KernelPipelines {
    histogram: wgpu::ComputePipeline,
    lut: wgpu::ComputePipeline,
    apply: wgpu::ComputePipeline,
}

impl KernelPipelines {
    fn create(
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        layout: &wgpu::PipelineLayout,
        label: &str,
    ) -> Self {
        let pipeline = |entry_point: &str| {
            let name = format!("{}_{}", label, entry_point);
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name.as_str()),
                layout: Some(layout),
                module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Self {
            histogram: pipeline("histogram_pass"),
            lut: pipeline("lut_pass"),
            apply: pipeline("apply_pass"),
        }
    }
}

impl Accelerator for GpuAccelerator {
    fn name(&self) -> &str {
        "gpu"
    }

    fn create_kernel_context(
        &self,
        worker_id: usize,
    ) -> Result<Box<dyn KernelContext>, AcceleratorError> {
        let device = &self.device;
        let label = format!("worker{}", worker_id);

        let ((pipelines, histogram_buffer, lut_buffer, uniform_buffer), error) = scoped(device, || {
            let pipelines =
                KernelPipelines::create(device, &self.module, &self.pipeline_layout, &label);

            let histogram_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("equalize_histogram_buffer"),
                size: BIN_BYTES,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let lut_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("equalize_lut_buffer"),
                size: BIN_BYTES,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            });
            let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("equalize_uniform_buffer"),
                size: std::mem::size_of::<Params>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            (pipelines, histogram_buffer, lut_buffer, uniform_buffer)
        });
        if let Some(e) = error {
            return Err(AcceleratorError::ContextCreation(e.to_string()));
        }

        debug!(worker_id, "Created GPU kernel context");

        Ok(Box::new(GpuKernel {
            worker_id,
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
            bind_group_layout: self.bind_group_layout.clone(),
            pipelines,
            histogram_buffer,
            lut_buffer,
            uniform_buffer,
            planes: DeviceBufferCache::new(),
        }))
    }
}

/// Size-dependent device buffers for one plane size
struct PlaneBuffers {
    input: wgpu::Buffer,
    output: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    word_count: u32,
}

struct GpuKernel {
    worker_id: usize,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: KernelPipelines,
    histogram_buffer: wgpu::Buffer,
    lut_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    planes: DeviceBufferCache<PlaneBuffers>,
}

fn allocate_planes(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    histogram: &wgpu::Buffer,
    lut: &wgpu::Buffer,
    uniform: &wgpu::Buffer,
    worker_id: usize,
    size: usize,
) -> Result<PlaneBuffers, AcceleratorError> {
    if size == 0 || size > MAX_PIXELS {
        return Err(AcceleratorError::BufferAllocation {
            size,
            reason: format!("plane must be 1..={} bytes", MAX_PIXELS),
        });
    }

    let word_count = (size as u32).div_ceil(4);
    let bytes = word_count as u64 * 4;

    let (buffers, error) = scoped(device, || {
        let input = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("equalize_input_buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("equalize_output_buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("equalize_staging_buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("equalize_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: histogram.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: lut.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: uniform.as_entire_binding(),
                },
            ],
        });

        PlaneBuffers {
            input,
            output,
            staging,
            bind_group,
            word_count,
        }
    });

    if let Some(e) = error {
        return Err(AcceleratorError::BufferAllocation {
            size,
            reason: e.to_string(),
        });
    }

    debug!(worker_id, size, word_count, "Allocated GPU plane buffers");
    Ok(buffers)
}

impl KernelContext for GpuKernel {
    fn ensure_buffers(&mut self, size: usize) -> Result<bool, AcceleratorError> {
        let device = &self.device;
        let layout = &self.bind_group_layout;
        let (histogram, lut, uniform) = (&self.histogram_buffer, &self.lut_buffer, &self.uniform_buffer);
        let worker_id = self.worker_id;

        self.planes.ensure(size, |size| {
            allocate_planes(device, layout, histogram, lut, uniform, worker_id, size)
        })
    }

    fn run(
        &mut self,
        input: &[u8],
        geometry: FrameGeometry,
        output: &mut [u8],
    ) -> Result<(), AcceleratorError> {
        let planes = self.planes.get().ok_or_else(|| {
            AcceleratorError::KernelExecution("plane buffers not allocated".into())
        })?;
        if input.len() != self.planes.size() || output.len() != input.len() {
            return Err(AcceleratorError::PlaneSize {
                expected: self.planes.size(),
                actual: input.len(),
            });
        }

        let params = Params {
            width: geometry.width,
            height: geometry.height,
            pixel_count: input.len() as u32,
            word_count: planes.word_count,
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));
        self.queue
            .write_buffer(&self.histogram_buffer, 0, &[0u8; BIN_BYTES as usize]);
        upload_plane(&self.queue, &planes.input, input);

        let workgroups = compute_dispatch_size(planes.word_count, WORKGROUP_SIZE);

        let (_, error) = scoped(&self.device, || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("equalize_encoder"),
                });

            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("histogram_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipelines.histogram);
                pass.set_bind_group(0, &planes.bind_group, &[]);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("lut_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipelines.lut);
                pass.set_bind_group(0, &planes.bind_group, &[]);
                pass.dispatch_workgroups(1, 1, 1);
            }
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("apply_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipelines.apply);
                pass.set_bind_group(0, &planes.bind_group, &[]);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }

            encoder.copy_buffer_to_buffer(
                &planes.output,
                0,
                &planes.staging,
                0,
                planes.word_count as u64 * 4,
            );

            self.queue.submit(std::iter::once(encoder.finish()));
        });
        if let Some(e) = error {
            return Err(AcceleratorError::KernelExecution(e.to_string()));
        }

        pollster::block_on(gpu::read_buffer_into(&self.device, &planes.staging, output))
            .map_err(AcceleratorError::Readback)
    }

    fn allocations(&self) -> u64 {
        self.planes.allocations()
    }
}

/// Write a plane into a word buffer, padding the trailing partial word
fn upload_plane(queue: &wgpu::Queue, buffer: &wgpu::Buffer, plane: &[u8]) {
    let aligned = plane.len() & !3;
    if aligned > 0 {
        queue.write_buffer(buffer, 0, &plane[..aligned]);
    }
    if aligned < plane.len() {
        let mut tail = [0u8; 4];
        tail[..plane.len() - aligned].copy_from_slice(&plane[aligned..]);
        queue.write_buffer(buffer, aligned as u64, &tail);
    }
}
