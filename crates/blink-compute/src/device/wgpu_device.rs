//! wgpu GPU compute device.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::{ComputeDevice, DeviceKind, KernelExec};
use crate::image::{AsAny, Dims, Image, ImageHandle, ImageTarget};
use crate::program::Program;
use crate::{ComputeError, ComputeResult, KernelError};

const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// GPU image handle - a storage buffer of packed f32.
pub struct WgpuImage {
    buffer: wgpu::Buffer,
    dims: Dims,
}

impl AsAny for WgpuImage {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl ImageHandle for WgpuImage {
    fn dims(&self) -> Dims {
        self.dims
    }
}

fn wgpu_image(handle: &dyn ImageHandle) -> ComputeResult<&WgpuImage> {
    handle
        .as_any()
        .downcast_ref::<WgpuImage>()
        .ok_or_else(|| ComputeError::ForeignHandle("wgpu".into()))
}

#[derive(Clone)]
struct Gpu {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    max_workgroups: u32,
}

impl Gpu {
    fn upload(&self, data: &[f32], dims: Dims) -> ComputeResult<WgpuImage> {
        if data.len() != dims.len() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: dims.len(),
                actual: data.len(),
            });
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("kernel_src"),
                contents: bytemuck::cast_slice(data),
                usage: STORAGE_USAGE,
            });
        Ok(WgpuImage { buffer, dims })
    }

    fn allocate(&self, dims: Dims) -> WgpuImage {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_dst"),
            size: dims.len() as u64 * 4,
            usage: STORAGE_USAGE,
            mapped_at_creation: false,
        });
        WgpuImage { buffer, dims }
    }

    fn download(&self, image: &WgpuImage, out: &mut [f32]) -> ComputeResult<()> {
        if out.len() != image.dims.len() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: image.dims.len(),
                actual: out.len(),
            });
        }
        let size = out.len() as u64 * 4;
        if size == 0 {
            return Ok(());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(&image.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| ComputeError::OperationFailed("Map channel closed".into()))?
            .map_err(|e| ComputeError::OperationFailed(format!("Map failed: {e}")))?;

        let data = slice.get_mapped_range();
        out.copy_from_slice(bytemuck::cast_slice(&data));
        drop(data);
        staging.unmap();
        Ok(())
    }
}

/// GPU device backed by the first high-performance wgpu adapter.
pub struct WgpuDevice {
    gpu: Gpu,
    name: String,
}

impl WgpuDevice {
    /// Check if a wgpu adapter is present.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            })
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .is_some()
        })
    }

    pub fn new() -> ComputeResult<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> ComputeResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ComputeError::NoAdapter)?;

        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("blink_compute_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| ComputeError::DeviceCreation(e.to_string()))?;

        let info = adapter.get_info();
        tracing::debug!(
            name = info.name.as_str(),
            backend = ?info.backend,
            "wgpu adapter opened"
        );

        Ok(Self {
            gpu: Gpu {
                device: Arc::new(device),
                queue: Arc::new(queue),
                max_workgroups: limits.max_compute_workgroups_per_dimension,
            },
            name: info.name,
        })
    }
}

impl ComputeDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Gpu
    }

    fn available(&self) -> bool {
        true
    }

    fn upload(&self, data: &[f32], dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        Ok(Box::new(self.gpu.upload(data, dims)?))
    }

    fn allocate(&self, dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        Ok(Box::new(self.gpu.allocate(dims)))
    }

    fn download(&self, handle: &dyn ImageHandle, out: &mut [f32]) -> ComputeResult<()> {
        self.gpu.download(wgpu_image(handle)?, out)
    }

    fn build(&self, program: &Program) -> Result<Box<dyn KernelExec>, KernelError> {
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blink_kernel"),
            source: wgpu::ShaderSource::Wgsl(program.source().into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("blink_kernel_pipeline"),
            layout: None,
            module: &module,
            entry_point: Some(program.entry_point_name()),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(KernelError::Parse {
                line: 1,
                message: err.to_string(),
            });
        }

        Ok(Box::new(WgpuKernel {
            gpu: self.gpu.clone(),
            pipeline,
            workgroup_size: program.workgroup_size().max(1),
        }))
    }
}

struct WgpuKernel {
    gpu: Gpu,
    pipeline: wgpu::ComputePipeline,
    workgroup_size: u32,
}

impl WgpuKernel {
    fn dispatch(&self, src: &WgpuImage, dst: &WgpuImage) -> Result<(), KernelError> {
        let dims = dst.dims;
        let workgroups = (dims.pixel_count() as u64).div_ceil(self.workgroup_size as u64);
        if workgroups > self.gpu.max_workgroups as u64 {
            return Err(KernelError::runtime(format!(
                "{workgroups} workgroups exceed the device limit of {}",
                self.gpu.max_workgroups
            )));
        }

        let device = &self.gpu.device;
        let dims_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("kernel_dims"),
            contents: bytemuck::cast_slice(&dims.uniform()),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let layout = self.pipeline.get_bind_group_layout(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blink_kernel_bind_group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: src.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dst.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dims_buf.as_entire_binding(),
                },
            ],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("blink_kernel_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("blink_kernel_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups as u32, 1, 1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(KernelError::runtime(err.to_string())),
            None => Ok(()),
        }
    }
}

impl KernelExec for WgpuKernel {
    fn iterate(&self, src: &Image<'_>, dst: ImageTarget<'_>) -> Result<(), KernelError> {
        let uploaded;
        let src = match src {
            Image::Device(handle) => wgpu_image(handle.as_ref())?,
            Image::Host(img) => {
                uploaded = self.gpu.upload(img.data(), img.dims())?;
                &uploaded
            }
        };

        match dst {
            ImageTarget::Device(handle) => {
                let dst = handle
                    .as_any()
                    .downcast_ref::<WgpuImage>()
                    .ok_or_else(|| ComputeError::ForeignHandle("wgpu".into()))?;
                self.dispatch(src, dst)
            }
            ImageTarget::Host { data, dims } => {
                let staging = self.gpu.allocate(dims);
                self.dispatch(src, &staging)?;
                Ok(self.gpu.download(&staging, data)?)
            }
        }
    }
}
