//! CPU compute device.
//!
//! Images live in host memory, so host buffers are used in place and never
//! copied. Kernels run through the WGSL interpreter in [`crate::interp`],
//! one invocation per pixel, spread over the rayon pool.

use super::{ComputeDevice, DeviceKind, KernelExec};
use crate::image::{AsAny, Dims, Image, ImageHandle, ImageTarget};
use crate::interp;
use crate::program::{Codegen, Program};
use crate::{ComputeError, ComputeResult, KernelError};

/// CPU image handle - data stored in RAM.
pub struct CpuImage {
    data: Vec<f32>,
    dims: Dims,
}

impl CpuImage {
    pub fn new(data: Vec<f32>, dims: Dims) -> Self {
        Self { data, dims }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

impl AsAny for CpuImage {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl ImageHandle for CpuImage {
    fn dims(&self) -> Dims {
        self.dims
    }
}

/// Host-resident compute device.
#[derive(Debug, Clone, Default)]
pub struct CpuDevice {
    _private: (),
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cpu_image(handle: &dyn ImageHandle) -> ComputeResult<&CpuImage> {
    handle
        .as_any()
        .downcast_ref::<CpuImage>()
        .ok_or_else(|| ComputeError::ForeignHandle("cpu".into()))
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn available(&self) -> bool {
        true
    }

    fn is_host(&self) -> bool {
        true
    }

    fn upload(&self, data: &[f32], dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        if data.len() != dims.len() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: dims.len(),
                actual: data.len(),
            });
        }
        Ok(Box::new(CpuImage::new(data.to_vec(), dims)))
    }

    fn allocate(&self, dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        Ok(Box::new(CpuImage::new(vec![0.0; dims.len()], dims)))
    }

    fn download(&self, handle: &dyn ImageHandle, out: &mut [f32]) -> ComputeResult<()> {
        let image = cpu_image(handle)?;
        if out.len() != image.data.len() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: image.data.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(&image.data);
        Ok(())
    }

    fn build(&self, program: &Program) -> Result<Box<dyn KernelExec>, KernelError> {
        Ok(Box::new(CpuKernel {
            program: program.clone(),
        }))
    }
}

struct CpuKernel {
    program: Program,
}

impl KernelExec for CpuKernel {
    fn iterate(&self, src: &Image<'_>, dst: ImageTarget<'_>) -> Result<(), KernelError> {
        let src_data = match src {
            Image::Host(img) => img.data(),
            Image::Device(handle) => cpu_image(handle.as_ref())?.data(),
        };
        let (dst_data, dims) = match dst {
            ImageTarget::Host { data, dims } => (data, dims),
            ImageTarget::Device(handle) => {
                let dims = handle.dims();
                let image = handle
                    .as_any_mut()
                    .downcast_mut::<CpuImage>()
                    .ok_or_else(|| ComputeError::ForeignHandle("cpu".into()))?;
                (image.data_mut(), dims)
            }
        };

        // Nested pool work would let this thread steal another bound job.
        let parallel = self.program.codegen() == Codegen::Default
            && rayon::current_thread_index().is_none();
        interp::run(&self.program, src_data, dst_data, dims, parallel)
    }
}
