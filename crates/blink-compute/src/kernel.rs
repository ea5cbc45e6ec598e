//! Compile once, iterate per tile.

use crate::device::{ComputeDevice, KernelExec};
use crate::image::{Image, ImageTarget};
use crate::program::{Codegen, Program};
use crate::KernelError;

/// A program built for one device.
pub struct Kernel {
    program: Program,
    exec: Box<dyn KernelExec>,
    device: String,
}

impl Kernel {
    /// Parses, validates and builds `source` for `device`.
    pub fn new(
        source: &str,
        device: &dyn ComputeDevice,
        codegen: Codegen,
    ) -> Result<Self, KernelError> {
        let program = Program::compile(source, codegen)?;
        Self::from_program(program, device)
    }

    /// Builds an already validated program for `device`.
    pub fn from_program(program: Program, device: &dyn ComputeDevice) -> Result<Self, KernelError> {
        let exec = device.build(&program)?;
        Ok(Self {
            program,
            exec,
            device: device.name().to_string(),
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Name of the device this kernel was built for.
    pub fn device_name(&self) -> &str {
        &self.device
    }

    /// Runs the kernel once per pixel of `dst`.
    ///
    /// `src` and `dst` must have the same shape.
    pub fn iterate(&self, src: &Image<'_>, dst: ImageTarget<'_>) -> Result<(), KernelError> {
        let (src_dims, dst_dims) = (src.dims(), dst.dims());
        if src_dims != dst_dims {
            return Err(KernelError::runtime(format!(
                "input is {}x{}x{}, output is {}x{}x{}",
                src_dims.width,
                src_dims.height,
                src_dims.channels,
                dst_dims.width,
                dst_dims.height,
                dst_dims.channels
            )));
        }
        if dst_dims.is_empty() {
            return Ok(());
        }
        self.exec.iterate(src, dst)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("program", &self.program)
            .field("device", &self.device)
            .finish()
    }
}
