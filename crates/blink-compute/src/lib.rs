//! Compute devices for generated per-pixel kernels.
//!
//! A kernel is WGSL source with a fixed binding layout:
//!
//! ```text
//! @group(0) @binding(0) var<storage, read>       src:  array<f32>;
//! @group(0) @binding(1) var<storage, read_write> dst:  array<f32>;
//! @group(0) @binding(2) var<uniform>             dims: vec4<u32>;   // width, height, channels, 0
//! ```
//!
//! and a `@compute` entry point dispatched once per pixel. Source is parsed
//! and validated up front ([`Program`]), so syntax errors surface as
//! [`KernelError::Parse`] with a line number no matter which device runs it.
//!
//! # Architecture
//!
//! ```text
//! Kernel (compile + iterate)
//!     └── ComputeDevice trait
//!             ├── CpuDevice   (naga IR interpreter, rayon)
//!             ├── WgpuDevice  (compute pipelines, feature "wgpu")
//!             └── NullDevice  (no GPU present)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use blink_compute::{CpuDevice, DeviceBinder, HostImage, HostImageMut, Kernel, Codegen};
//!
//! let device = CpuDevice::new();
//! let src = HostImage::new(&input, width, height, 4)?;
//! let mut dst = HostImageMut::new(&mut output, width, height, 4)?;
//!
//! let _bound = DeviceBinder::bind(&device)?;
//! let kernel = Kernel::new(source, &device, Codegen::Default)?;
//! kernel.iterate(&src.distribute_to(&device)?, dst.as_target())?;
//! ```

pub mod device;
pub mod image;
mod interp;
pub mod kernel;
pub mod program;

pub use device::{
    ComputeDevice, CpuDevice, DeviceBinder, DeviceInfo, DeviceKind, DeviceSet, KernelExec,
    NullDevice, describe_devices, detect_devices, is_thread_bound,
};
#[cfg(feature = "wgpu")]
pub use device::WgpuDevice;
pub use image::{AsAny, Dims, HostImage, HostImageMut, Image, ImageHandle, ImageTarget};
pub use kernel::Kernel;
pub use program::{Codegen, Program};

use thiserror::Error;

/// Device and transfer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("no GPU adapter")]
    NoAdapter,

    /// Device present in the set but unusable (e.g. the null GPU).
    #[error("device '{0}' is not available")]
    BackendNotAvailable(String),

    #[error("GPU device request failed: {0}")]
    DeviceCreation(String),

    #[error("expected {expected} floats, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("image size {0}x{1} is out of range")]
    InvalidDimensions(u32, u32),

    #[error("image handle does not belong to device '{0}'")]
    ForeignHandle(String),

    #[error("thread is already bound to a compute device")]
    AlreadyBound,

    #[error("GPU command failed: {0}")]
    OperationFailed(String),
}

pub type ComputeResult<T> = Result<T, ComputeError>;

/// Failure compiling or running a kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Source text was rejected; `line` is 1-based within the full program.
    #[error("line {line}: {message}")]
    Parse { line: u32, message: String },

    /// The kernel faulted while running.
    #[error("{message}")]
    Runtime { message: String },
}

impl KernelError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// The message without location.
    pub fn message(&self) -> &str {
        match self {
            Self::Parse { message, .. } | Self::Runtime { message } => message,
        }
    }
}

impl From<ComputeError> for KernelError {
    fn from(err: ComputeError) -> Self {
        Self::runtime(err.to_string())
    }
}
