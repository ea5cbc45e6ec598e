//! Image handles passed to kernels.
//!
//! Host memory is borrowed, never copied, until it has to move to another
//! device. `HostImage` and `HostImageMut` wrap the host's packed f32
//! buffers; `Box<dyn ImageHandle>` is memory owned by a device.

use crate::device::ComputeDevice;
use crate::{ComputeError, ComputeResult};

/// Image dimensions: width, height and floats per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl Dims {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Floats in a packed buffer of this shape.
    #[inline]
    pub fn len(&self) -> usize {
        self.pixel_count() * self.channels as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `[width, height, channels, 0]`, the kernel's `dims` uniform.
    #[inline]
    pub fn uniform(&self) -> [u32; 4] {
        [self.width, self.height, self.channels, 0]
    }

    fn check(&self, len: usize) -> ComputeResult<()> {
        if self.channels == 0 {
            return Err(ComputeError::InvalidDimensions(self.width, self.height));
        }
        if len != self.len() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: self.len(),
                actual: len,
            });
        }
        Ok(())
    }
}

/// Image resident in device memory.
pub trait ImageHandle: Send + Sync + AsAny {
    /// Image dimensions.
    fn dims(&self) -> Dims;

    /// Size in bytes of device memory used.
    fn size_bytes(&self) -> u64 {
        self.dims().len() as u64 * 4
    }
}

/// Helper trait for downcasting.
pub trait AsAny: 'static {
    fn as_any(&self) -> &dyn std::any::Any;
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Read-only view of a packed host buffer.
#[derive(Debug, Clone, Copy)]
pub struct HostImage<'a> {
    data: &'a [f32],
    dims: Dims,
}

impl<'a> HostImage<'a> {
    pub fn new(data: &'a [f32], width: u32, height: u32, channels: u32) -> ComputeResult<Self> {
        let dims = Dims::new(width, height, channels);
        dims.check(data.len())?;
        Ok(Self { data, dims })
    }

    #[inline]
    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Makes the image available on `device`, uploading only when the device
    /// does not share host memory.
    pub fn distribute_to(&self, device: &dyn ComputeDevice) -> ComputeResult<Image<'a>> {
        if device.is_host() {
            Ok(Image::Host(*self))
        } else {
            tracing::trace!(device = device.name(), bytes = self.data.len() * 4, "upload");
            Ok(Image::Device(device.upload(self.data, self.dims)?))
        }
    }
}

/// Writable view of a packed host buffer.
#[derive(Debug)]
pub struct HostImageMut<'a> {
    data: &'a mut [f32],
    dims: Dims,
}

impl<'a> HostImageMut<'a> {
    pub fn new(data: &'a mut [f32], width: u32, height: u32, channels: u32) -> ComputeResult<Self> {
        let dims = Dims::new(width, height, channels);
        dims.check(data.len())?;
        Ok(Self { data, dims })
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        self.data
    }

    /// Allocates an image of the same shape on `device`.
    pub fn make_like(&self, device: &dyn ComputeDevice) -> ComputeResult<Box<dyn ImageHandle>> {
        device.allocate(self.dims)
    }

    /// Downloads `handle` from `device` into this buffer.
    pub fn copy_from(
        &mut self,
        device: &dyn ComputeDevice,
        handle: &dyn ImageHandle,
    ) -> ComputeResult<()> {
        if handle.dims() != self.dims {
            return Err(ComputeError::BufferSizeMismatch {
                expected: self.dims.len(),
                actual: handle.dims().len(),
            });
        }
        tracing::trace!(device = device.name(), bytes = self.data.len() * 4, "download");
        device.download(handle, self.data)
    }

    /// Borrows the buffer as a kernel output.
    pub fn as_target(&mut self) -> ImageTarget<'_> {
        ImageTarget::Host {
            data: self.data,
            dims: self.dims,
        }
    }
}

/// Kernel input: host memory or a device handle.
pub enum Image<'a> {
    Host(HostImage<'a>),
    Device(Box<dyn ImageHandle>),
}

impl Image<'_> {
    pub fn dims(&self) -> Dims {
        match self {
            Self::Host(img) => img.dims(),
            Self::Device(handle) => handle.dims(),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host(_))
    }
}

impl std::fmt::Debug for Image<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host(img) => f.debug_tuple("Host").field(&img.dims()).finish(),
            Self::Device(handle) => f.debug_tuple("Device").field(&handle.dims()).finish(),
        }
    }
}

/// Kernel output: host memory or a device handle.
pub enum ImageTarget<'a> {
    Host { data: &'a mut [f32], dims: Dims },
    Device(&'a mut dyn ImageHandle),
}

impl ImageTarget<'_> {
    pub fn dims(&self) -> Dims {
        match self {
            Self::Host { dims, .. } => *dims,
            Self::Device(handle) => handle.dims(),
        }
    }
}
