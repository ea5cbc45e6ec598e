//! Compute devices and thread binding.
//!
//! Every device implements [`ComputeDevice`]: it owns image memory
//! ([`ImageHandle`]) and turns a validated [`Program`] into something that
//! can be iterated over an image ([`KernelExec`]).
//!
//! A thread must hold a [`DeviceBinder`] guard while it runs kernels. The
//! guard is exclusive per thread and releases the device when dropped.

mod cpu;
#[cfg(feature = "wgpu")]
mod wgpu_device;

pub use cpu::{CpuDevice, CpuImage};
#[cfg(feature = "wgpu")]
pub use wgpu_device::{WgpuDevice, WgpuImage};

use std::cell::Cell;
use std::sync::Arc;

use crate::image::{Dims, Image, ImageHandle, ImageTarget};
use crate::program::Program;
use crate::{ComputeError, ComputeResult, KernelError};

/// Broad device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

/// A device that can hold images and run kernels.
pub trait ComputeDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    fn kind(&self) -> DeviceKind;

    /// Whether kernels can run here right now.
    fn available(&self) -> bool;

    /// True when device images are host memory and need no transfer.
    fn is_host(&self) -> bool {
        false
    }

    /// Called when a thread binds to this device.
    fn bind(&self) -> ComputeResult<()> {
        Ok(())
    }

    /// Called when the binding guard is dropped.
    fn unbind(&self) {}

    /// Copies a packed host buffer to the device.
    fn upload(&self, data: &[f32], dims: Dims) -> ComputeResult<Box<dyn ImageHandle>>;

    /// Allocates a zeroed image on the device.
    fn allocate(&self, dims: Dims) -> ComputeResult<Box<dyn ImageHandle>>;

    /// Copies a device image back into `out`.
    fn download(&self, handle: &dyn ImageHandle, out: &mut [f32]) -> ComputeResult<()>;

    /// Prepares a validated program for execution on this device.
    fn build(&self, program: &Program) -> Result<Box<dyn KernelExec>, KernelError>;
}

/// A program ready to run on one device.
pub trait KernelExec: Send + Sync {
    /// Runs one invocation per pixel of `dst`.
    fn iterate(&self, src: &Image<'_>, dst: ImageTarget<'_>) -> Result<(), KernelError>;
}

thread_local! {
    static BOUND: Cell<bool> = const { Cell::new(false) };
}

/// True if the calling thread currently holds a [`DeviceBinder`].
pub fn is_thread_bound() -> bool {
    BOUND.with(Cell::get)
}

/// Scoped binding of the calling thread to a device.
///
/// ```
/// use blink_compute::{CpuDevice, DeviceBinder, ComputeError};
///
/// let device = CpuDevice::new();
/// let guard = DeviceBinder::bind(&device).unwrap();
/// assert_eq!(DeviceBinder::bind(&device).err(), Some(ComputeError::AlreadyBound));
/// drop(guard);
/// assert!(DeviceBinder::bind(&device).is_ok());
/// ```
#[must_use = "the device is released as soon as the guard is dropped"]
pub struct DeviceBinder<'a> {
    device: &'a dyn ComputeDevice,
}

impl<'a> DeviceBinder<'a> {
    pub fn bind(device: &'a dyn ComputeDevice) -> ComputeResult<Self> {
        if is_thread_bound() {
            return Err(ComputeError::AlreadyBound);
        }
        device.bind()?;
        BOUND.with(|b| b.set(true));
        tracing::trace!(device = device.name(), "thread bound");
        Ok(Self { device })
    }

    pub fn device(&self) -> &'a dyn ComputeDevice {
        self.device
    }
}

impl Drop for DeviceBinder<'_> {
    fn drop(&mut self) {
        self.device.unbind();
        BOUND.with(|b| b.set(false));
        tracing::trace!(device = self.device.name(), "thread unbound");
    }
}

/// Stand-in for a GPU that is not present.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevice;

impl ComputeDevice for NullDevice {
    fn name(&self) -> &str {
        "none"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Gpu
    }

    fn available(&self) -> bool {
        false
    }

    fn upload(&self, _data: &[f32], _dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        Err(ComputeError::BackendNotAvailable("no GPU device".into()))
    }

    fn allocate(&self, _dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        Err(ComputeError::BackendNotAvailable("no GPU device".into()))
    }

    fn download(&self, _handle: &dyn ImageHandle, _out: &mut [f32]) -> ComputeResult<()> {
        Err(ComputeError::BackendNotAvailable("no GPU device".into()))
    }

    fn build(&self, _program: &Program) -> Result<Box<dyn KernelExec>, KernelError> {
        Err(KernelError::runtime("no GPU device"))
    }
}

/// The CPU compute device and the local GPU, if any.
#[derive(Clone)]
pub struct DeviceSet {
    cpu: Arc<dyn ComputeDevice>,
    gpu: Arc<dyn ComputeDevice>,
}

impl DeviceSet {
    pub fn new(cpu: Arc<dyn ComputeDevice>, gpu: Arc<dyn ComputeDevice>) -> Self {
        Self { cpu, gpu }
    }

    /// CPU device with no GPU.
    pub fn cpu_only() -> Self {
        Self::new(Arc::new(CpuDevice::new()), Arc::new(NullDevice))
    }

    /// CPU device plus the first usable GPU adapter.
    pub fn detect() -> Self {
        #[cfg(feature = "wgpu")]
        {
            match WgpuDevice::new() {
                Ok(gpu) => {
                    tracing::info!(gpu = gpu.name(), "GPU compute device found");
                    return Self::new(Arc::new(CpuDevice::new()), Arc::new(gpu));
                }
                Err(e) => tracing::warn!("GPU compute device unavailable: {e}"),
            }
        }
        Self::cpu_only()
    }

    pub fn cpu(&self) -> &Arc<dyn ComputeDevice> {
        &self.cpu
    }

    pub fn gpu(&self) -> &Arc<dyn ComputeDevice> {
        &self.gpu
    }

    /// The GPU iff requested and available, otherwise the CPU device.
    pub fn select(&self, use_gpu: bool) -> &Arc<dyn ComputeDevice> {
        if use_gpu && self.gpu.available() {
            &self.gpu
        } else {
            &self.cpu
        }
    }

    /// GPU name, if a GPU is available.
    pub fn gpu_name(&self) -> Option<&str> {
        self.gpu.available().then(|| self.gpu.name())
    }
}

impl std::fmt::Debug for DeviceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSet")
            .field("cpu", &self.cpu.name())
            .field("gpu", &self.gpu_name())
            .finish()
    }
}

/// Information about a compute device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub name: String,
    pub available: bool,
    /// Priority for auto-selection (higher = preferred).
    pub priority: u32,
    pub description: &'static str,
}

/// Lists the devices of `set`, preferred first.
pub fn detect_devices(set: &DeviceSet) -> Vec<DeviceInfo> {
    let gpu_available = set.gpu().available();
    let mut devices = vec![
        DeviceInfo {
            kind: DeviceKind::Cpu,
            name: set.cpu().name().to_string(),
            available: set.cpu().available(),
            priority: 10,
            description: "WGSL interpreter with rayon parallelization",
        },
        DeviceInfo {
            kind: DeviceKind::Gpu,
            name: set.gpu().name().to_string(),
            available: gpu_available,
            priority: if gpu_available { 100 } else { 0 },
            description: "GPU compute via wgpu (Vulkan/Metal/DX12)",
        },
    ];
    devices.sort_by(|a, b| b.priority.cmp(&a.priority));
    devices
}

/// One line per device: `[+] name (kind): description`.
pub fn describe_devices(set: &DeviceSet) -> String {
    let mut desc = String::new();
    for info in detect_devices(set) {
        let status = if info.available { "+" } else { "-" };
        desc.push_str(&format!(
            "[{status}] {} ({}): {}\n",
            info.name,
            info.kind.name(),
            info.description
        ));
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binder_is_exclusive_and_scoped() {
        let device = CpuDevice::new();
        assert!(!is_thread_bound());
        {
            let _guard = DeviceBinder::bind(&device).unwrap();
            assert!(is_thread_bound());
            assert!(matches!(
                DeviceBinder::bind(&NullDevice),
                Err(ComputeError::AlreadyBound)
            ));
        }
        assert!(!is_thread_bound());
    }

    #[test]
    fn binding_is_per_thread() {
        let device = CpuDevice::new();
        let _guard = DeviceBinder::bind(&device).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                let _other = DeviceBinder::bind(&device).unwrap();
                assert!(is_thread_bound());
            });
        });
        assert!(is_thread_bound());
    }

    #[test]
    fn select_falls_back_to_cpu() {
        let set = DeviceSet::cpu_only();
        assert_eq!(set.select(true).kind(), DeviceKind::Cpu);
        assert_eq!(set.select(false).kind(), DeviceKind::Cpu);
        assert_eq!(set.gpu_name(), None);
    }

    #[test]
    fn describe_marks_missing_gpu() {
        let text = describe_devices(&DeviceSet::cpu_only());
        assert!(text.starts_with("[+] cpu"));
        assert!(text.contains("[-] none (gpu)"));
    }
}
