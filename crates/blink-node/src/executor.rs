//! CPU and kernel execution of one tile.
//!
//! Both paths take the same input plane and leave the transformed pixels in
//! the output plane. The CPU path runs the processor in place on the output's
//! own storage; the kernel path compiles the assembled program and iterates
//! it over every pixel on the selected compute device.

use std::fmt;
use std::sync::Arc;

use blink_compute::{
    Codegen, ComputeDevice, DeviceBinder, DeviceSet, HostImage, HostImageMut, ImageTarget, Kernel,
};
use blink_ocio::{ImageDesc, PackedImageDesc, PlanarImageDesc};

use crate::assembler::GeneratedProgramSource;
use crate::color::ColorProcessor;
use crate::error::{NodeError, NodeResult};
use crate::plane::{ImagePlane, PlaneSource};

/// Which implementation renders a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecPath {
    /// Direct processor application on the host.
    Cpu,
    /// Generated kernel on a compute device.
    Kernel,
}

impl ExecPath {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Kernel => "kernel",
        }
    }
}

/// Renders tiles for one validated cycle.
#[derive(Clone)]
pub struct DualPathExecutor {
    processor: Arc<dyn ColorProcessor>,
    program: Arc<GeneratedProgramSource>,
    devices: DeviceSet,
}

impl fmt::Debug for DualPathExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualPathExecutor")
            .field("function", &self.program.function_name())
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl DualPathExecutor {
    pub fn new(
        processor: Arc<dyn ColorProcessor>,
        program: Arc<GeneratedProgramSource>,
        devices: DeviceSet,
    ) -> Self {
        Self {
            processor,
            program,
            devices,
        }
    }

    pub fn program(&self) -> &GeneratedProgramSource {
        &self.program
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// Transforms `input` into `output` over the output's bounds and channels.
    pub fn render_tile(
        &self,
        path: ExecPath,
        input: &dyn PlaneSource,
        output: &mut ImagePlane,
        use_gpu_if_available: bool,
    ) -> NodeResult<()> {
        if output.bounds().is_empty() {
            return Ok(());
        }
        check_components(output)?;

        match path {
            ExecPath::Cpu => self.render_cpu(input, output),
            ExecPath::Kernel => self.render_kernel(input, output, use_gpu_if_available),
        }
    }

    fn render_cpu(&self, input: &dyn PlaneSource, output: &mut ImagePlane) -> NodeResult<()> {
        input.fetch_plane(output)?;
        output.make_unique();
        output.make_writable();

        let bounds = output.bounds();
        let (w, h) = (bounds.width() as usize, bounds.height() as usize);
        let n_comps = output.n_comps();
        let packed = output.packed();
        let data = output.data_mut()?;

        let mut desc = if packed {
            PackedImageDesc::new(data, w, h, n_comps).map(ImageDesc::from)
        } else {
            let (r, rest) = data.split_at_mut(w * h);
            let (g, rest) = rest.split_at_mut(w * h);
            let b = &mut rest[..w * h];
            PlanarImageDesc::new(r, g, b, w, h).map(ImageDesc::from)
        }
        .map_err(|e| NodeError::Execution(e.to_string()))?;

        self.processor
            .apply(&mut desc)
            .map_err(|e| NodeError::Execution(e.to_string()))
    }

    fn render_kernel(
        &self,
        input: &dyn PlaneSource,
        output: &mut ImagePlane,
        use_gpu_if_available: bool,
    ) -> NodeResult<()> {
        let mut src_plane = ImagePlane::new(output.desc().clone());
        input.fetch_plane(&mut src_plane)?;
        if src_plane.n_comps() != output.n_comps() {
            return Err(NodeError::Execution(format!(
                "input has {} components per pixel, output has {}",
                src_plane.n_comps(),
                output.n_comps()
            )));
        }
        output.make_writable();

        if !output.packed() {
            return Err(NodeError::TileAdaptation(
                "kernel path needs packed planes, output is planar".into(),
            ));
        }
        let bounds = output.bounds();
        let (w, h, c) = (bounds.width(), bounds.height(), output.n_comps() as u32);
        let src = HostImage::new(src_plane.data(), w, h, c)
            .map_err(|e| NodeError::TileAdaptation(format!("input: {e}")))?;
        let data = output
            .data_mut()
            .map_err(|e| NodeError::TileAdaptation(format!("output: {e}")))?;
        let mut dst = HostImageMut::new(data, w, h, c)
            .map_err(|e| NodeError::TileAdaptation(format!("output: {e}")))?;

        let device: &dyn ComputeDevice = self.devices.select(use_gpu_if_available).as_ref();
        tracing::trace!(device = device.name(), tile = %bounds, "kernel tile");

        let src = src.distribute_to(device)?;
        let _bound = DeviceBinder::bind(device)?;
        let mut staging = if device.is_host() {
            None
        } else {
            Some(dst.make_like(device)?)
        };

        let kernel = Kernel::new(self.program.text(), device, Codegen::Default)?;
        match staging.as_mut() {
            None => kernel.iterate(&src, dst.as_target())?,
            Some(handle) => {
                kernel.iterate(&src, ImageTarget::Device(handle.as_mut()))?;
                dst.copy_from(device, handle.as_ref())?;
            }
        }
        Ok(())
    }
}

fn check_components(plane: &ImagePlane) -> NodeResult<()> {
    let n_comps = plane.n_comps();
    if n_comps < 3 || n_comps < plane.channels().len() {
        return Err(NodeError::Execution(format!(
            "{} channels in {n_comps} components per pixel; need at least 3 components",
            plane.channels().len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ShaderTextAssembler;
    use crate::plane::{Box2, ChannelSet, MemoryImage, PlaneDescriptor};
    use approx::assert_abs_diff_eq;
    use blink_ocio::builtin;

    fn executor() -> DualPathExecutor {
        let processor = builtin::nuke_default()
            .processor("compositing_log", "scene_linear")
            .unwrap();
        let (program, _) = ShaderTextAssembler::default().assemble(&processor).unwrap();
        DualPathExecutor::new(Arc::new(processor), Arc::new(program), DeviceSet::cpu_only())
    }

    fn gradient(bounds: Box2) -> MemoryImage {
        let channels = ChannelSet::rgba();
        let n = bounds.area() * 4;
        let data = (0..n).map(|i| (i % 97) as f32 / 96.0).collect();
        MemoryImage::from_vec(bounds, channels, data).unwrap()
    }

    #[test]
    fn paths_agree_on_packed_tile() {
        let exec = executor();
        let bounds = Box2::new(0, 0, 9, 5);
        let image = gradient(bounds);

        let desc = PlaneDescriptor::packed(bounds, ChannelSet::rgba());
        let mut cpu = ImagePlane::new(desc.clone());
        let mut gpu = ImagePlane::new(desc);
        exec.render_tile(ExecPath::Cpu, &image, &mut cpu, false).unwrap();
        exec.render_tile(ExecPath::Kernel, &image, &mut gpu, false).unwrap();

        for (a, b) in cpu.data().iter().zip(gpu.data()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
        // Alpha passes through.
        assert_eq!(cpu.at(3, 2, 3), Some(image.get(3, 2, crate::Channel::Alpha)));
    }

    #[test]
    fn cpu_path_leaves_source_untouched() {
        let exec = executor();
        let image = gradient(Box2::from_size(4, 4));
        let before = image.data().to_vec();
        let mut plane = ImagePlane::new(image.descriptor().clone());
        exec.render_tile(ExecPath::Cpu, &image, &mut plane, false).unwrap();
        assert_eq!(image.data(), before.as_slice());
        assert_ne!(plane.data(), before.as_slice());
    }

    #[test]
    fn planar_tiles() {
        let exec = executor();
        let bounds = Box2::from_size(3, 2);
        let image = gradient(bounds);

        let desc = PlaneDescriptor::planar(bounds, ChannelSet::rgba());
        let mut cpu = ImagePlane::new(desc.clone());
        exec.render_tile(ExecPath::Cpu, &image, &mut cpu, false).unwrap();

        let mut packed = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgba()));
        exec.render_tile(ExecPath::Cpu, &image, &mut packed, false).unwrap();
        assert_eq!(cpu.at(2, 1, 1), packed.at(2, 1, 1));

        let mut kernel = ImagePlane::new(desc);
        let err = exec
            .render_tile(ExecPath::Kernel, &image, &mut kernel, false)
            .unwrap_err();
        assert_eq!(err.kind(), "tile-adaptation");
    }

    #[test]
    fn too_few_components() {
        let exec = executor();
        let image = gradient(Box2::from_size(2, 2));
        let channels: ChannelSet = [crate::Channel::Red, crate::Channel::Green].into_iter().collect();
        let mut plane = ImagePlane::new(PlaneDescriptor::packed(Box2::from_size(2, 2), channels));
        for path in [ExecPath::Cpu, ExecPath::Kernel] {
            let err = exec.render_tile(path, &image, &mut plane, false).unwrap_err();
            assert_eq!(err.kind(), "execution");
        }
    }

    #[test]
    fn extra_components_are_copied_by_kernel() {
        let exec = executor();
        let bounds = Box2::from_size(2, 2);
        let channels: ChannelSet = ChannelSet::rgba()
            .iter()
            .chain([crate::Channel::Depth, crate::Channel::Other(7)])
            .collect();
        let data = (0..bounds.area() * 6).map(|i| i as f32 * 0.01).collect();
        let image = MemoryImage::from_vec(bounds, channels.clone(), data).unwrap();

        let desc = PlaneDescriptor::packed(bounds, channels);
        let mut cpu = ImagePlane::new(desc.clone());
        let mut kernel = ImagePlane::new(desc);
        exec.render_tile(ExecPath::Cpu, &image, &mut cpu, false).unwrap();
        exec.render_tile(ExecPath::Kernel, &image, &mut kernel, false).unwrap();
        assert_eq!(kernel.at(1, 1, 4), Some(image.get(1, 1, crate::Channel::Depth)));
        assert_eq!(kernel.at(1, 1, 5), cpu.at(1, 1, 5));
    }
}
