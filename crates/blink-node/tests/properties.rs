//! End-to-end behavior of the node: assembly, both render paths, failure
//! handling and device use.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_abs_diff_eq;
use blink_compute::{
    ComputeDevice, ComputeResult, CpuDevice, DeviceKind, DeviceSet, Dims, ImageHandle, KernelError,
    KernelExec, Program,
};
use blink_node::{
    Box2, Channel, ChannelMask, ChannelSet, CollectingSink, ColorConfig, ColorProcessor,
    DualPathExecutor, ExecPath, FailureReporter, ImagePlane, Knobs, MemoryImage, NodeError,
    OcioBlinkNode, Operation, PlaneDescriptor, ShaderTextAssembler, TileScheduler,
};
use blink_ocio::{Config, GpuShaderDesc, ImageDesc, OcioResult, builtin};

/// A GPU-kind device that runs kernels on the CPU and counts every call.
#[derive(Default)]
struct CountingDevice {
    inner: CpuDevice,
    uploads: AtomicUsize,
    allocations: AtomicUsize,
    downloads: AtomicUsize,
    binds: AtomicUsize,
    builds: AtomicUsize,
}

impl CountingDevice {
    fn transfers(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
            + self.allocations.load(Ordering::SeqCst)
            + self.downloads.load(Ordering::SeqCst)
    }
}

impl ComputeDevice for CountingDevice {
    fn name(&self) -> &str {
        "counting-gpu"
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Gpu
    }

    fn available(&self) -> bool {
        true
    }

    fn bind(&self) -> ComputeResult<()> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn upload(&self, data: &[f32], dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(data, dims)
    }

    fn allocate(&self, dims: Dims) -> ComputeResult<Box<dyn ImageHandle>> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate(dims)
    }

    fn download(&self, handle: &dyn ImageHandle, out: &mut [f32]) -> ComputeResult<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.inner.download(handle, out)
    }

    fn build(&self, program: &Program) -> Result<Box<dyn KernelExec>, KernelError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.inner.build(program)
    }
}

/// Processor whose shader text has its closing brace cut off.
struct TruncatedShader(blink_ocio::Processor);

impl ColorProcessor for TruncatedShader {
    fn is_no_op(&self) -> bool {
        self.0.is_no_op()
    }

    fn shader_text(&self, desc: &GpuShaderDesc) -> OcioResult<String> {
        let mut text = self.0.gpu_shader_text(desc)?;
        if let Some(pos) = text.rfind('}') {
            text.truncate(pos);
        }
        Ok(text)
    }

    fn gpu_lut3d(&self, lut: &mut [f32], desc: &GpuShaderDesc) -> OcioResult<()> {
        self.0.gpu_lut3d(lut, desc)
    }

    fn apply(&self, image: &mut ImageDesc<'_>) -> OcioResult<()> {
        self.0.apply(image)
    }
}

struct TruncatingConfig(Config);

impl ColorConfig for TruncatingConfig {
    fn processor(&self, src: &str, dst: &str) -> OcioResult<Arc<dyn ColorProcessor>> {
        Ok(Arc::new(TruncatedShader(self.0.processor(src, dst)?)))
    }
}

fn gradient(bounds: Box2, channels: ChannelSet) -> MemoryImage {
    let n = bounds.area() * channels.len();
    let data = (0..n).map(|i| ((i * 37) % 101) as f32 / 100.0).collect();
    MemoryImage::from_vec(bounds, channels, data).unwrap()
}

fn node_with(
    config: Arc<dyn ColorConfig>,
    devices: DeviceSet,
    knobs: Knobs,
    input: MemoryImage,
) -> (OcioBlinkNode, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let mut node = OcioBlinkNode::new(config, devices, knobs)
        .with_reporter(FailureReporter::new(sink.clone()));
    node.set_input(Arc::new(input));
    (node, sink)
}

fn counting_devices() -> (DeviceSet, Arc<CountingDevice>) {
    let gpu = Arc::new(CountingDevice::default());
    let devices = DeviceSet::new(Arc::new(CpuDevice::new()), gpu.clone());
    (devices, gpu)
}

#[test]
fn no_op_exactly_for_same_space() {
    let config = builtin::nuke_default();
    let spaces: Vec<&str> = config
        .colorspaces()
        .iter()
        .filter(|cs| !cs.is_data())
        .map(|cs| cs.name())
        .collect();
    assert!(spaces.len() >= 5);

    for &src in &spaces {
        for &dst in &spaces {
            let p = ColorConfig::processor(&config, src, dst).unwrap();
            assert_eq!(p.is_no_op(), src == dst, "{src} -> {dst}");
        }
    }
}

#[test]
fn assembly_is_deterministic() {
    let processor = builtin::nuke_default()
        .processor("compositing_log", "scene_linear")
        .unwrap();
    let assembler = ShaderTextAssembler::default();
    let (a, lut_a) = assembler.assemble(&processor).unwrap();
    let (b, lut_b) = assembler.assemble(&processor).unwrap();
    assert_eq!(a.text(), b.text());
    assert_eq!(lut_a, lut_b);
}

#[test]
fn wrapper_calls_the_generated_function_once() {
    let processor = builtin::nuke_default()
        .processor("scene_linear", "compositing_log")
        .unwrap();
    let (program, _) = ShaderTextAssembler::new("to_log", 2)
        .assemble(&processor)
        .unwrap();

    assert_eq!(program.wrapper().matches("to_log(").count(), 1);
    assert!(program.body().contains("fn to_log("));
    assert!(program.text().contains("\n\n// Statically defined:\n"));
}

#[test]
fn no_op_processor_is_identity_and_skips_the_kernel() {
    let config = Config::from_yaml_str(
        "ocio_profile_version: 2\nroles:\n  scene_linear: lin\n  compositing_log: lin\ncolorspaces:\n  - name: lin\n",
        PathBuf::from("."),
    )
    .unwrap();
    let (devices, gpu) = counting_devices();
    let bounds = Box2::from_size(6, 3);
    let input = gradient(bounds, ChannelSet::rgba());
    let (mut node, sink) = node_with(Arc::new(config), devices, Knobs::default(), input.clone());

    assert!(node.validate().unwrap().is_no_op());
    assert_eq!(node.out_channels(), ChannelMask::None);

    let out = TileScheduler::new(2)
        .render(&node, bounds, &ChannelSet::rgba())
        .unwrap();
    assert_eq!(out.data(), input.data());
    assert_eq!(gpu.builds.load(Ordering::SeqCst), 0);
    assert_eq!(gpu.binds.load(Ordering::SeqCst), 0);
    assert!(sink.is_empty());

    // The CPU path with a no-op processor leaves pixels alone too.
    let cycle = node.cycle().unwrap().clone();
    let mut plane = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgb()));
    cycle
        .executor()
        .render_tile(ExecPath::Cpu, &input, &mut plane, false)
        .unwrap();
    assert_eq!(plane.channel_at(4, 2, Channel::Blue), Some(input.get(4, 2, Channel::Blue)));
}

#[test]
fn cpu_and_kernel_paths_agree() {
    let bounds = Box2::new(-2, 5, 17, 12);
    let input = gradient(bounds, ChannelSet::rgba());

    for operation in Operation::ALL {
        let knobs = Knobs {
            operation,
            ..Knobs::default()
        };
        let render = |use_kernel: bool| {
            let (mut node, _) = node_with(
                Arc::new(builtin::nuke_default()),
                DeviceSet::cpu_only(),
                Knobs {
                    use_kernel,
                    ..knobs.clone()
                },
                input.clone(),
            );
            node.validate().unwrap();
            TileScheduler::for_node(&node)
                .render(&node, bounds, &ChannelSet::rgba())
                .unwrap()
        };
        let (cpu, kernel) = (render(false), render(true));
        for (a, b) in cpu.data().iter().zip(kernel.data()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }
}

#[test]
fn mid_gray_log_to_lin_matches() {
    let bounds = Box2::from_size(1, 1);
    let input = MemoryImage::filled(bounds, ChannelSet::rgb(), 0.5);
    let processor = builtin::nuke_default()
        .processor("compositing_log", "scene_linear")
        .unwrap();
    let (program, _) = ShaderTextAssembler::default().assemble(&processor).unwrap();
    let exec = DualPathExecutor::new(Arc::new(processor.clone()), Arc::new(program), DeviceSet::cpu_only());

    let mut expected = [0.5f32; 3];
    processor.apply_rgb(&mut expected);

    for path in [ExecPath::Cpu, ExecPath::Kernel] {
        let mut plane = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgb()));
        exec.render_tile(path, &input, &mut plane, true).unwrap();
        for (got, want) in plane.data().iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-5);
        }
    }
}

#[test]
fn malformed_body_is_a_parse_error() {
    let bounds = Box2::from_size(4, 2);
    let input = gradient(bounds, ChannelSet::rgba());
    let config = Arc::new(TruncatingConfig(builtin::nuke_default()));

    let (mut node, sink) = node_with(config.clone(), DeviceSet::cpu_only(), Knobs::default(), input.clone());
    node.validate().unwrap();
    let mut plane = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgba()));
    match node.render_stripe(&mut plane) {
        Err(NodeError::KernelParse { line, message }) => {
            assert!(line > 0);
            assert!(!message.is_empty());
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert_eq!(sink.len(), 1);
    assert!(sink.messages()[0].starts_with("kernel parse error at line"));

    let knobs = Knobs {
        use_kernel: false,
        ..Knobs::default()
    };
    let (mut cpu_node, cpu_sink) = node_with(config, DeviceSet::cpu_only(), knobs, input);
    cpu_node.validate().unwrap();
    let mut plane = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgba()));
    cpu_node.render_stripe(&mut plane).unwrap();
    assert!(cpu_sink.is_empty());
}

#[test]
fn failed_kernel_render_releases_the_device() {
    let bounds = Box2::from_size(4, 2);
    let input = gradient(bounds, ChannelSet::rgba());
    let processor: Arc<dyn ColorProcessor> = Arc::new(TruncatedShader(
        builtin::nuke_default()
            .processor("compositing_log", "scene_linear")
            .unwrap(),
    ));
    let (program, _) = ShaderTextAssembler::default().assemble(processor.as_ref()).unwrap();
    let (devices, gpu) = counting_devices();
    let exec = DualPathExecutor::new(processor, Arc::new(program), devices);

    for use_gpu in [true, true, false] {
        let mut plane = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgba()));
        let err = exec
            .render_tile(ExecPath::Kernel, &input, &mut plane, use_gpu)
            .unwrap_err();
        assert_eq!(err.kind(), "kernel-parse", "{err}");
        assert!(!blink_compute::is_thread_bound());
    }
    assert_eq!(gpu.binds.load(Ordering::SeqCst), 2);
}

#[test]
fn absent_roles_block_validate() {
    let config = Config::from_yaml_str(
        "ocio_profile_version: 2\ncolorspaces:\n  - name: lin\n",
        PathBuf::from("."),
    )
    .unwrap();
    let bounds = Box2::from_size(2, 2);
    let (mut node, sink) = node_with(
        Arc::new(config),
        DeviceSet::cpu_only(),
        Knobs::default(),
        gradient(bounds, ChannelSet::rgb()),
    );

    let err = node.validate().unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
    assert!(!err.is_tile_scoped());
    assert!(node.cycle().is_none());
    assert_eq!(sink.len(), 1);

    let mut plane = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgb()));
    assert_eq!(node.render_stripe(&mut plane).unwrap_err(), err);
}

#[test]
fn zero_area_tiles_succeed() {
    let (devices, gpu) = counting_devices();
    let input = gradient(Box2::from_size(4, 4), ChannelSet::rgba());
    let (mut node, _) = node_with(Arc::new(builtin::nuke_default()), devices, Knobs::default(), input.clone());
    let cycle = node.validate().unwrap();

    for bounds in [Box2::new(0, 0, 0, 4), Box2::new(1, 2, 3, 2)] {
        for path in [ExecPath::Cpu, ExecPath::Kernel] {
            let mut plane = ImagePlane::new(PlaneDescriptor::packed(bounds, ChannelSet::rgba()));
            cycle
                .executor()
                .render_tile(path, &input, &mut plane, true)
                .unwrap();
        }
    }
    assert_eq!(gpu.transfers(), 0);
    assert_eq!(gpu.binds.load(Ordering::SeqCst), 0);
}

#[test]
fn gpu_disabled_means_no_transfers() {
    let bounds = Box2::from_size(8, 4);
    let input = gradient(bounds, ChannelSet::rgba());

    let render = |use_gpu_if_available: bool| {
        let (devices, gpu) = counting_devices();
        let knobs = Knobs {
            use_gpu_if_available,
            stripe_height: 2,
            ..Knobs::default()
        };
        let (mut node, sink) = node_with(Arc::new(builtin::nuke_default()), devices, knobs, input.clone());
        node.validate().unwrap();
        assert_eq!(node.gpu_name(), "counting-gpu");
        let out = TileScheduler::for_node(&node)
            .render(&node, bounds, &ChannelSet::rgba())
            .unwrap();
        assert!(sink.is_empty(), "{:?}", sink.messages());
        (out, gpu)
    };

    let (cpu_out, idle) = render(false);
    assert_eq!(idle.transfers(), 0);
    assert_eq!(idle.binds.load(Ordering::SeqCst), 0);

    let (gpu_out, busy) = render(true);
    // One upload, one allocation and one download per stripe.
    assert_eq!(busy.uploads.load(Ordering::SeqCst), 2);
    assert_eq!(busy.allocations.load(Ordering::SeqCst), 2);
    assert_eq!(busy.downloads.load(Ordering::SeqCst), 2);
    assert_eq!(busy.binds.load(Ordering::SeqCst), 2);

    for (a, b) in cpu_out.data().iter().zip(gpu_out.data()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
}
