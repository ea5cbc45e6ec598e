//! Benchmarks for the OCIO Blink node.
//!
//! Run with: `cargo bench -p blink-bench`

use std::hint::black_box;
use std::sync::Arc;

use blink_compute::{Codegen, CpuDevice, DeviceSet, Kernel, Program};
use blink_node::{
    Box2, ChannelSet, DualPathExecutor, ExecPath, ImagePlane, Knobs, MemoryImage, OcioBlinkNode,
    PlaneDescriptor, PlaneSource, ShaderTextAssembler, TileScheduler,
};
use blink_ocio::builtin;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

/// RGBA image with values spread over `[0, 1)`.
fn gradient(width: u32, height: u32) -> MemoryImage {
    let bounds = Box2::from_size(width, height);
    let data = (0..bounds.area() * 4)
        .map(|i| ((i * 7919) % 1024) as f32 / 1024.0)
        .collect();
    MemoryImage::from_vec(bounds, ChannelSet::rgba(), data).unwrap()
}

fn log_to_lin() -> blink_ocio::Processor {
    builtin::nuke_default()
        .processor("compositing_log", "scene_linear")
        .unwrap()
}

/// One tile through each path.
fn bench_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile");
    let processor = log_to_lin();
    let (program, _) = ShaderTextAssembler::default().assemble(&processor).unwrap();
    let exec = DualPathExecutor::new(Arc::new(processor), Arc::new(program), DeviceSet::cpu_only());

    for size in [16u32, 64, 256] {
        let image = gradient(size, size);
        let desc = PlaneDescriptor::packed(image.bounds(), ChannelSet::rgba());
        group.throughput(Throughput::Elements((size * size) as u64));

        for path in [ExecPath::Cpu, ExecPath::Kernel] {
            group.bench_with_input(BenchmarkId::new(path.name(), size), &image, |b, img| {
                b.iter(|| {
                    let mut plane = ImagePlane::new(desc.clone());
                    exec.render_tile(path, img, &mut plane, false).unwrap();
                    black_box(plane)
                })
            });
        }
    }

    group.finish();
}

/// Whole frames through the stripe driver at several stripe heights.
fn bench_stripes(c: &mut Criterion) {
    let mut group = c.benchmark_group("stripes");
    let image = Arc::new(gradient(256, 128));
    let bounds = image.bounds();
    group.throughput(Throughput::Elements(bounds.area() as u64));

    for height in [1u32, 16, 128] {
        for use_kernel in [false, true] {
            let knobs = Knobs {
                use_kernel,
                stripe_height: height,
                ..Knobs::default()
            };
            let mut node = OcioBlinkNode::new(
                Arc::new(builtin::nuke_default()),
                DeviceSet::cpu_only(),
                knobs,
            );
            node.set_input(image.clone());
            node.validate().unwrap();

            let name = if use_kernel { "kernel" } else { "cpu" };
            group.bench_function(BenchmarkId::new(name, height), |b| {
                b.iter(|| {
                    TileScheduler::for_node(&node)
                        .render(&node, bounds, &ChannelSet::rgba())
                        .unwrap()
                })
            });
        }
    }

    group.finish();
}

/// Parse, validate and build cost of the assembled program.
fn bench_compile(c: &mut Criterion) {
    let (program, _) = ShaderTextAssembler::default().assemble(&log_to_lin()).unwrap();
    let device = CpuDevice::new();

    c.bench_function("compile_program", |b| {
        b.iter(|| Program::compile(black_box(program.text()), Codegen::Default).unwrap())
    });
    c.bench_function("build_kernel", |b| {
        b.iter(|| Kernel::new(black_box(program.text()), &device, Codegen::Default).unwrap())
    });
}

criterion_group!(benches, bench_paths, bench_stripes, bench_compile);
criterion_main!(benches);
