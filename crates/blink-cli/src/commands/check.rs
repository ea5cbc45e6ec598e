//! Check command
//!
//! Renders the same image through the CPU path and the kernel path and
//! reports the largest per-component difference.

use std::sync::Arc;

use anyhow::{Result, bail};
use blink_node::{ChannelSet, PlaneSource, TileScheduler};

use super::Env;
use crate::CheckArgs;

pub fn run(args: CheckArgs, env: &Env) -> Result<()> {
    let input = Arc::new(match &args.input {
        Some(path) => super::load_image(path)?,
        None => super::ramp(args.width, args.height)?,
    });
    let bounds = input.bounds();
    let channels = ChannelSet::rgba();

    let render = |use_kernel: bool| -> Result<_> {
        let node = super::build_node(env, &args.node, use_kernel, Arc::clone(&input))?;
        Ok(TileScheduler::for_node(&node).render(&node, bounds, &channels)?)
    };
    let cpu = render(false)?;
    let kernel = render(true)?;

    let (mut max_diff, mut worst) = (0.0f32, 0usize);
    for (i, (a, b)) in cpu.data().iter().zip(kernel.data()).enumerate() {
        let d = (a - b).abs();
        if d > max_diff || d.is_nan() {
            max_diff = d;
            worst = i;
        }
    }

    let width = bounds.width().max(1) as usize;
    let pixel = worst / 4;
    println!(
        "{}x{} pixels, max |cpu - kernel| = {max_diff:.3e} at ({}, {}) component {}",
        bounds.width(),
        bounds.height(),
        pixel % width,
        pixel / width,
        worst % 4
    );

    if max_diff.is_nan() || max_diff > args.tolerance {
        bail!("Paths differ by more than {:e}", args.tolerance);
    }
    println!("OK (tolerance {:e})", args.tolerance);
    Ok(())
}
