//! Render command
//!
//! Reads an image, renders it stripe by stripe through the node and writes
//! the result.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use blink_node::{ChannelSet, PlaneSource, TileScheduler};

use super::Env;
use crate::{RenderArgs, RenderPath};

pub fn run(args: RenderArgs, env: &Env) -> Result<()> {
    let input = Arc::new(super::load_image(&args.input)?);
    let bounds = input.bounds();
    let node = super::build_node(
        env,
        &args.node,
        args.path == RenderPath::Kernel,
        Arc::clone(&input),
    )?;

    tracing::info!(
        input = %args.input.display(),
        operation = node.knobs().operation.label(),
        path = ?args.path,
        gpu = node.gpu_name(),
        "rendering"
    );

    let start = Instant::now();
    let output = TileScheduler::for_node(&node)
        .render(&node, bounds, &ChannelSet::rgba())
        .with_context(|| format!("Failed to render {}", args.input.display()))?;
    tracing::info!(
        width = bounds.width(),
        height = bounds.height(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "rendered"
    );

    super::save_image(&args.output, &output)
}
