//! Kernel command
//!
//! Prints the program the node would build for an operation.

use std::sync::Arc;

use anyhow::{Context, Result};
use blink_node::{ShaderTextAssembler, TransformResolver};

use super::Env;
use crate::KernelArgs;

pub fn run(args: KernelArgs, env: &Env) -> Result<()> {
    let knobs = env.knobs()?;
    let operation = super::parse_operation(args.operation.as_deref(), knobs.operation)?;
    let function_name = args.function_name.unwrap_or(knobs.function_name);

    let resolver = TransformResolver::new(Arc::new(env.color_config()?));
    let processor = resolver.resolve(operation)?;
    let (program, lut) = ShaderTextAssembler::new(function_name, knobs.lut3d_edge_len)
        .assemble(processor.as_ref())
        .context("Failed to assemble the kernel")?;

    if processor.is_no_op() {
        eprintln!("note: {operation} is a no-op in this config; the node passes pixels through");
    }

    if args.listing {
        print!("{}", program.listing());
    } else {
        print!("{program}");
    }

    if args.lut {
        println!("\n// 3D LUT, edge {} (red fastest)", lut.edge_len);
        for rgb in lut.data.chunks_exact(3) {
            println!("// {:>12.6} {:>12.6} {:>12.6}", rgb[0], rgb[1], rgb[2]);
        }
    }
    Ok(())
}
