//! ocioblink - drive the OCIO Blink node from the command line
//!
//! Prints the generated kernel, renders image files through either path,
//! cross-checks the CPU and kernel paths, and lists compute devices.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ocioblink")]
#[command(author, version, about = "OCIO log/lin node with generated compute kernels")]
#[command(long_about = "
Runs the OCIO Blink color node outside a compositing host.

Examples:
  ocioblink kernel                           # Print the log-to-lin kernel
  ocioblink kernel -o lin-to-log --listing   # Numbered kernel listing
  ocioblink render plate.exr out.exr         # Render through the kernel path
  ocioblink render in.png out.png --path cpu --stripe-height 64
  ocioblink check --width 256 --height 128   # Compare CPU and kernel paths
  ocioblink devices                          # List compute devices
  ocioblink --config studio.yaml kernel      # Use a YAML color config
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write the log to this file
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Color configuration (YAML); defaults to $OCIO, then the built-in config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Node knobs (YAML)
    #[arg(long, global = true)]
    knobs: Option<PathBuf>,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the assembled kernel program
    #[command(visible_alias = "k")]
    Kernel(KernelArgs),

    /// Render an image file through the node
    #[command(visible_alias = "r")]
    Render(RenderArgs),

    /// Run both paths and report the largest difference
    Check(CheckArgs),

    /// List compute devices
    Devices,
}

/// Settings shared by commands that build a node.
#[derive(Args, Clone)]
struct NodeArgs {
    /// Operation: log-to-lin or lin-to-log
    #[arg(short, long)]
    operation: Option<String>,

    /// Rows per stripe
    #[arg(long)]
    stripe_height: Option<u32>,

    /// Compute device for the kernel path
    #[arg(long, value_enum, default_value = "auto")]
    device: DeviceChoice,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
enum DeviceChoice {
    /// GPU when available, else CPU
    Auto,
    /// CPU compute device only
    Cpu,
    /// Require a GPU
    Gpu,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
enum RenderPath {
    /// Generated kernel
    Kernel,
    /// Direct processor application
    Cpu,
}

#[derive(Args)]
struct KernelArgs {
    /// Operation: log-to-lin or lin-to-log
    #[arg(short, long)]
    operation: Option<String>,

    /// Name of the generated function
    #[arg(long)]
    function_name: Option<String>,

    /// Prefix every line with its number
    #[arg(long)]
    listing: bool,

    /// Also print the sampled 3D LUT
    #[arg(long)]
    lut: bool,
}

#[derive(Args)]
struct RenderArgs {
    /// Input image
    input: PathBuf,

    /// Output image (.exr keeps float values)
    output: PathBuf,

    /// Render path
    #[arg(short, long, value_enum, default_value = "kernel")]
    path: RenderPath,

    #[command(flatten)]
    node: NodeArgs,
}

#[derive(Args)]
struct CheckArgs {
    /// Input image; a synthetic ramp when omitted
    input: Option<PathBuf>,

    /// Ramp width
    #[arg(long, default_value = "64")]
    width: u32,

    /// Ramp height
    #[arg(long, default_value = "32")]
    height: u32,

    /// Largest allowed difference
    #[arg(long, default_value = "1e-5")]
    tolerance: f32,

    #[command(flatten)]
    node: NodeArgs,
}

fn init_logging(verbose: u8, log: Option<&PathBuf>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match log {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log path: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir.unwrap_or(std::path::Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log.as_ref())?;

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let env = commands::Env {
        config: cli.config,
        knobs: cli.knobs,
    };
    match cli.command {
        Commands::Kernel(args) => commands::kernel::run(args, &env),
        Commands::Render(args) => commands::render::run(args, &env),
        Commands::Check(args) => commands::check::run(args, &env),
        Commands::Devices => commands::devices::run(),
    }
}
