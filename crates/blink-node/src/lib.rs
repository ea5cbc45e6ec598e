//! OCIO color transform node with generated compute kernels.
//!
//! The node converts between the `compositing_log` and `scene_linear` roles of
//! a color configuration. Each validate turns the selected transform into a
//! kernel program (generated function body plus a fixed wrapper) and samples a
//! small 3D LUT. Each render then runs either the kernel, on the GPU or the
//! CPU compute device, or the processor directly on the host. Both paths give
//! the same pixels.
//!
//! # Architecture
//!
//! ```text
//! OcioBlinkNode
//!   validate ──► TransformResolver ──► ShaderTextAssembler ──► ValidatedCycle
//!   render   ──► DualPathExecutor (Cpu | Kernel) ──► FailureReporter on error
//! TileScheduler drives render_stripe across rayon workers
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use blink_compute::DeviceSet;
//! use blink_node::{Box2, ChannelSet, Knobs, MemoryImage, OcioBlinkNode, TileScheduler};
//!
//! let mut node = OcioBlinkNode::new(
//!     Arc::new(blink_ocio::builtin::nuke_default()),
//!     DeviceSet::cpu_only(),
//!     Knobs::default(),
//! );
//! let bounds = Box2::from_size(16, 8);
//! node.set_input(Arc::new(MemoryImage::filled(bounds, ChannelSet::rgba(), 0.5)));
//! node.validate().unwrap();
//!
//! let out = TileScheduler::for_node(&node)
//!     .render(&node, bounds, &ChannelSet::rgba())
//!     .unwrap();
//! assert!(out.get(3, 3, blink_node::Channel::Red) > 0.0);
//! ```

pub mod assembler;
pub mod color;
pub mod error;
pub mod executor;
pub mod knobs;
pub mod node;
pub mod plane;
pub mod report;
pub mod resolver;
pub mod scheduler;

pub use assembler::{GeneratedProgramSource, Lut3d, ShaderTextAssembler, WRAPPER_MARKER};
pub use color::{ColorConfig, ColorProcessor};
pub use error::{NodeError, NodeResult, PlaneError};
pub use executor::{DualPathExecutor, ExecPath};
pub use knobs::Knobs;
pub use node::{ChannelMask, InputRequest, NO_GPU_NAME, OcioBlinkNode, ValidatedCycle};
pub use plane::{Box2, Channel, ChannelSet, ImagePlane, MemoryImage, PlaneDescriptor, PlaneSource};
pub use report::{CollectingSink, ErrorSink, FailureReporter, TracingSink};
pub use resolver::{Operation, TransformResolver};
pub use scheduler::TileScheduler;
