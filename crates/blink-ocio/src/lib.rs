//! OpenColorIO-style color management for the Blink node.
//!
//! This crate owns the color side of the node:
//! - Color spaces, roles and YAML configs ([`Config`])
//! - Transform chains compiled into flat [`Processor`] ops
//! - In-place CPU application over packed or planar buffers
//! - GPU shader text generation (WGSL, GLSL) and 3D LUT sampling
//!
//! # Quick Start
//!
//! ```
//! use blink_ocio::{builtin, GpuShaderDesc, GpuLanguage, ImageDesc, PackedImageDesc};
//!
//! let config = builtin::nuke_default();
//! let processor = config.processor("compositing_log", "scene_linear").unwrap();
//!
//! // CPU
//! let mut pixels = vec![0.5_f32; 4 * 4 * 3];
//! let mut desc = ImageDesc::from(PackedImageDesc::new(&mut pixels, 4, 4, 3).unwrap());
//! processor.apply(&mut desc).unwrap();
//!
//! // GPU
//! let shader = processor
//!     .gpu_shader_text(&GpuShaderDesc::new(GpuLanguage::Wgsl))
//!     .unwrap();
//! assert!(shader.contains("fn OCIODisplay("));
//! ```
//!
//! # Active Config
//!
//! [`current_config`] loads the file named by `$OCIO` and falls back to
//! [`builtin::nuke_default`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod colorspace;
mod config;
mod error;
mod gpu;
mod processor;
mod role;
mod transform;

pub mod builtin;

pub use colorspace::{ColorSpace, ColorSpaceBuilder, Encoding};
pub use config::{Config, ConfigVersion, OCIO_ENV, current_config};
pub use error::{OcioError, OcioResult};
pub use gpu::{GpuLanguage, GpuShaderDesc};
pub use processor::{
    ImageDesc, MIN_LOG_INPUT, PackedImageDesc, PlanarImageDesc, Processor, ProcessorOp,
};
pub use role::{Roles, names as role_names};
pub use transform::{
    ExponentTransform, ExponentWithLinearTransform, GroupTransform, LogAffineTransform,
    LogTransform, MatrixTransform, NegativeStyle, RangeStyle, RangeTransform, Transform,
    TransformDirection,
};
