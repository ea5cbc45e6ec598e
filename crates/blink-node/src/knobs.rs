//! Node control surface.
//!
//! Knobs are plain serde data. They load from YAML (every field optional):
//!
//! ```yaml
//! operation: lin_to_log
//! use_gpu_if_available: false
//! stripe_height: 16
//! ```
//!
//! and then take environment overrides:
//!
//! | Variable              | Knob                   |
//! |-----------------------|------------------------|
//! | `BLINK_STRIPE_HEIGHT` | `stripe_height`        |
//! | `BLINK_USE_GPU`       | `use_gpu_if_available` |
//! | `BLINK_USE_KERNEL`    | `use_kernel`           |

use std::path::Path;

use blink_ocio::GpuShaderDesc;
use serde::{Deserialize, Serialize};

use crate::assembler::ShaderTextAssembler;
use crate::error::{NodeError, NodeResult};
use crate::resolver::Operation;

pub const ENV_STRIPE_HEIGHT: &str = "BLINK_STRIPE_HEIGHT";
pub const ENV_USE_GPU: &str = "BLINK_USE_GPU";
pub const ENV_USE_KERNEL: &str = "BLINK_USE_KERNEL";

/// User-facing node settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Knobs {
    /// Run kernels on the GPU when one is present.
    pub use_gpu_if_available: bool,
    /// Render through the generated kernel; `false` forces the CPU path.
    pub use_kernel: bool,
    /// Accepted and stored; no render path reads it.
    pub gain: f32,
    pub operation: Operation,
    /// Rows per stripe.
    pub stripe_height: u32,
    pub lut3d_edge_len: u32,
    pub function_name: String,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            use_gpu_if_available: true,
            use_kernel: true,
            gain: 2.0,
            operation: Operation::LogToLin,
            stripe_height: 1,
            lut3d_edge_len: ShaderTextAssembler::DEFAULT_LUT3D_EDGE_LEN,
            function_name: ShaderTextAssembler::DEFAULT_FUNCTION_NAME.to_string(),
        }
    }
}

impl Knobs {
    pub fn from_yaml_str(yaml: &str) -> NodeResult<Self> {
        let knobs: Self = serde_yaml::from_str(yaml)
            .map_err(|e| NodeError::Configuration(format!("knobs: {e}")))?;
        knobs.validate()?;
        Ok(knobs)
    }

    pub fn from_file(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Configuration(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> NodeResult<String> {
        serde_yaml::to_string(self).map_err(|e| NodeError::Configuration(e.to_string()))
    }

    /// Applies overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(h) = lookup(ENV_STRIPE_HEIGHT)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|&h| h >= 1)
        {
            self.stripe_height = h;
        }
        if let Some(b) = lookup(ENV_USE_GPU).and_then(|v| parse_flag(&v)) {
            self.use_gpu_if_available = b;
        }
        if let Some(b) = lookup(ENV_USE_KERNEL).and_then(|v| parse_flag(&v)) {
            self.use_kernel = b;
        }
        self
    }

    pub fn validate(&self) -> NodeResult<()> {
        if self.stripe_height == 0 || i32::try_from(self.stripe_height).is_err() {
            return Err(NodeError::Configuration(format!(
                "stripe_height must be between 1 and {}, got {}",
                i32::MAX,
                self.stripe_height
            )));
        }
        if !(2..=GpuShaderDesc::MAX_LUT3D_EDGE_LEN).contains(&self.lut3d_edge_len) {
            return Err(NodeError::Configuration(format!(
                "lut3d_edge_len must be between 2 and {}, got {}",
                GpuShaderDesc::MAX_LUT3D_EDGE_LEN,
                self.lut3d_edge_len
            )));
        }
        if self.function_name.is_empty() {
            return Err(NodeError::Configuration("function_name is empty".into()));
        }
        Ok(())
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let k = Knobs::default();
        assert!(k.use_gpu_if_available && k.use_kernel);
        assert_eq!(k.gain, 2.0);
        assert_eq!(k.operation, Operation::LogToLin);
        assert_eq!(k.stripe_height, 1);
        assert_eq!(k.function_name, "ocio_blink_func");
    }

    #[test]
    fn partial_yaml() {
        let k = Knobs::from_yaml_str("operation: lin_to_log\nstripe_height: 32\n").unwrap();
        assert_eq!(k.operation, Operation::LinToLog);
        assert_eq!(k.stripe_height, 32);
        assert!(k.use_kernel);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Knobs::from_yaml_str("stripe_height: 0").is_err());
        assert!(Knobs::from_yaml_str("lut3d_edge_len: 1").is_err());
        assert!(Knobs::from_yaml_str("operation: sideways").is_err());
    }

    #[test]
    fn rejects_oversized_values() {
        let lut = Knobs {
            lut3d_edge_len: 2_000_000,
            ..Knobs::default()
        };
        assert!(matches!(lut.validate(), Err(NodeError::Configuration(_))));
        assert!(Knobs::from_yaml_str("lut3d_edge_len: 256").is_ok());
        assert!(Knobs::from_yaml_str("lut3d_edge_len: 257").is_err());

        let stripes = Knobs {
            stripe_height: 3_000_000_000,
            ..Knobs::default()
        };
        assert!(matches!(stripes.validate(), Err(NodeError::Configuration(_))));
        let from_env = Knobs::default()
            .with_overrides(|n| (n == ENV_STRIPE_HEIGHT).then(|| "3000000000".to_string()));
        assert!(from_env.validate().is_err());
    }

    #[test]
    fn overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_STRIPE_HEIGHT, "64"),
            (ENV_USE_GPU, "off"),
            (ENV_USE_KERNEL, "maybe"),
        ]
        .into();
        let k = Knobs::default().with_overrides(|n| env.get(n).map(|v| v.to_string()));
        assert_eq!(k.stripe_height, 64);
        assert!(!k.use_gpu_if_available);
        assert!(k.use_kernel);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knobs.yaml");
        let knobs = Knobs {
            use_gpu_if_available: false,
            ..Knobs::default()
        };
        std::fs::write(&path, knobs.to_yaml().unwrap()).unwrap();
        assert_eq!(Knobs::from_file(&path).unwrap(), knobs);
    }
}
