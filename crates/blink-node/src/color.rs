//! Color-management seam.
//!
//! The node sees color management only through these two traits. The
//! `blink-ocio` [`Config`] and [`Processor`] implement them; tests substitute
//! their own.

use std::sync::Arc;

use blink_ocio::{Config, GpuShaderDesc, ImageDesc, OcioResult, Processor};

/// A resolved transform between two color spaces.
///
/// Shader text, LUT sampling and [`apply`](Self::apply) describe the same
/// transform; [`is_no_op`](Self::is_no_op) is true when it is the identity.
pub trait ColorProcessor: Send + Sync {
    fn is_no_op(&self) -> bool;

    /// Source text of a free function implementing the transform.
    fn shader_text(&self, desc: &GpuShaderDesc) -> OcioResult<String>;

    /// Samples the transform into a `3 * E^3` lookup table.
    fn gpu_lut3d(&self, lut: &mut [f32], desc: &GpuShaderDesc) -> OcioResult<()>;

    /// Applies the transform in place.
    fn apply(&self, image: &mut ImageDesc<'_>) -> OcioResult<()>;
}

/// Source of processors.
pub trait ColorConfig: Send + Sync {
    /// Processor converting `src` to `dst`; both may be roles or names.
    fn processor(&self, src: &str, dst: &str) -> OcioResult<Arc<dyn ColorProcessor>>;
}

impl ColorProcessor for Processor {
    fn is_no_op(&self) -> bool {
        Processor::is_no_op(self)
    }

    fn shader_text(&self, desc: &GpuShaderDesc) -> OcioResult<String> {
        self.gpu_shader_text(desc)
    }

    fn gpu_lut3d(&self, lut: &mut [f32], desc: &GpuShaderDesc) -> OcioResult<()> {
        Processor::gpu_lut3d(self, lut, desc)
    }

    fn apply(&self, image: &mut ImageDesc<'_>) -> OcioResult<()> {
        Processor::apply(self, image)
    }
}

impl ColorConfig for Config {
    fn processor(&self, src: &str, dst: &str) -> OcioResult<Arc<dyn ColorProcessor>> {
        let processor = Config::processor(self, src, dst)?;
        Ok(Arc::new(processor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blink_ocio::{GpuLanguage, builtin, role_names};

    #[test]
    fn builtin_config_through_trait() {
        let config: Arc<dyn ColorConfig> = Arc::new(builtin::nuke_default());
        let p = config
            .processor(role_names::COMPOSITING_LOG, role_names::SCENE_LINEAR)
            .unwrap();
        assert!(!p.is_no_op());

        let desc = GpuShaderDesc::new(GpuLanguage::Wgsl).with_function_name("f");
        assert!(p.shader_text(&desc).unwrap().contains("fn f("));
    }

    #[test]
    fn same_space_is_no_op() {
        let config = builtin::nuke_default();
        let p = ColorConfig::processor(&config, "linear", "scene_linear").unwrap();
        assert!(p.is_no_op());
    }
}
