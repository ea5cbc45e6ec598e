//! GPU shader text generation and 3D LUT sampling.
//!
//! [`Processor::gpu_shader_text`] emits a free function
//!
//! ```text
//! fn <name>(inPixel: vec4<f32>) -> vec4<f32>
//! ```
//!
//! (or the GLSL equivalent) that applies every op of the processor to the
//! pixel's RGB and passes alpha through. The emitted expressions mirror
//! [`ProcessorOp::apply_rgb`] operation for operation, and literals are
//! printed with round-trip precision, so a faithful evaluator reproduces the
//! CPU result.
//!
//! [`Processor::gpu_lut3d`] samples the whole transform on an `E^3` grid for
//! hosts that want a lookup-table fallback.
//!
//! # Example
//!
//! ```
//! use blink_ocio::{builtin, GpuLanguage, GpuShaderDesc};
//!
//! let config = builtin::nuke_default();
//! let processor = config.processor("compositing_log", "scene_linear").unwrap();
//!
//! let desc = GpuShaderDesc::new(GpuLanguage::Wgsl).with_function_name("log_to_lin");
//! let text = processor.gpu_shader_text(&desc).unwrap();
//! assert!(text.contains("fn log_to_lin("));
//! ```

use crate::error::{OcioError, OcioResult};
use crate::processor::{MIN_LOG_INPUT, Processor, ProcessorOp};
use crate::transform::NegativeStyle;

/// Target shader language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuLanguage {
    /// WebGPU Shading Language.
    #[default]
    Wgsl,
    /// GLSL 3.30 (OpenGL 3.3).
    Glsl330,
}

impl GpuLanguage {
    /// Short display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wgsl => "WGSL",
            Self::Glsl330 => "GLSL 3.30",
        }
    }

    fn vec3_type(&self) -> &'static str {
        match self {
            Self::Wgsl => "vec3<f32>",
            Self::Glsl330 => "vec3",
        }
    }

    /// Float literal that parses back to exactly `v`.
    fn float(&self, v: f32) -> String {
        let v = if v.is_finite() {
            v
        } else if v.is_nan() {
            0.0
        } else {
            f32::MAX.copysign(v)
        };
        let s = format!("{v:?}");
        match self {
            Self::Wgsl => format!("{s}f"),
            Self::Glsl330 => s,
        }
    }

    fn vec3(&self, v: [f32; 3]) -> String {
        if v[0] == v[1] && v[1] == v[2] {
            return self.splat3(v[0]);
        }
        format!(
            "{}({}, {}, {})",
            self.vec3_type(),
            self.float(v[0]),
            self.float(v[1]),
            self.float(v[2])
        )
    }

    fn splat3(&self, v: f32) -> String {
        format!("{}({})", self.vec3_type(), self.float(v))
    }

    fn let_vec3(&self, name: &str, expr: &str) -> String {
        match self {
            Self::Wgsl => format!("let {name} = {expr};"),
            Self::Glsl330 => format!("vec3 {name} = {expr};"),
        }
    }

    fn set_rgb(&self, expr: &str) -> String {
        match self {
            // WGSL cannot assign through a multi-component swizzle.
            Self::Wgsl => format!("color = vec4<f32>({expr}, color.a);"),
            Self::Glsl330 => format!("color.rgb = {expr};"),
        }
    }

    /// Component-wise `lhs >= rhs ? if_true : if_false`.
    fn select_ge(&self, if_false: &str, if_true: &str, lhs: &str, rhs: &str) -> String {
        match self {
            Self::Wgsl => format!("select({if_false}, {if_true}, {lhs} >= {rhs})"),
            Self::Glsl330 => {
                format!("mix({if_false}, {if_true}, vec3(greaterThanEqual({lhs}, {rhs})))")
            }
        }
    }
}

/// Request parameters for shader text and LUT sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuShaderDesc {
    language: GpuLanguage,
    function_name: String,
    lut3d_edge_len: u32,
}

impl Default for GpuShaderDesc {
    fn default() -> Self {
        Self::new(GpuLanguage::default())
    }
}

impl GpuShaderDesc {
    /// Default exported function name.
    pub const DEFAULT_FUNCTION_NAME: &'static str = "OCIODisplay";
    /// Default 3D LUT edge length.
    pub const DEFAULT_LUT3D_EDGE_LEN: u32 = 32;
    /// Largest accepted 3D LUT edge length.
    pub const MAX_LUT3D_EDGE_LEN: u32 = 256;

    /// Creates a descriptor for `language` with default name and edge length.
    pub fn new(language: GpuLanguage) -> Self {
        Self {
            language,
            function_name: Self::DEFAULT_FUNCTION_NAME.to_string(),
            lut3d_edge_len: Self::DEFAULT_LUT3D_EDGE_LEN,
        }
    }

    /// Sets the exported function name.
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    /// Sets the 3D LUT edge length.
    pub fn with_lut3d_edge_len(mut self, edge_len: u32) -> Self {
        self.lut3d_edge_len = edge_len;
        self
    }

    /// Target language.
    pub fn language(&self) -> GpuLanguage {
        self.language
    }

    /// Exported function name.
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// 3D LUT edge length.
    pub fn lut3d_edge_len(&self) -> u32 {
        self.lut3d_edge_len
    }

    /// Number of floats [`Processor::gpu_lut3d`] writes: `3 * E^3`.
    ///
    /// Fails for edges above [`Self::MAX_LUT3D_EDGE_LEN`].
    pub fn lut3d_len(&self) -> OcioResult<usize> {
        lut3d_len(self.lut3d_edge_len)
    }
}

/// `3 * E^3` for an edge of at most [`GpuShaderDesc::MAX_LUT3D_EDGE_LEN`].
fn lut3d_len(edge_len: u32) -> OcioResult<usize> {
    if edge_len > GpuShaderDesc::MAX_LUT3D_EDGE_LEN {
        return Err(OcioError::Gpu(format!(
            "3D LUT edge length must be at most {}, got {edge_len}",
            GpuShaderDesc::MAX_LUT3D_EDGE_LEN
        )));
    }
    let e = edge_len as usize;
    e.checked_mul(e)
        .and_then(|n| n.checked_mul(e))
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| OcioError::Gpu(format!("3D LUT edge length {edge_len} is too large")))
}

fn check_identifier(name: &str) -> OcioResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid = valid_start
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
        && name != "_";
    if valid {
        Ok(())
    } else {
        Err(OcioError::Gpu(format!(
            "'{name}' is not a valid shader function name"
        )))
    }
}

/// Accumulates indented shader lines.
struct ShaderWriter {
    text: String,
    indent: usize,
}

impl ShaderWriter {
    fn line(&mut self, line: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.text.push_str("    ");
        }
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    fn open(&mut self, line: impl AsRef<str>) {
        self.line(line);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("}");
    }
}

impl Processor {
    /// Generates the shader function implementing this processor.
    ///
    /// Output depends only on the ops and `desc`, so identical inputs give
    /// byte-identical text.
    pub fn gpu_shader_text(&self, desc: &GpuShaderDesc) -> OcioResult<String> {
        check_identifier(&desc.function_name)?;
        let lang = desc.language;
        let mut w = ShaderWriter {
            text: String::new(),
            indent: 0,
        };

        w.line(format!(
            "// {} color transform: {} -> {}",
            lang.name(),
            display_name(self.source()),
            display_name(self.destination())
        ));
        match lang {
            GpuLanguage::Wgsl => {
                w.open(format!(
                    "fn {}(inPixel: vec4<f32>) -> vec4<f32> {{",
                    desc.function_name
                ));
                w.line("var color: vec4<f32> = inPixel;");
            }
            GpuLanguage::Glsl330 => {
                w.open(format!("vec4 {}(vec4 inPixel) {{", desc.function_name));
                w.line("vec4 color = inPixel;");
            }
        }

        for (i, op) in self.ops().iter().enumerate() {
            w.line(format!("// op {i}: {}", op.label()));
            w.open("{");
            emit_op(&mut w, lang, op);
            w.close();
        }

        w.line("return color;");
        w.close();
        Ok(w.text)
    }

    /// Samples the processor on an `E^3` grid into `lut`.
    ///
    /// Red varies fastest: entry `(r, g, b)` lands at `((b*E + g)*E + r) * 3`
    /// and holds the transformed `(r, g, b) / (E - 1)`.
    pub fn gpu_lut3d(&self, lut: &mut [f32], desc: &GpuShaderDesc) -> OcioResult<()> {
        let e = desc.lut3d_edge_len as usize;
        if e < 2 {
            return Err(OcioError::Gpu(format!(
                "3D LUT edge length must be at least 2, got {e}"
            )));
        }
        let needed = desc.lut3d_len()?;
        if lut.len() != needed {
            return Err(OcioError::Gpu(format!(
                "3D LUT buffer holds {} floats, edge {e} needs {needed}",
                lut.len()
            )));
        }

        let scale = 1.0 / (e - 1) as f32;
        for (i, entry) in lut.chunks_exact_mut(3).enumerate() {
            let r = i % e;
            let g = (i / e) % e;
            let b = i / (e * e);
            let mut rgb = [r as f32 * scale, g as f32 * scale, b as f32 * scale];
            self.apply_rgb(&mut rgb);
            entry.copy_from_slice(&rgb);
        }
        Ok(())
    }
}

/// Color space name as it appears in the header comment. Control
/// characters become spaces so the comment stays on one line.
fn display_name(name: &str) -> String {
    if name.is_empty() {
        return "<unnamed>".to_string();
    }
    name.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn emit_op(w: &mut ShaderWriter, lang: GpuLanguage, op: &ProcessorOp) {
    w.line(lang.let_vec3("c", "color.rgb"));
    match op {
        ProcessorOp::Matrix { m, offset } => {
            let row = |i: usize| {
                format!(
                    "c.r * {} + c.g * {} + c.b * {} + {}",
                    lang.float(m[i * 3]),
                    lang.float(m[i * 3 + 1]),
                    lang.float(m[i * 3 + 2]),
                    lang.float(offset[i])
                )
            };
            w.line(lang.set_rgb(&format!(
                "{}({}, {}, {})",
                lang.vec3_type(),
                row(0),
                row(1),
                row(2)
            )));
        }
        ProcessorOp::Exponent { value, style } => {
            let v = lang.vec3(*value);
            let zero = lang.splat3(0.0);
            let expr = match style {
                NegativeStyle::Clamp => format!("pow(max(c, {zero}), {v})"),
                NegativeStyle::Mirror => format!("sign(c) * pow(abs(c), {v})"),
                NegativeStyle::PassThru => {
                    let pos = format!("pow(max(c, {zero}), {v})");
                    lang.select_ge("c", &pos, "c", &zero)
                }
            };
            w.line(lang.set_rgb(&expr));
        }
        ProcessorOp::ExponentWithLinear {
            power,
            offset,
            scale,
            break_point,
            slope,
            forward,
        } => {
            let (curve, toe) = if *forward {
                (
                    format!(
                        "pow((c + {}) / {}, {})",
                        lang.vec3(*offset),
                        lang.vec3(*scale),
                        lang.vec3(*power)
                    ),
                    format!("c / {}", lang.vec3(*slope)),
                )
            } else {
                (
                    format!(
                        "{} * pow(c, {}) - {}",
                        lang.vec3(*scale),
                        lang.vec3(*power),
                        lang.vec3(*offset)
                    ),
                    format!("c * {}", lang.vec3(*slope)),
                )
            };
            w.line(lang.let_vec3("curve", &curve));
            w.line(lang.let_vec3("toe", &toe));
            w.line(lang.set_rgb(&lang.select_ge(
                "toe",
                "curve",
                "c",
                &lang.vec3(*break_point),
            )));
        }
        ProcessorOp::Log { ln_base, forward } => {
            let ln = lang.splat3(*ln_base);
            let expr = if *forward {
                format!("log(max(c, {})) / {ln}", lang.splat3(MIN_LOG_INPUT))
            } else {
                format!("exp(c * {ln})")
            };
            w.line(lang.set_rgb(&expr));
        }
        ProcessorOp::LogAffine {
            ln_base,
            log_slope,
            log_offset,
            lin_slope,
            lin_offset,
            forward,
        } => {
            let ln = lang.splat3(*ln_base);
            if *forward {
                w.line(lang.let_vec3(
                    "t",
                    &format!(
                        "max(c * {} + {}, {})",
                        lang.vec3(*lin_slope),
                        lang.vec3(*lin_offset),
                        lang.splat3(MIN_LOG_INPUT)
                    ),
                ));
                w.line(lang.set_rgb(&format!(
                    "{} * (log(t) / {ln}) + {}",
                    lang.vec3(*log_slope),
                    lang.vec3(*log_offset)
                )));
            } else {
                w.line(lang.let_vec3(
                    "t",
                    &format!(
                        "(c - {}) / {}",
                        lang.vec3(*log_offset),
                        lang.vec3(*log_slope)
                    ),
                ));
                w.line(lang.set_rgb(&format!(
                    "(exp(t * {ln}) - {}) / {}",
                    lang.vec3(*lin_offset),
                    lang.vec3(*lin_slope)
                )));
            }
        }
        ProcessorOp::Range {
            scale,
            offset,
            min,
            max,
        } => {
            let mut expr = format!("c * {} + {}", lang.splat3(*scale), lang.splat3(*offset));
            if let Some(lo) = min {
                expr = format!("max({expr}, {})", lang.splat3(*lo));
            }
            if let Some(hi) = max {
                expr = format!("min({expr}, {})", lang.splat3(*hi));
            }
            w.line(lang.set_rgb(&expr));
        }
    }
}
