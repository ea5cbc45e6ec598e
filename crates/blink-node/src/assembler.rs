//! Kernel program assembly.
//!
//! The color processor writes a free function `fn NAME(inPixel: vec4<f32>) ->
//! vec4<f32>`. The assembler appends a fixed wrapper that binds the tile
//! buffers, reads the current pixel with edge clamping, calls `NAME` once and
//! stores the result:
//!
//! ```text
//! <generated body>
//!
//! // Statically defined:
//! <wrapper>
//! ```

use std::fmt;

use blink_ocio::{GpuLanguage, GpuShaderDesc};

use crate::color::ColorProcessor;
use crate::error::{NodeError, NodeResult};

/// Marker line between the generated body and the wrapper.
pub const WRAPPER_MARKER: &str = "// Statically defined:";

const FUNCTION_PLACEHOLDER: &str = "{FUNCTION}";

/// Kernel wrapper. `{FUNCTION}` is replaced by the generated function name.
const WRAPPER_TEMPLATE: &str = r#"@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;

// Point-sampled read of component c, clamped to the image edge.
fn src_sample(x: i32, y: i32, c: u32) -> f32 {
    let cx = u32(clamp(x, 0i, i32(dims.x) - 1i));
    let cy = u32(clamp(y, 0i, i32(dims.y) - 1i));
    return src[(cy * dims.x + cx) * dims.z + c];
}

fn src_pixel(x: i32, y: i32) -> vec4<f32> {
    var a: f32 = 1.0;
    if (dims.z > 3u) {
        a = src_sample(x, y, 3u);
    }
    return vec4<f32>(src_sample(x, y, 0u), src_sample(x, y, 1u), src_sample(x, y, 2u), a);
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let total = dims.x * dims.y;
    if (gid.x >= total) {
        return;
    }
    let x = i32(gid.x % dims.x);
    let y = i32(gid.x / dims.x);
    let result = {FUNCTION}(src_pixel(x, y));

    let base = gid.x * dims.z;
    dst[base] = result.r;
    dst[base + 1u] = result.g;
    dst[base + 2u] = result.b;
    if (dims.z > 3u) {
        dst[base + 3u] = result.a;
    }
    for (var c = 4u; c < dims.z; c = c + 1u) {
        dst[base + c] = src_sample(x, y, c);
    }
}
"#;

/// Full kernel source: generated body, separator, wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProgramSource {
    text: String,
    body_len: usize,
    function_name: String,
}

impl GeneratedProgramSource {
    /// Joins `body` with the wrapper calling `function_name`.
    pub fn new(body: &str, function_name: &str) -> Self {
        let wrapper = WRAPPER_TEMPLATE.replace(FUNCTION_PLACEHOLDER, function_name);
        let text = format!("{body}\n\n{WRAPPER_MARKER}\n{wrapper}\n");
        Self {
            text,
            body_len: body.len(),
            function_name: function_name.to_string(),
        }
    }

    /// The complete program.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The generated part.
    pub fn body(&self) -> &str {
        &self.text[..self.body_len]
    }

    /// The static part, after the marker line.
    pub fn wrapper(&self) -> &str {
        let start = self.body_len + 2 + WRAPPER_MARKER.len() + 1;
        self.text.get(start..).unwrap_or_default()
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }

    /// The program with 1-based line numbers, for diagnostics.
    pub fn listing(&self) -> String {
        let width = self.line_count().to_string().len();
        self.text
            .lines()
            .enumerate()
            .map(|(i, line)| format!("{:>width$} | {line}\n", i + 1))
            .collect()
    }
}

impl fmt::Display for GeneratedProgramSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A sampled `E^3` RGB lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct Lut3d {
    pub edge_len: u32,
    pub data: Vec<f32>,
}

impl Lut3d {
    /// Zero-filled table of `3 * E^3` floats. Edges above
    /// [`GpuShaderDesc::MAX_LUT3D_EDGE_LEN`] are a configuration error.
    pub fn zeroed(edge_len: u32) -> NodeResult<Self> {
        let len = GpuShaderDesc::default()
            .with_lut3d_edge_len(edge_len)
            .lut3d_len()
            .map_err(|e| NodeError::Configuration(format!("3D LUT: {e}")))?;
        Ok(Self {
            edge_len,
            data: vec![0.0; len],
        })
    }
}

/// Builds kernel programs from color processors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderTextAssembler {
    function_name: String,
    lut3d_edge_len: u32,
}

impl Default for ShaderTextAssembler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FUNCTION_NAME, Self::DEFAULT_LUT3D_EDGE_LEN)
    }
}

impl ShaderTextAssembler {
    pub const DEFAULT_FUNCTION_NAME: &'static str = "ocio_blink_func";
    pub const DEFAULT_LUT3D_EDGE_LEN: u32 = 2;

    pub fn new(function_name: impl Into<String>, lut3d_edge_len: u32) -> Self {
        Self {
            function_name: function_name.into(),
            lut3d_edge_len,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn lut3d_edge_len(&self) -> u32 {
        self.lut3d_edge_len
    }

    /// Requests the body and LUT from `processor` and joins the body with the
    /// wrapper. The text is not checked here; the compute engine reports
    /// syntax errors when the kernel is built.
    pub fn assemble(
        &self,
        processor: &dyn ColorProcessor,
    ) -> NodeResult<(GeneratedProgramSource, Lut3d)> {
        let desc = GpuShaderDesc::new(GpuLanguage::Wgsl)
            .with_function_name(self.function_name.as_str())
            .with_lut3d_edge_len(self.lut3d_edge_len);

        let body = processor
            .shader_text(&desc)
            .map_err(|e| NodeError::Configuration(format!("shader text: {e}")))?;

        let mut lut = Lut3d::zeroed(self.lut3d_edge_len)?;
        processor
            .gpu_lut3d(&mut lut.data, &desc)
            .map_err(|e| NodeError::Configuration(format!("3D LUT: {e}")))?;

        let program = GeneratedProgramSource::new(&body, &self.function_name);
        tracing::debug!(
            function = self.function_name.as_str(),
            lines = program.line_count(),
            lut_edge = self.lut3d_edge_len,
            "assembled kernel program"
        );
        Ok((program, lut))
    }
}
