//! Compiled color processors.
//!
//! A [`Processor`] is a flat list of [`ProcessorOp`]s with every direction
//! already resolved. The same ops drive the CPU path ([`Processor::apply`])
//! and shader generation ([`Processor::gpu_shader_text`]); the CPU math below
//! and the emitted shader math perform the same f32 operations in the same
//! order so the two stay interchangeable.

use glam::{DMat3, DVec3};
use rayon::prelude::*;

use crate::error::{OcioError, OcioResult};
use crate::transform::{
    ExponentWithLinearTransform, LogAffineTransform, NegativeStyle, RangeStyle, RangeTransform,
    Transform, TransformDirection,
};

/// Smallest value fed to a logarithm.
pub const MIN_LOG_INPUT: f32 = 1e-10;

/// Flattened operation with every parameter in f32.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorOp {
    /// `out[i] = m[i][0]*r + m[i][1]*g + m[i][2]*b + offset[i]`, row-major.
    Matrix {
        /// Row-major 3x3.
        m: [f32; 9],
        /// Offset per channel.
        offset: [f32; 3],
    },
    /// Per-channel power.
    Exponent {
        /// Exponent per channel.
        value: [f32; 3],
        /// Negative handling.
        style: NegativeStyle,
    },
    /// Power curve with linear toe. See [`ExponentWithLinearTransform`].
    ExponentWithLinear {
        /// Exponent actually applied (gamma forward, 1/gamma inverse).
        power: [f32; 3],
        /// Offset per channel.
        offset: [f32; 3],
        /// `1 + offset`, precomputed.
        scale: [f32; 3],
        /// Segment switch point in the input domain of this direction.
        break_point: [f32; 3],
        /// Linear segment slope.
        slope: [f32; 3],
        /// True when decoding (encoded to linear).
        forward: bool,
    },
    /// Logarithm (`forward`) or exponential.
    Log {
        /// Natural log of the base.
        ln_base: f32,
        /// Direction.
        forward: bool,
    },
    /// Affine log. See [`LogAffineTransform`].
    LogAffine {
        /// Natural log of the base.
        ln_base: f32,
        /// Log side slope.
        log_slope: [f32; 3],
        /// Log side offset.
        log_offset: [f32; 3],
        /// Linear side slope.
        lin_slope: [f32; 3],
        /// Linear side offset.
        lin_offset: [f32; 3],
        /// True for linear to log.
        forward: bool,
    },
    /// `clamp(x * scale + offset, min, max)`.
    Range {
        /// Scale.
        scale: f32,
        /// Offset.
        offset: f32,
        /// Lower clamp.
        min: Option<f32>,
        /// Upper clamp.
        max: Option<f32>,
    },
}

/// WGSL-compatible `sign`: zero maps to zero.
#[inline]
pub(crate) fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl ProcessorOp {
    /// Short human-readable name, used in generated shader comments.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matrix { .. } => "matrix",
            Self::Exponent { .. } => "exponent",
            Self::ExponentWithLinear { forward: true, .. } => "exponent with linear",
            Self::ExponentWithLinear { forward: false, .. } => "exponent with linear inverse",
            Self::Log { forward: true, .. } => "log",
            Self::Log { forward: false, .. } => "antilog",
            Self::LogAffine { forward: true, .. } => "log affine",
            Self::LogAffine { forward: false, .. } => "log affine inverse",
            Self::Range { .. } => "range",
        }
    }

    /// True when the op leaves every input unchanged.
    pub fn is_identity(&self) -> bool {
        match self {
            Self::Matrix { m, offset } => {
                *m == [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0] && *offset == [0.0; 3]
            }
            Self::Exponent { value, style } => {
                *value == [1.0; 3] && *style != NegativeStyle::Clamp
            }
            Self::Range {
                scale,
                offset,
                min,
                max,
            } => *scale == 1.0 && *offset == 0.0 && min.is_none() && max.is_none(),
            _ => false,
        }
    }

    /// Applies the op to one RGB triple.
    pub fn apply_rgb(&self, rgb: &mut [f32; 3]) {
        match self {
            Self::Matrix { m, offset } => {
                let [r, g, b] = *rgb;
                for i in 0..3 {
                    rgb[i] = r * m[i * 3] + g * m[i * 3 + 1] + b * m[i * 3 + 2] + offset[i];
                }
            }
            Self::Exponent { value, style } => {
                for (c, &v) in rgb.iter_mut().zip(value) {
                    *c = match style {
                        NegativeStyle::Clamp => c.max(0.0).powf(v),
                        NegativeStyle::Mirror => sign(*c) * c.abs().powf(v),
                        NegativeStyle::PassThru => {
                            if *c >= 0.0 {
                                c.max(0.0).powf(v)
                            } else {
                                *c
                            }
                        }
                    };
                }
            }
            Self::ExponentWithLinear {
                power,
                offset,
                scale,
                break_point,
                slope,
                forward,
            } => {
                for i in 0..3 {
                    let x = rgb[i];
                    rgb[i] = if *forward {
                        if x >= break_point[i] {
                            ((x + offset[i]) / scale[i]).powf(power[i])
                        } else {
                            x / slope[i]
                        }
                    } else if x >= break_point[i] {
                        scale[i] * x.powf(power[i]) - offset[i]
                    } else {
                        x * slope[i]
                    };
                }
            }
            Self::Log { ln_base, forward } => {
                for c in rgb.iter_mut() {
                    *c = if *forward {
                        c.max(MIN_LOG_INPUT).ln() / ln_base
                    } else {
                        (*c * ln_base).exp()
                    };
                }
            }
            Self::LogAffine {
                ln_base,
                log_slope,
                log_offset,
                lin_slope,
                lin_offset,
                forward,
            } => {
                for i in 0..3 {
                    let x = rgb[i];
                    rgb[i] = if *forward {
                        let t = (x * lin_slope[i] + lin_offset[i]).max(MIN_LOG_INPUT);
                        log_slope[i] * (t.ln() / ln_base) + log_offset[i]
                    } else {
                        let t = (x - log_offset[i]) / log_slope[i];
                        ((t * ln_base).exp() - lin_offset[i]) / lin_slope[i]
                    };
                }
            }
            Self::Range {
                scale,
                offset,
                min,
                max,
            } => {
                for c in rgb.iter_mut() {
                    let mut t = *c * scale + offset;
                    if let Some(lo) = min {
                        t = t.max(*lo);
                    }
                    if let Some(hi) = max {
                        t = t.min(*hi);
                    }
                    *c = t;
                }
            }
        }
    }
}

/// Packed (interleaved) f32 pixels, RGB in the first three channels.
#[derive(Debug)]
pub struct PackedImageDesc<'a> {
    data: &'a mut [f32],
    width: usize,
    height: usize,
    num_channels: usize,
}

impl<'a> PackedImageDesc<'a> {
    /// Wraps `data` as `width x height` pixels of `num_channels` floats.
    ///
    /// Channels past the third are left untouched by processing.
    pub fn new(
        data: &'a mut [f32],
        width: usize,
        height: usize,
        num_channels: usize,
    ) -> OcioResult<Self> {
        if num_channels < 3 {
            return Err(OcioError::ImageDesc(format!(
                "packed image needs at least 3 channels, got {num_channels}"
            )));
        }
        let expected = width * height * num_channels;
        if data.len() != expected {
            return Err(OcioError::ImageDesc(format!(
                "packed buffer holds {} floats, {width}x{height}x{num_channels} needs {expected}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            num_channels,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Floats per pixel.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }
}

/// One slice per channel. Alpha, when present, is not processed.
#[derive(Debug)]
pub struct PlanarImageDesc<'a> {
    r: &'a mut [f32],
    g: &'a mut [f32],
    b: &'a mut [f32],
    width: usize,
    height: usize,
}

impl<'a> PlanarImageDesc<'a> {
    /// Wraps three channel planes of `width * height` floats each.
    pub fn new(
        r: &'a mut [f32],
        g: &'a mut [f32],
        b: &'a mut [f32],
        width: usize,
        height: usize,
    ) -> OcioResult<Self> {
        let expected = width * height;
        for (name, plane) in [("red", &r), ("green", &g), ("blue", &b)] {
            if plane.len() != expected {
                return Err(OcioError::ImageDesc(format!(
                    "{name} plane holds {} floats, {width}x{height} needs {expected}",
                    plane.len()
                )));
            }
        }
        Ok(Self {
            r,
            g,
            b,
            width,
            height,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }
}

/// Pixel buffer handed to [`Processor::apply`].
#[derive(Debug)]
pub enum ImageDesc<'a> {
    /// Interleaved channels.
    Packed(PackedImageDesc<'a>),
    /// Separate channel planes.
    Planar(PlanarImageDesc<'a>),
}

impl<'a> From<PackedImageDesc<'a>> for ImageDesc<'a> {
    fn from(desc: PackedImageDesc<'a>) -> Self {
        Self::Packed(desc)
    }
}

impl<'a> From<PlanarImageDesc<'a>> for ImageDesc<'a> {
    fn from(desc: PlanarImageDesc<'a>) -> Self {
        Self::Planar(desc)
    }
}

/// A compiled transform between two color spaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Processor {
    ops: Vec<ProcessorOp>,
    source: String,
    destination: String,
}

impl Processor {
    /// Creates an identity processor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity processor labelled with its endpoints.
    pub fn identity(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            ops: Vec::new(),
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Compiles transforms (applied in order) into ops, dropping identities.
    pub fn from_transforms(
        transforms: &[Transform],
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> OcioResult<Self> {
        let mut ops = Vec::new();
        for t in transforms {
            compile_transform(t, TransformDirection::Forward, &mut ops)?;
        }
        ops.retain(|op| !op.is_identity());
        Ok(Self {
            ops,
            source: source.into(),
            destination: destination.into(),
        })
    }

    /// Builds a processor from ops directly.
    pub fn from_ops(ops: Vec<ProcessorOp>) -> Self {
        Self {
            ops,
            ..Self::default()
        }
    }

    /// True if the processor leaves every pixel unchanged.
    #[inline]
    pub fn is_no_op(&self) -> bool {
        self.ops.is_empty()
    }

    /// Compiled ops in application order.
    #[inline]
    pub fn ops(&self) -> &[ProcessorOp] {
        &self.ops
    }

    /// Source color space name.
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination color space name.
    #[inline]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Applies the processor to one RGB triple.
    #[inline]
    pub fn apply_rgb(&self, rgb: &mut [f32; 3]) {
        for op in &self.ops {
            op.apply_rgb(rgb);
        }
    }

    /// Applies the processor in place.
    pub fn apply(&self, image: &mut ImageDesc<'_>) -> OcioResult<()> {
        if self.is_no_op() {
            return Ok(());
        }
        match image {
            ImageDesc::Packed(desc) => {
                let n = desc.num_channels;
                desc.data.par_chunks_mut(n).for_each(|px| {
                    let mut rgb = [px[0], px[1], px[2]];
                    self.apply_rgb(&mut rgb);
                    px[..3].copy_from_slice(&rgb);
                });
            }
            ImageDesc::Planar(desc) => {
                desc.r
                    .par_iter_mut()
                    .zip(desc.g.par_iter_mut())
                    .zip(desc.b.par_iter_mut())
                    .for_each(|((r, g), b)| {
                        let mut rgb = [*r, *g, *b];
                        self.apply_rgb(&mut rgb);
                        *r = rgb[0];
                        *g = rgb[1];
                        *b = rgb[2];
                    });
            }
        }
        Ok(())
    }
}

fn f32x3(v: [f64; 3]) -> [f32; 3] {
    v.map(|x| x as f32)
}

fn rgb_of(v: &[f64; 4]) -> [f64; 3] {
    [v[0], v[1], v[2]]
}

fn compile_transform(
    transform: &Transform,
    outer: TransformDirection,
    ops: &mut Vec<ProcessorOp>,
) -> OcioResult<()> {
    let dir = transform.direction().compose(outer);
    match transform {
        Transform::Group(group) => {
            if dir.is_forward() {
                for child in &group.children {
                    compile_transform(child, TransformDirection::Forward, ops)?;
                }
            } else {
                for child in group.children.iter().rev() {
                    compile_transform(child, TransformDirection::Inverse, ops)?;
                }
            }
        }
        Transform::Matrix(mt) => {
            let m = &mt.matrix;
            let rows = DMat3::from_cols_array(&[
                m[0], m[1], m[2], //
                m[4], m[5], m[6], //
                m[8], m[9], m[10],
            ])
            .transpose();
            let offset = DVec3::new(mt.offset[0], mt.offset[1], mt.offset[2]);
            let (rows, offset) = if dir.is_forward() {
                (rows, offset)
            } else {
                if rows.determinant().abs() < 1e-12 {
                    return Err(OcioError::invalid("matrix is singular and cannot be inverted"));
                }
                let inv = rows.inverse();
                (inv, -(inv * offset))
            };
            let cols = rows.transpose().to_cols_array();
            ops.push(ProcessorOp::Matrix {
                m: cols.map(|x| x as f32),
                offset: f32x3(offset.to_array()),
            });
        }
        Transform::Exponent(et) => {
            let value = rgb_of(&et.value);
            if value.iter().any(|&v| v == 0.0) {
                return Err(OcioError::invalid("exponent value must be non-zero"));
            }
            let value = if dir.is_forward() {
                value
            } else {
                value.map(|v| 1.0 / v)
            };
            ops.push(ProcessorOp::Exponent {
                value: f32x3(value),
                style: et.negative_style,
            });
        }
        Transform::ExponentWithLinear(ewl) => ops.push(compile_exponent_with_linear(ewl, dir)?),
        Transform::Log(lt) => {
            check_base(lt.base)?;
            ops.push(ProcessorOp::Log {
                ln_base: lt.base.ln() as f32,
                forward: dir.is_forward(),
            });
        }
        Transform::LogAffine(la) => ops.push(compile_log_affine(la, dir)?),
        Transform::Range(rt) => ops.push(compile_range(rt, dir)?),
    }
    Ok(())
}

fn check_base(base: f64) -> OcioResult<()> {
    if base <= 0.0 || base == 1.0 || !base.is_finite() {
        return Err(OcioError::invalid(format!("invalid log base {base}")));
    }
    Ok(())
}

fn compile_log_affine(la: &LogAffineTransform, dir: TransformDirection) -> OcioResult<ProcessorOp> {
    check_base(la.base)?;
    if la.log_side_slope.contains(&0.0) || la.lin_side_slope.contains(&0.0) {
        return Err(OcioError::invalid("log affine slopes must be non-zero"));
    }
    Ok(ProcessorOp::LogAffine {
        ln_base: la.base.ln() as f32,
        log_slope: f32x3(la.log_side_slope),
        log_offset: f32x3(la.log_side_offset),
        lin_slope: f32x3(la.lin_side_slope),
        lin_offset: f32x3(la.lin_side_offset),
        forward: dir.is_forward(),
    })
}

fn compile_exponent_with_linear(
    ewl: &ExponentWithLinearTransform,
    dir: TransformDirection,
) -> OcioResult<ProcessorOp> {
    let gamma = rgb_of(&ewl.gamma);
    let offset = rgb_of(&ewl.offset);
    if gamma.iter().any(|&g| g <= 1.0) || offset.iter().any(|&o| o <= 0.0) {
        return Err(OcioError::invalid(
            "exponent with linear needs gamma > 1 and offset > 0",
        ));
    }

    let mut power = [0.0; 3];
    let mut break_point = [0.0; 3];
    let mut slope = [0.0; 3];
    for i in 0..3 {
        let (g, o) = (gamma[i], offset[i]);
        // Encoded-domain break where the power segment's tangent meets zero.
        let enc_break = o / (g - 1.0);
        let s = enc_break / ((enc_break + o) / (1.0 + o)).powf(g);
        slope[i] = s;
        if dir.is_forward() {
            power[i] = g;
            break_point[i] = enc_break;
        } else {
            power[i] = 1.0 / g;
            break_point[i] = enc_break / s;
        }
    }

    Ok(ProcessorOp::ExponentWithLinear {
        power: f32x3(power),
        offset: f32x3(offset),
        scale: f32x3(offset.map(|o| 1.0 + o)),
        break_point: f32x3(break_point),
        slope: f32x3(slope),
        forward: dir.is_forward(),
    })
}

fn compile_range(rt: &RangeTransform, dir: TransformDirection) -> OcioResult<ProcessorOp> {
    let (min_in, max_in, min_out, max_out) = if dir.is_forward() {
        (rt.min_in, rt.max_in, rt.min_out, rt.max_out)
    } else {
        (rt.min_out, rt.max_out, rt.min_in, rt.max_in)
    };
    let clamp = rt.style == RangeStyle::Clamp;

    let op = match (min_in, max_in, min_out, max_out) {
        (Some(lo_in), Some(hi_in), Some(lo_out), Some(hi_out)) => {
            if hi_in == lo_in {
                return Err(OcioError::invalid("range input bounds must differ"));
            }
            let scale = (hi_out - lo_out) / (hi_in - lo_in);
            ProcessorOp::Range {
                scale: scale as f32,
                offset: (lo_out - lo_in * scale) as f32,
                min: clamp.then_some(lo_out.min(hi_out) as f32),
                max: clamp.then_some(lo_out.max(hi_out) as f32),
            }
        }
        (lo_in, hi_in, lo_out, hi_out) => {
            // One-sided ranges only shift and clamp.
            let lo = lo_in.zip(lo_out);
            let hi = hi_in.zip(hi_out);
            let offset = match (lo, hi) {
                (Some((i, o)), _) | (None, Some((i, o))) => o - i,
                (None, None) => return Err(OcioError::invalid("range has no bounds")),
            };
            ProcessorOp::Range {
                scale: 1.0,
                offset: offset as f32,
                min: lo.filter(|_| clamp).map(|(_, o)| o as f32),
                max: hi.filter(|_| clamp).map(|(_, o)| o as f32),
            }
        }
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ExponentTransform, LogTransform, MatrixTransform};
    use approx::assert_relative_eq;

    fn cineon() -> LogAffineTransform {
        let black = 10f64.powf((95.0 - 685.0) / 300.0);
        LogAffineTransform {
            base: 10.0,
            log_side_slope: [300.0 / 1023.0; 3],
            log_side_offset: [685.0 / 1023.0; 3],
            lin_side_slope: [1.0 - black; 3],
            lin_side_offset: [black; 3],
            direction: TransformDirection::Forward,
        }
    }

    #[test]
    fn empty_processor_is_noop() {
        let p = Processor::new();
        assert!(p.is_no_op());
        let mut rgb = [0.1, 0.2, 0.3];
        p.apply_rgb(&mut rgb);
        assert_eq!(rgb, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn identity_ops_are_dropped() {
        let p = Processor::from_transforms(
            &[Transform::matrix([
                1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
            ])],
            "a",
            "b",
        )
        .unwrap();
        assert!(p.is_no_op());
    }

    #[test]
    fn cineon_reference_points() {
        let p = Processor::from_transforms(&[Transform::LogAffine(cineon())], "lin", "log").unwrap();

        let mut black = [0.0f32; 3];
        p.apply_rgb(&mut black);
        assert_relative_eq!(black[0], 95.0 / 1023.0, epsilon = 1e-5);

        let mut white = [1.0f32; 3];
        p.apply_rgb(&mut white);
        assert_relative_eq!(white[1], 685.0 / 1023.0, epsilon = 1e-5);
    }

    #[test]
    fn log_affine_roundtrip() {
        let fwd = Processor::from_transforms(&[Transform::LogAffine(cineon())], "lin", "log").unwrap();
        let inv = Processor::from_transforms(
            &[Transform::LogAffine(cineon()).inverse()],
            "log",
            "lin",
        )
        .unwrap();

        for v in [0.0f32, 0.18, 0.5, 1.0, 4.0] {
            let mut rgb = [v; 3];
            fwd.apply_rgb(&mut rgb);
            inv.apply_rgb(&mut rgb);
            assert_relative_eq!(rgb[0], v, epsilon = 1e-4);
        }
    }

    #[test]
    fn matrix_inverse_roundtrip() {
        let mt = MatrixTransform {
            matrix: [
                0.9, 0.1, 0.0, 0.0, 0.05, 0.9, 0.05, 0.0, 0.0, 0.2, 0.8, 0.0, 0.0, 0.0, 0.0, 1.0,
            ],
            offset: [0.01, 0.02, 0.03, 0.0],
            direction: TransformDirection::Forward,
        };
        let t = Transform::Matrix(mt);
        let p = Processor::from_transforms(&[t.clone(), t.inverse()], "a", "b").unwrap();
        assert_eq!(p.ops().len(), 2);

        let mut rgb = [0.3f32, 0.6, 0.9];
        p.apply_rgb(&mut rgb);
        assert_relative_eq!(rgb[0], 0.3, epsilon = 1e-5);
        assert_relative_eq!(rgb[1], 0.6, epsilon = 1e-5);
        assert_relative_eq!(rgb[2], 0.9, epsilon = 1e-5);
    }

    #[test]
    fn singular_matrix_inverse_fails() {
        let t = Transform::matrix([0.0; 16]).inverse();
        assert!(Processor::from_transforms(&[t], "a", "b").is_err());
    }

    #[test]
    fn srgb_curve_is_continuous() {
        let ewl = ExponentWithLinearTransform {
            gamma: [2.4, 2.4, 2.4, 1.0],
            offset: [0.055, 0.055, 0.055, 0.0],
            direction: TransformDirection::Forward,
        };
        let op = compile_exponent_with_linear(&ewl, TransformDirection::Forward).unwrap();
        let ProcessorOp::ExponentWithLinear {
            break_point, slope, ..
        } = &op
        else {
            panic!("expected exponent with linear");
        };
        assert_relative_eq!(slope[0], 12.92, epsilon = 0.01);

        let below = {
            let mut rgb = [break_point[0] - 1e-6; 3];
            op.apply_rgb(&mut rgb);
            rgb[0]
        };
        let above = {
            let mut rgb = [break_point[0]; 3];
            op.apply_rgb(&mut rgb);
            rgb[0]
        };
        assert_relative_eq!(below, above, epsilon = 1e-5);

        let mut white = [1.0f32; 3];
        op.apply_rgb(&mut white);
        assert_relative_eq!(white[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn group_inverse_reverses_children() {
        let group = Transform::group(vec![
            Transform::Log(LogTransform {
                base: 2.0,
                direction: TransformDirection::Forward,
            }),
            Transform::Exponent(ExponentTransform {
                value: [2.0, 2.0, 2.0, 1.0],
                negative_style: NegativeStyle::Mirror,
                direction: TransformDirection::Forward,
            }),
        ]);
        let p = Processor::from_transforms(&[group.inverse()], "a", "b").unwrap();
        assert!(matches!(p.ops()[0], ProcessorOp::Exponent { value, .. } if value[0] == 0.5));
        assert!(matches!(p.ops()[1], ProcessorOp::Log { forward: false, .. }));
    }

    #[test]
    fn range_remaps_and_clamps() {
        let rt = RangeTransform {
            min_in: Some(0.0),
            max_in: Some(1.0),
            min_out: Some(-10.0),
            max_out: Some(6.5),
            ..Default::default()
        };
        let op = compile_range(&rt, TransformDirection::Forward).unwrap();
        let mut rgb = [0.5, 2.0, -1.0];
        op.apply_rgb(&mut rgb);
        assert_relative_eq!(rgb[0], -1.75);
        assert_relative_eq!(rgb[1], 6.5);
        assert_relative_eq!(rgb[2], -10.0);
    }

    #[test]
    fn packed_apply_leaves_alpha() {
        let p = Processor::from_ops(vec![ProcessorOp::Range {
            scale: 2.0,
            offset: 0.0,
            min: None,
            max: None,
        }]);
        let mut data = vec![0.1, 0.2, 0.3, 0.5, 1.0, 1.0, 1.0, 0.25];
        let mut desc = ImageDesc::from(PackedImageDesc::new(&mut data, 2, 1, 4).unwrap());
        p.apply(&mut desc).unwrap();
        assert_eq!(data, vec![0.2, 0.4, 0.6, 0.5, 2.0, 2.0, 2.0, 0.25]);
    }

    #[test]
    fn planar_apply() {
        let p = Processor::from_ops(vec![ProcessorOp::Range {
            scale: 1.0,
            offset: 1.0,
            min: None,
            max: None,
        }]);
        let (mut r, mut g, mut b) = (vec![0.0; 4], vec![1.0; 4], vec![2.0; 4]);
        let mut desc =
            ImageDesc::from(PlanarImageDesc::new(&mut r, &mut g, &mut b, 2, 2).unwrap());
        p.apply(&mut desc).unwrap();
        assert_eq!(r, vec![1.0; 4]);
        assert_eq!(b, vec![3.0; 4]);
    }

    #[test]
    fn packed_desc_validates_shape() {
        let mut data = vec![0.0; 10];
        assert!(PackedImageDesc::new(&mut data, 2, 2, 3).is_err());
        assert!(PackedImageDesc::new(&mut data, 5, 1, 2).is_err());
    }
}
