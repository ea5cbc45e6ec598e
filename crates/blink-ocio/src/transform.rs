//! Transform definitions for color space conversions.
//!
//! Transforms describe the math between a color space and the reference
//! space. They are plain data: [`Processor`](crate::Processor) compiles a
//! chain of them into flat ops for the CPU and for shader generation.
//!
//! In YAML configs every transform is written with its type tag:
//!
//! ```yaml
//! to_reference: !LogAffineTransform {base: 10, log_side_slope: 0.29325513, direction: inverse}
//! ```

use serde::{Deserialize, Deserializer, Serialize};

/// Transform application direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformDirection {
    /// Forward transform.
    #[default]
    Forward,
    /// Inverse transform.
    Inverse,
}

impl TransformDirection {
    /// Returns the opposite direction.
    #[inline]
    pub fn inverse(self) -> Self {
        match self {
            Self::Forward => Self::Inverse,
            Self::Inverse => Self::Forward,
        }
    }

    /// True for [`TransformDirection::Forward`].
    #[inline]
    pub fn is_forward(self) -> bool {
        self == Self::Forward
    }

    /// Combines a nested direction with the direction of its parent.
    #[inline]
    pub fn compose(self, outer: Self) -> Self {
        match outer {
            Self::Forward => self,
            Self::Inverse => self.inverse(),
        }
    }
}

/// A color transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    /// 4x4 matrix with offset (alpha row and column are ignored).
    #[serde(rename = "MatrixTransform")]
    Matrix(MatrixTransform),
    /// Per-channel power function.
    #[serde(rename = "ExponentTransform")]
    Exponent(ExponentTransform),
    /// Power function with a linear toe (sRGB, Rec.709 style curves).
    #[serde(rename = "ExponentWithLinearTransform")]
    ExponentWithLinear(ExponentWithLinearTransform),
    /// Pure logarithm.
    #[serde(rename = "LogTransform")]
    Log(LogTransform),
    /// Logarithm with affine terms on both sides (Cineon style).
    #[serde(rename = "LogAffineTransform")]
    LogAffine(LogAffineTransform),
    /// Linear remap with optional clamping.
    #[serde(rename = "RangeTransform")]
    Range(RangeTransform),
    /// Ordered chain of transforms.
    #[serde(rename = "GroupTransform")]
    Group(GroupTransform),
}

impl Transform {
    /// Creates a matrix transform from a row-major 4x4 matrix.
    pub fn matrix(matrix: [f64; 16]) -> Self {
        Self::Matrix(MatrixTransform {
            matrix,
            offset: [0.0; 4],
            direction: TransformDirection::Forward,
        })
    }

    /// Creates a group transform.
    pub fn group(children: Vec<Transform>) -> Self {
        Self::Group(GroupTransform {
            children,
            direction: TransformDirection::Forward,
        })
    }

    /// Direction this transform is applied in.
    pub fn direction(&self) -> TransformDirection {
        match self {
            Self::Matrix(t) => t.direction,
            Self::Exponent(t) => t.direction,
            Self::ExponentWithLinear(t) => t.direction,
            Self::Log(t) => t.direction,
            Self::LogAffine(t) => t.direction,
            Self::Range(t) => t.direction,
            Self::Group(t) => t.direction,
        }
    }

    /// Returns the same transform applied in the opposite direction.
    pub fn inverse(mut self) -> Self {
        let dir = match &mut self {
            Self::Matrix(t) => &mut t.direction,
            Self::Exponent(t) => &mut t.direction,
            Self::ExponentWithLinear(t) => &mut t.direction,
            Self::Log(t) => &mut t.direction,
            Self::LogAffine(t) => &mut t.direction,
            Self::Range(t) => &mut t.direction,
            Self::Group(t) => &mut t.direction,
        };
        *dir = dir.inverse();
        self
    }
}

/// Matrix transform: `out = M * in + offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixTransform {
    /// Row-major 4x4 matrix.
    #[serde(default = "identity_matrix")]
    pub matrix: [f64; 16],
    /// Offset added after the multiply.
    #[serde(default)]
    pub offset: [f64; 4],
    /// Direction.
    #[serde(default)]
    pub direction: TransformDirection,
}

fn identity_matrix() -> [f64; 16] {
    [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Handling of negative inputs for [`ExponentTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStyle {
    /// Clamp negatives to zero.
    #[default]
    Clamp,
    /// Mirror the curve around the origin.
    Mirror,
    /// Leave negatives untouched.
    #[serde(alias = "passthru")]
    PassThru,
}

/// Power function: `out = in ^ value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentTransform {
    /// Per-channel exponent (RGBA; alpha is ignored).
    #[serde(default = "ones4")]
    pub value: [f64; 4],
    /// Negative handling.
    #[serde(default, rename = "style")]
    pub negative_style: NegativeStyle,
    /// Direction.
    #[serde(default)]
    pub direction: TransformDirection,
}

fn ones4() -> [f64; 4] {
    [1.0; 4]
}

/// Power curve with a linear segment near black.
///
/// Forward decodes: `((x + offset) / (1 + offset)) ^ gamma` above the
/// break point, `x / slope` below it. Break point and slope are derived so
/// the two segments meet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentWithLinearTransform {
    /// Per-channel gamma (RGBA; alpha is ignored).
    pub gamma: [f64; 4],
    /// Per-channel offset (RGBA; alpha is ignored).
    pub offset: [f64; 4],
    /// Direction.
    #[serde(default)]
    pub direction: TransformDirection,
}

/// Logarithm: forward is `log_base(in)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTransform {
    /// Logarithm base.
    #[serde(default = "default_base")]
    pub base: f64,
    /// Direction.
    #[serde(default)]
    pub direction: TransformDirection,
}

fn default_base() -> f64 {
    2.0
}

/// Affine log: forward is
/// `log_slope * log_base(lin_slope * in + lin_offset) + log_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogAffineTransform {
    /// Logarithm base.
    #[serde(default = "default_base")]
    pub base: f64,
    /// Slope on the log side.
    #[serde(default = "ones3", deserialize_with = "triple")]
    pub log_side_slope: [f64; 3],
    /// Offset on the log side.
    #[serde(default, deserialize_with = "triple")]
    pub log_side_offset: [f64; 3],
    /// Slope on the linear side.
    #[serde(default = "ones3", deserialize_with = "triple")]
    pub lin_side_slope: [f64; 3],
    /// Offset on the linear side.
    #[serde(default, deserialize_with = "triple")]
    pub lin_side_offset: [f64; 3],
    /// Direction.
    #[serde(default)]
    pub direction: TransformDirection,
}

fn ones3() -> [f64; 3] {
    [1.0; 3]
}

/// Accepts either a scalar (applied to all three channels) or a triple.
fn triple<'de, D>(deserializer: D) -> Result<[f64; 3], D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrThree {
        One(f64),
        Three([f64; 3]),
    }

    Ok(match OneOrThree::deserialize(deserializer)? {
        OneOrThree::One(v) => [v; 3],
        OneOrThree::Three(v) => v,
    })
}

/// Clamping behavior for [`RangeTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeStyle {
    /// Clamp to the output range.
    #[default]
    Clamp,
    /// Remap without clamping.
    NoClamp,
}

/// Linear remap from `[min_in, max_in]` to `[min_out, max_out]`.
///
/// When only one side of the range is given the transform clamps on that
/// side without rescaling.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeTransform {
    /// Input lower bound.
    #[serde(default, rename = "min_in_value")]
    pub min_in: Option<f64>,
    /// Input upper bound.
    #[serde(default, rename = "max_in_value")]
    pub max_in: Option<f64>,
    /// Output lower bound.
    #[serde(default, rename = "min_out_value")]
    pub min_out: Option<f64>,
    /// Output upper bound.
    #[serde(default, rename = "max_out_value")]
    pub max_out: Option<f64>,
    /// Clamp style.
    #[serde(default)]
    pub style: RangeStyle,
    /// Direction.
    #[serde(default)]
    pub direction: TransformDirection,
}

/// Ordered chain of transforms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupTransform {
    /// Children, applied first to last in the forward direction.
    #[serde(default)]
    pub children: Vec<Transform>,
    /// Direction.
    #[serde(default)]
    pub direction: TransformDirection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_flips_direction() {
        let t = Transform::matrix(identity_matrix());
        assert!(t.direction().is_forward());
        assert_eq!(t.inverse().direction(), TransformDirection::Inverse);
    }

    #[test]
    fn compose_directions() {
        use TransformDirection::*;
        assert_eq!(Forward.compose(Inverse), Inverse);
        assert_eq!(Inverse.compose(Inverse), Forward);
        assert_eq!(Inverse.compose(Forward), Inverse);
    }

    #[test]
    fn tagged_yaml() {
        let yaml = "!LogAffineTransform {base: 10, log_side_slope: 0.5, lin_side_offset: [0.1, 0.2, 0.3], direction: inverse}";
        let t: Transform = serde_yaml::from_str(yaml).unwrap();
        match t {
            Transform::LogAffine(la) => {
                assert_eq!(la.base, 10.0);
                assert_eq!(la.log_side_slope, [0.5; 3]);
                assert_eq!(la.lin_side_slope, [1.0; 3]);
                assert_eq!(la.lin_side_offset, [0.1, 0.2, 0.3]);
                assert_eq!(la.direction, TransformDirection::Inverse);
            }
            other => panic!("unexpected transform {other:?}"),
        }
    }

    #[test]
    fn exponent_style_alias() {
        let yaml = "!ExponentTransform {value: [2.2, 2.2, 2.2, 1], style: passthru}";
        let t: Transform = serde_yaml::from_str(yaml).unwrap();
        let Transform::Exponent(e) = t else {
            panic!("expected exponent");
        };
        assert_eq!(e.negative_style, NegativeStyle::PassThru);
    }
}
