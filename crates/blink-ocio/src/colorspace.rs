//! Color space definition.
//!
//! A color space carries a name, optional aliases and the transforms that
//! convert it to and from the config's reference space.
//!
//! # Example
//!
//! ```
//! use blink_ocio::{ColorSpace, Encoding};
//!
//! let cs = ColorSpace::builder("linear")
//!     .encoding(Encoding::SceneLinear)
//!     .description("Scene-linear reference")
//!     .build();
//!
//! assert_eq!(cs.name(), "linear");
//! assert!(cs.encoding().is_linear());
//! ```

use serde::{Deserialize, Serialize};

use crate::transform::Transform;

/// Color encoding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    /// Scene-referred linear.
    SceneLinear,
    /// Logarithmic encoding.
    Log,
    /// OETF-encoded display video (sRGB, Rec.709).
    SdrVideo,
    /// Non-color data.
    Data,
    /// Unknown/unspecified encoding.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Encoding {
    /// Checks if this is a linear encoding.
    #[inline]
    pub fn is_linear(&self) -> bool {
        matches!(self, Self::SceneLinear)
    }
}

/// Color space definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorSpace {
    name: String,
    aliases: Vec<String>,
    family: String,
    description: String,
    encoding: Encoding,
    is_data: bool,
    to_reference: Option<Transform>,
    from_reference: Option<Transform>,
}

impl ColorSpace {
    /// Creates a color space with no transforms (identical to the reference).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            family: String::new(),
            description: String::new(),
            encoding: Encoding::Unknown,
            is_data: false,
            to_reference: None,
            from_reference: None,
        }
    }

    /// Starts a builder.
    pub fn builder(name: impl Into<String>) -> ColorSpaceBuilder {
        ColorSpaceBuilder {
            inner: Self::new(name),
        }
    }

    /// Name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Family (free-form UI grouping).
    #[inline]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Human-readable description.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Encoding hint.
    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// True for non-color data. Conversions to or from data are identities.
    #[inline]
    pub fn is_data(&self) -> bool {
        self.is_data || self.encoding == Encoding::Data
    }

    /// Transform from this space to the reference.
    #[inline]
    pub fn to_reference(&self) -> Option<&Transform> {
        self.to_reference.as_ref()
    }

    /// Transform from the reference to this space.
    #[inline]
    pub fn from_reference(&self) -> Option<&Transform> {
        self.from_reference.as_ref()
    }

    /// Transform that takes pixels in this space to the reference.
    ///
    /// Falls back to the inverse of `from_reference`.
    pub fn transform_to_reference(&self) -> Option<Transform> {
        self.to_reference
            .clone()
            .or_else(|| self.from_reference.clone().map(Transform::inverse))
    }

    /// Transform that takes reference pixels into this space.
    ///
    /// Falls back to the inverse of `to_reference`.
    pub fn transform_from_reference(&self) -> Option<Transform> {
        self.from_reference
            .clone()
            .or_else(|| self.to_reference.clone().map(Transform::inverse))
    }

    /// Case-insensitive match against the name and aliases.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Builder for [`ColorSpace`].
#[derive(Debug)]
pub struct ColorSpaceBuilder {
    inner: ColorSpace,
}

impl ColorSpaceBuilder {
    /// Adds an alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.inner.aliases.push(alias.into());
        self
    }

    /// Sets the family.
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.inner.family = family.into();
        self
    }

    /// Sets the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.inner.description = desc.into();
        self
    }

    /// Sets the encoding.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.inner.encoding = encoding;
        self
    }

    /// Marks the space as non-color data.
    pub fn is_data(mut self, is_data: bool) -> Self {
        self.inner.is_data = is_data;
        self
    }

    /// Sets the to-reference transform.
    pub fn to_reference(mut self, transform: Transform) -> Self {
        self.inner.to_reference = Some(transform);
        self
    }

    /// Sets the from-reference transform.
    pub fn from_reference(mut self, transform: Transform) -> Self {
        self.inner.from_reference = Some(transform);
        self
    }

    /// Finishes the color space.
    pub fn build(self) -> ColorSpace {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{LogTransform, TransformDirection};

    #[test]
    fn build_colorspace() {
        let cs = ColorSpace::builder("Cineon")
            .alias("lg10")
            .family("log")
            .encoding(Encoding::Log)
            .build();

        assert_eq!(cs.name(), "Cineon");
        assert_eq!(cs.family(), "log");
        assert!(cs.matches_name("cineon"));
        assert!(cs.matches_name("LG10"));
        assert!(!cs.matches_name("linear"));
    }

    #[test]
    fn data_colorspace() {
        let cs = ColorSpace::builder("raw").encoding(Encoding::Data).build();
        assert!(cs.is_data());
    }

    #[test]
    fn reference_fallbacks_invert() {
        let log = Transform::Log(LogTransform {
            base: 2.0,
            direction: TransformDirection::Forward,
        });
        let cs = ColorSpace::builder("lg2").from_reference(log).build();

        let to_ref = cs.transform_to_reference().unwrap();
        assert_eq!(to_ref.direction(), TransformDirection::Inverse);
        assert!(cs.transform_from_reference().unwrap().direction().is_forward());
    }
}
