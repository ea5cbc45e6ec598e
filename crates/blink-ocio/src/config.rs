//! Color configuration: color spaces, roles and processor lookup.
//!
//! Configs come from YAML files, from [`builtin`](crate::builtin), or are
//! assembled in code. The YAML layout follows OCIO's, with transforms written
//! as tagged maps:
//!
//! ```yaml
//! ocio_profile_version: 2
//! roles:
//!   scene_linear: linear
//!   compositing_log: lg10
//! colorspaces:
//!   - name: linear
//!   - name: lg10
//!     encoding: log
//!     to_reference: !LogAffineTransform {base: 10, log_side_slope: 0.29325513, direction: inverse}
//! ```
//!
//! # Example
//!
//! ```
//! use blink_ocio::Config;
//! use std::path::PathBuf;
//!
//! let yaml = "ocio_profile_version: 2\nroles: {scene_linear: linear}\ncolorspaces:\n  - name: linear\n";
//! let config = Config::from_yaml_str(yaml, PathBuf::from(".")).unwrap();
//! assert!(config.processor("scene_linear", "linear").unwrap().is_no_op());
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::colorspace::{ColorSpace, Encoding};
use crate::error::{OcioError, OcioResult};
use crate::processor::Processor;
use crate::role::Roles;
use crate::transform::Transform;

/// Environment variable naming the active config file.
pub const OCIO_ENV: &str = "OCIO";

/// Value of `ocio_profile_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigVersion {
    /// OCIO v1 layout.
    V1,
    /// OCIO v2 layout.
    #[default]
    V2,
}

/// A color configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    name: String,
    description: String,
    version: ConfigVersion,
    working_dir: PathBuf,
    colorspaces: Vec<ColorSpace>,
    roles: Roles,
}

impl Config {
    /// Empty config with no spaces or roles.
    pub fn new() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            ..Self::default()
        }
    }

    /// Reads a YAML config. Relative paths inside it resolve against the
    /// file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> OcioResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OcioError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let working_dir = path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::from_yaml_str(&content, working_dir)
    }

    /// Parses YAML text. Every role must name a defined space.
    pub fn from_yaml_str(yaml: &str, working_dir: PathBuf) -> OcioResult<Self> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;
        Self::from_raw(raw, working_dir)
    }

    fn from_raw(raw: RawConfig, working_dir: PathBuf) -> OcioResult<Self> {
        let version_str = match &raw.ocio_profile_version {
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s.clone(),
            other => format!("{other:?}"),
        };
        let version = if version_str.starts_with('2') {
            ConfigVersion::V2
        } else if version_str.starts_with('1') {
            ConfigVersion::V1
        } else {
            return Err(OcioError::UnsupportedVersion {
                version: version_str,
            });
        };

        let mut config = Self {
            name: raw.name.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            version,
            working_dir,
            colorspaces: Vec::new(),
            roles: Roles::new(),
        };

        for cs in raw.colorspaces {
            config.add_colorspace(cs.into_colorspace());
        }
        for (role, cs) in raw.roles {
            config.set_role(role, cs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that every role names a defined color space.
    pub fn validate(&self) -> OcioResult<()> {
        for (role, cs) in self.roles.iter() {
            if self.find_colorspace(cs).is_none() {
                return Err(OcioError::DanglingRole {
                    role: role.to_string(),
                    colorspace: cs.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Config name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the config name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Config description.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Format version.
    #[inline]
    pub fn version(&self) -> ConfigVersion {
        self.version
    }

    /// Directory relative paths resolve against.
    #[inline]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Color spaces in definition order.
    #[inline]
    pub fn colorspaces(&self) -> &[ColorSpace] {
        &self.colorspaces
    }

    /// Gets a color space by role, name or alias. Roles win.
    pub fn colorspace(&self, name: &str) -> Option<&ColorSpace> {
        if let Some(cs_name) = self.roles.get(name) {
            return self.find_colorspace(cs_name);
        }
        self.find_colorspace(name)
    }

    fn find_colorspace(&self, name: &str) -> Option<&ColorSpace> {
        self.colorspaces.iter().find(|cs| cs.matches_name(name))
    }

    /// Role table.
    #[inline]
    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    /// Adds a color space, replacing one with the same name.
    pub fn add_colorspace(&mut self, cs: ColorSpace) {
        if let Some(existing) = self
            .colorspaces
            .iter_mut()
            .find(|c| c.name().eq_ignore_ascii_case(cs.name()))
        {
            *existing = cs;
        } else {
            self.colorspaces.push(cs);
        }
    }

    /// Defines a role.
    pub fn set_role(&mut self, role: impl Into<String>, colorspace: impl Into<String>) {
        self.roles.define(role, colorspace);
    }

    /// Creates a processor converting `src` to `dst` (roles or names).
    ///
    /// Same-space and data-space conversions yield an identity processor.
    pub fn processor(&self, src: &str, dst: &str) -> OcioResult<Processor> {
        let src_cs = self
            .colorspace(src)
            .ok_or_else(|| OcioError::ColorSpaceNotFound {
                name: src.to_string(),
            })?;
        let dst_cs = self
            .colorspace(dst)
            .ok_or_else(|| OcioError::ColorSpaceNotFound {
                name: dst.to_string(),
            })?;

        if src_cs.name() == dst_cs.name() || src_cs.is_data() || dst_cs.is_data() {
            return Ok(Processor::identity(src_cs.name(), dst_cs.name()));
        }

        let transforms: Vec<Transform> = src_cs
            .transform_to_reference()
            .into_iter()
            .chain(dst_cs.transform_from_reference())
            .collect();

        tracing::debug!(
            src = src_cs.name(),
            dst = dst_cs.name(),
            transforms = transforms.len(),
            "building processor"
        );
        Processor::from_transforms(&transforms, src_cs.name(), dst_cs.name())
    }
}

/// Returns the active configuration.
///
/// Reads the file named by `$OCIO` when set, otherwise the built-in
/// nuke-default config.
pub fn current_config() -> OcioResult<Config> {
    match std::env::var_os(OCIO_ENV) {
        Some(path) if !path.is_empty() => {
            tracing::debug!(path = ?path, "loading config from $OCIO");
            Config::from_file(PathBuf::from(path))
        }
        _ => Ok(crate::builtin::nuke_default()),
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ocio_profile_version: serde_yaml::Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    roles: BTreeMap<String, String>,
    #[serde(default)]
    colorspaces: Vec<RawColorSpace>,
}

#[derive(Debug, Deserialize)]
struct RawColorSpace {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    encoding: Option<Encoding>,
    #[serde(default)]
    isdata: Option<bool>,
    #[serde(default)]
    to_reference: Option<Transform>,
    #[serde(default)]
    from_reference: Option<Transform>,
}

impl RawColorSpace {
    fn into_colorspace(self) -> ColorSpace {
        let mut builder = ColorSpace::builder(self.name)
            .family(self.family.unwrap_or_default())
            .description(self.description.unwrap_or_default())
            .encoding(self.encoding.unwrap_or_default())
            .is_data(self.isdata.unwrap_or(false));
        for alias in self.aliases {
            builder = builder.alias(alias);
        }
        if let Some(t) = self.to_reference {
            builder = builder.to_reference(t);
        }
        if let Some(t) = self.from_reference {
            builder = builder.from_reference(t);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessorOp;

    const MINIMAL_CONFIG: &str = r#"
ocio_profile_version: 2
name: minimal
roles:
  scene_linear: linear
  compositing_log: lg2
  data: raw
colorspaces:
  - name: linear
    encoding: scene-linear
  - name: lg2
    aliases: [log2]
    encoding: log
    from_reference: !LogTransform {base: 2}
  - name: raw
    isdata: true
"#;

    fn minimal() -> Config {
        Config::from_yaml_str(MINIMAL_CONFIG, PathBuf::from(".")).unwrap()
    }

    #[test]
    fn parse_minimal_config() {
        let config = minimal();
        assert_eq!(config.name(), "minimal");
        assert_eq!(config.version(), ConfigVersion::V2);
        assert_eq!(config.colorspaces().len(), 3);
        assert_eq!(config.roles().compositing_log(), Some("lg2"));
    }

    #[test]
    fn role_lookup_and_aliases() {
        let config = minimal();
        assert_eq!(config.colorspace("compositing_log").unwrap().name(), "lg2");
        assert_eq!(config.colorspace("LOG2").unwrap().name(), "lg2");
        assert!(config.colorspace("nope").is_none());
    }

    #[test]
    fn processor_uses_inverse_when_to_reference_missing() {
        let p = minimal().processor("compositing_log", "scene_linear").unwrap();
        assert_eq!(p.ops().len(), 1);
        assert!(matches!(p.ops()[0], ProcessorOp::Log { forward: false, .. }));
    }

    #[test]
    fn same_space_and_data_are_noops() {
        let config = minimal();
        assert!(config.processor("lg2", "compositing_log").unwrap().is_no_op());
        assert!(config.processor("lg2", "raw").unwrap().is_no_op());
        assert!(!config.processor("lg2", "linear").unwrap().is_no_op());
    }

    #[test]
    fn missing_space_errors() {
        let err = minimal().processor("scene_linear", "color_timing").unwrap_err();
        assert!(matches!(err, OcioError::ColorSpaceNotFound { ref name } if name == "color_timing"));
    }

    #[test]
    fn dangling_role_rejected() {
        let yaml = "ocio_profile_version: 2\nroles: {scene_linear: missing}\ncolorspaces: []\n";
        let err = Config::from_yaml_str(yaml, PathBuf::from(".")).unwrap_err();
        assert!(matches!(err, OcioError::DanglingRole { .. }));
    }

    #[test]
    fn version_string_accepted() {
        let yaml = "ocio_profile_version: \"1\"\ncolorspaces: []\n";
        let config = Config::from_yaml_str(yaml, PathBuf::from(".")).unwrap();
        assert_eq!(config.version(), ConfigVersion::V1);

        let yaml = "ocio_profile_version: 3\n";
        assert!(Config::from_yaml_str(yaml, PathBuf::from(".")).is_err());
    }

    #[test]
    fn missing_file() {
        let err = Config::from_file("/nonexistent/config.ocio").unwrap_err();
        assert!(matches!(err, OcioError::ConfigNotFound { .. }));
    }
}
