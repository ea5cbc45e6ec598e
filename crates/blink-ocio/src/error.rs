//! Errors raised while loading configs, building processors and emitting
//! shader text.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type OcioResult<T> = Result<T, OcioError>;

/// Color management failure.
#[derive(Debug, Error)]
pub enum OcioError {
    /// Config file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config text is not valid YAML for the config layout.
    #[error("bad config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Nothing exists at the config path.
    #[error("no config at {path}")]
    ConfigNotFound {
        /// Path that was tried.
        path: PathBuf,
    },

    /// `ocio_profile_version` is neither 1 nor 2.
    #[error("ocio_profile_version {version} is not supported")]
    UnsupportedVersion {
        /// Version as written in the file.
        version: String,
    },

    /// Neither a role nor a color space of that name exists.
    #[error("no color space or role named '{name}'")]
    ColorSpaceNotFound {
        /// Requested role or color space name.
        name: String,
    },

    /// Role points at a color space the config does not define.
    #[error("role '{role}' refers to undefined color space '{colorspace}'")]
    DanglingRole {
        /// Role name.
        role: String,
        /// Color space the role maps to.
        colorspace: String,
    },

    /// Transform parameters cannot be compiled into ops.
    #[error("bad transform: {reason}")]
    InvalidTransform {
        /// What is wrong with the transform.
        reason: String,
    },

    /// Pixel buffer does not match its declared shape.
    #[error("image descriptor error: {0}")]
    ImageDesc(String),

    /// Shader text or LUT request could not be honored.
    #[error("GPU shader error: {0}")]
    Gpu(String),
}

impl OcioError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidTransform {
            reason: reason.into(),
        }
    }
}
