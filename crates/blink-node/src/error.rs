//! Error taxonomy for the node.
//!
//! [`NodeError::Configuration`] is scoped to a validate cycle and blocks
//! rendering until the next successful validate. Every other variant is
//! scoped to one tile: the tile is abandoned and nothing is retried.

use blink_compute::{ComputeError, KernelError};
use thiserror::Error;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Failures surfaced by validate and render.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NodeError {
    /// Color configuration or processor lookup failed.
    #[error("OCIO configuration error: {0}")]
    Configuration(String),

    /// A pixel tile could not be wrapped as a compute image.
    #[error("cannot adapt tile for the compute device: {0}")]
    TileAdaptation(String),

    /// The assembled kernel did not parse or validate.
    #[error("kernel parse error at line {line}: {message}")]
    KernelParse {
        /// 1-based line within the assembled program.
        line: u32,
        /// Compiler message.
        message: String,
    },

    /// The kernel compiled but failed while running.
    #[error("kernel execution error: {message}")]
    KernelExecution {
        /// Device or interpreter message.
        message: String,
    },

    /// CPU path or host contract failure.
    #[error("execution error: {0}")]
    Execution(String),
}

impl NodeError {
    /// True for errors scoped to a single tile.
    pub fn is_tile_scoped(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }

    /// Short name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::TileAdaptation(_) => "tile-adaptation",
            Self::KernelParse { .. } => "kernel-parse",
            Self::KernelExecution { .. } => "kernel-execution",
            Self::Execution(_) => "execution",
        }
    }
}

impl From<KernelError> for NodeError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Parse { line, message } => Self::KernelParse { line, message },
            KernelError::Runtime { message } => Self::KernelExecution { message },
        }
    }
}

impl From<ComputeError> for NodeError {
    fn from(err: ComputeError) -> Self {
        Self::KernelExecution {
            message: err.to_string(),
        }
    }
}

/// Host plane contract violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaneError {
    /// Write access without `make_writable`.
    #[error("plane is not writable")]
    NotWritable,

    /// Storage is shared with another plane.
    #[error("plane storage is shared; call make_unique first")]
    Shared,

    /// Descriptor and buffer disagree.
    #[error("plane shape mismatch: {0}")]
    Shape(String),
}

impl From<PlaneError> for NodeError {
    fn from(err: PlaneError) -> Self {
        Self::Execution(err.to_string())
    }
}
