//! Operation selection and processor lookup.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use blink_ocio::role_names;
use serde::{Deserialize, Serialize};

use crate::color::{ColorConfig, ColorProcessor};
use crate::error::{NodeError, NodeResult};

/// Direction of the log/linear conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `compositing_log` to `scene_linear`.
    #[default]
    LogToLin,
    /// `scene_linear` to `compositing_log`.
    LinToLog,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::LogToLin, Operation::LinToLog];

    /// `(source, destination)` roles.
    pub fn roles(&self) -> (&'static str, &'static str) {
        match self {
            Self::LogToLin => (role_names::COMPOSITING_LOG, role_names::SCENE_LINEAR),
            Self::LinToLog => (role_names::SCENE_LINEAR, role_names::COMPOSITING_LOG),
        }
    }

    /// Menu label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LogToLin => "log to lin",
            Self::LinToLog => "lin to log",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], " ").trim() {
            "log to lin" | "logtolin" => Ok(Self::LogToLin),
            "lin to log" | "lintolog" => Ok(Self::LinToLog),
            _ => Err(format!(
                "unknown operation '{s}' (expected 'log_to_lin' or 'lin_to_log')"
            )),
        }
    }
}

/// Maps an [`Operation`] to a processor from an injected configuration.
#[derive(Clone)]
pub struct TransformResolver {
    config: Arc<dyn ColorConfig>,
}

impl fmt::Debug for TransformResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformResolver").finish_non_exhaustive()
    }
}

impl TransformResolver {
    pub fn new(config: Arc<dyn ColorConfig>) -> Self {
        Self { config }
    }

    /// Processor for `op`; any lookup failure is a configuration error.
    pub fn resolve(&self, op: Operation) -> NodeResult<Arc<dyn ColorProcessor>> {
        let (src, dst) = op.roles();
        let processor = self
            .config
            .processor(src, dst)
            .map_err(|e| NodeError::Configuration(e.to_string()))?;
        tracing::debug!(
            operation = op.label(),
            src,
            dst,
            no_op = processor.is_no_op(),
            "resolved processor"
        );
        Ok(processor)
    }
}
