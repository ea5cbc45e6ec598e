//! Failure reporting.
//!
//! Every render error is reported once: a one-line summary goes to the host
//! error channel ([`ErrorSink`]), and verbose detail (for parse failures the
//! whole numbered program) goes to `tracing` at debug level.

use std::sync::{Arc, Mutex, PoisonError};

use crate::assembler::GeneratedProgramSource;
use crate::error::NodeError;

/// Host error channel.
pub trait ErrorSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Forwards host messages to `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, message: &str) {
        tracing::error!(target: "blink_node::host", "{message}");
    }
}

/// Keeps every host message; used by tests and batch tools.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

/// Splits failures into the host summary and the diagnostic log.
#[derive(Clone)]
pub struct FailureReporter {
    sink: Arc<dyn ErrorSink>,
}

impl Default for FailureReporter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for FailureReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureReporter").finish_non_exhaustive()
    }
}

impl FailureReporter {
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self { sink }
    }

    /// Reports `err`. `program` is the source that was being built, if any.
    pub fn report(&self, err: &NodeError, program: Option<&GeneratedProgramSource>) {
        if let (NodeError::KernelParse { line, message }, Some(program)) = (err, program) {
            tracing::debug!(
                line,
                message = message.as_str(),
                "kernel program failed to parse:\n{}",
                program.listing()
            );
        } else {
            tracing::debug!(kind = err.kind(), tile_scoped = err.is_tile_scoped(), "{err:?}");
        }
        self.sink.report(&summary(err));
    }
}

/// First line of the error's message.
pub fn summary(err: &NodeError) -> String {
    let text = err.to_string();
    match text.lines().next() {
        Some(first) if first.len() < text.len() => first.trim_end().to_string(),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_message_per_failure() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = FailureReporter::new(sink.clone());
        let program = GeneratedProgramSource::new("fn f(", "f");

        reporter.report(
            &NodeError::KernelParse {
                line: 1,
                message: "expected ')'\n  ┌─ wgsl:1:6".into(),
            },
            Some(&program),
        );
        reporter.report(&NodeError::Execution("boom".into()), None);

        assert_eq!(
            sink.messages(),
            ["kernel parse error at line 1: expected ')'", "execution error: boom"]
        );
    }
}
