//! The OCIO Blink node.
//!
//! Lifecycle, as driven by a host:
//!
//! 1. [`OcioBlinkNode::validate`] resolves the selected operation to a
//!    processor, assembles the kernel program and samples the LUT. The result
//!    is one immutable [`ValidatedCycle`], replaced wholesale on the next
//!    validate.
//! 2. [`OcioBlinkNode::render_stripe`] renders one output plane. Any number of
//!    stripes may render concurrently; they only read the cycle.
//!
//! A configuration error blocks rendering until a later validate succeeds.
//! Render errors abandon the stripe and are reported once.

use std::sync::Arc;

use blink_compute::DeviceSet;

use crate::assembler::{GeneratedProgramSource, Lut3d, ShaderTextAssembler};
use crate::color::{ColorConfig, ColorProcessor};
use crate::error::{NodeError, NodeResult};
use crate::executor::{DualPathExecutor, ExecPath};
use crate::knobs::Knobs;
use crate::plane::{Box2, ChannelSet, ImagePlane, PlaneSource};
use crate::report::FailureReporter;
use crate::resolver::{Operation, TransformResolver};

/// Shown by [`OcioBlinkNode::gpu_name`] when there is no GPU.
pub const NO_GPU_NAME: &str = "Not available";

/// Which channels the node writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMask {
    /// Output is the input; nothing is written.
    None,
    /// Every channel may change.
    All,
}

/// Input region and channels needed for an output region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub bounds: Box2,
    pub channels: ChannelSet,
}

/// State produced by one successful validate.
pub struct ValidatedCycle {
    operation: Operation,
    processor: Arc<dyn ColorProcessor>,
    program: Arc<GeneratedProgramSource>,
    lut: Lut3d,
    no_op: bool,
    executor: DualPathExecutor,
}

impl std::fmt::Debug for ValidatedCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedCycle")
            .field("operation", &self.operation)
            .field("no_op", &self.no_op)
            .field("program_lines", &self.program.line_count())
            .field("lut_edge_len", &self.lut.edge_len)
            .finish_non_exhaustive()
    }
}

impl ValidatedCycle {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn processor(&self) -> &Arc<dyn ColorProcessor> {
        &self.processor
    }

    pub fn program(&self) -> &GeneratedProgramSource {
        &self.program
    }

    /// The sampled LUT. Kept with the cycle; the wrapper does not read it.
    pub fn lut(&self) -> &Lut3d {
        &self.lut
    }

    pub fn is_no_op(&self) -> bool {
        self.no_op
    }

    pub fn executor(&self) -> &DualPathExecutor {
        &self.executor
    }
}

#[derive(Debug, Clone)]
enum CycleState {
    Unvalidated,
    Valid(Arc<ValidatedCycle>),
    Failed(NodeError),
}

/// Color transform node with a generated kernel and a CPU fallback.
pub struct OcioBlinkNode {
    knobs: Knobs,
    resolver: TransformResolver,
    devices: DeviceSet,
    reporter: FailureReporter,
    input: Option<Arc<dyn PlaneSource>>,
    state: CycleState,
}

impl std::fmt::Debug for OcioBlinkNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcioBlinkNode")
            .field("knobs", &self.knobs)
            .field("devices", &self.devices)
            .field("connected", &self.input.is_some())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl OcioBlinkNode {
    pub fn new(config: Arc<dyn ColorConfig>, devices: DeviceSet, knobs: Knobs) -> Self {
        Self {
            knobs,
            resolver: TransformResolver::new(config),
            devices,
            reporter: FailureReporter::default(),
            input: None,
            state: CycleState::Unvalidated,
        }
    }

    pub fn with_reporter(mut self, reporter: FailureReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Connects input 0.
    pub fn set_input(&mut self, input: Arc<dyn PlaneSource>) {
        self.input = Some(input);
    }

    pub fn knobs(&self) -> &Knobs {
        &self.knobs
    }

    /// Replaces the knobs; the node must be validated again.
    pub fn set_knobs(&mut self, knobs: Knobs) {
        self.knobs = knobs;
        self.state = CycleState::Unvalidated;
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// The current cycle, if the last validate succeeded.
    pub fn cycle(&self) -> Option<&Arc<ValidatedCycle>> {
        match &self.state {
            CycleState::Valid(cycle) => Some(cycle),
            _ => None,
        }
    }

    /// Resolves the operation and rebuilds the program and LUT.
    pub fn validate(&mut self) -> NodeResult<Arc<ValidatedCycle>> {
        match self.build_cycle() {
            Ok(cycle) => {
                let cycle = Arc::new(cycle);
                self.state = CycleState::Valid(Arc::clone(&cycle));
                Ok(cycle)
            }
            Err(err) => {
                self.reporter.report(&err, None);
                self.state = CycleState::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn build_cycle(&self) -> NodeResult<ValidatedCycle> {
        self.knobs.validate()?;
        let operation = self.knobs.operation;
        let processor = self.resolver.resolve(operation)?;

        let assembler =
            ShaderTextAssembler::new(self.knobs.function_name.as_str(), self.knobs.lut3d_edge_len);
        let (program, lut) = assembler.assemble(processor.as_ref())?;
        let program = Arc::new(program);
        let no_op = processor.is_no_op();

        tracing::debug!(
            operation = operation.label(),
            no_op,
            lut_floats = lut.data.len(),
            "validated:\n{}",
            program.text()
        );

        let executor =
            DualPathExecutor::new(Arc::clone(&processor), Arc::clone(&program), self.devices.clone());
        Ok(ValidatedCycle {
            operation,
            processor,
            program,
            lut,
            no_op,
            executor,
        })
    }

    /// Channels written by the node.
    pub fn out_channels(&self) -> ChannelMask {
        match self.cycle() {
            Some(cycle) if cycle.is_no_op() => ChannelMask::None,
            _ => ChannelMask::All,
        }
    }

    /// Input needed for `bounds` x `channels`: the same region and channels.
    pub fn request(&self, bounds: Box2, channels: &ChannelSet) -> InputRequest {
        InputRequest {
            bounds,
            channels: channels.clone(),
        }
    }

    pub fn use_stripes(&self) -> bool {
        true
    }

    pub fn stripe_height(&self) -> u32 {
        self.knobs.stripe_height.max(1)
    }

    /// Name of the GPU, or [`NO_GPU_NAME`].
    pub fn gpu_name(&self) -> &str {
        self.devices.gpu_name().unwrap_or(NO_GPU_NAME)
    }

    /// Renders `output` over its bounds and channels.
    ///
    /// Planes without red, green and blue, and every plane of a no-op
    /// transform, are copied from the input unchanged.
    pub fn render_stripe(&self, output: &mut ImagePlane) -> NodeResult<()> {
        let cycle = match &self.state {
            CycleState::Valid(cycle) => cycle,
            CycleState::Failed(err) => return Err(err.clone()),
            CycleState::Unvalidated => {
                return Err(NodeError::Configuration("node has not been validated".into()));
            }
        };
        let Some(input) = self.input.as_deref() else {
            let err = NodeError::Execution("input 0 is not connected".into());
            self.reporter.report(&err, None);
            return Err(err);
        };

        if cycle.is_no_op() || !output.channels().has_rgb() {
            return input.fetch_plane(output).inspect_err(|err| self.reporter.report(err, None));
        }

        let path = if self.knobs.use_kernel {
            ExecPath::Kernel
        } else {
            ExecPath::Cpu
        };
        cycle
            .executor
            .render_tile(path, input, output, self.knobs.use_gpu_if_available)
            .inspect_err(|err| {
                tracing::debug!(path = path.name(), tile = %output.bounds(), "tile abandoned");
                self.reporter.report(err, Some(cycle.program()));
            })
    }
}
