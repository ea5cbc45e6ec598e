//! Tree-walking evaluator for validated naga modules.
//!
//! Covers the subset of WGSL that per-pixel kernels use: scalars and
//! vectors of `f32`/`i32`/`u32`/`bool`, local arrays and structs, control
//! flow, helper function calls and the common math builtins. Storage access
//! is limited to the three ABI bindings.
//!
//! Each invocation owns exactly one pixel of `dst`. Any write outside it is
//! a runtime fault, which keeps parallel invocations disjoint.

use naga::{
    BinaryOperator, Binding, BuiltIn, Expression, Function, Handle, Literal, MathFunction,
    RelationalFunction, ScalarKind, Statement, SwitchValue, TypeInner, UnaryOperator,
};
use rayon::prelude::*;

use crate::image::Dims;
use crate::program::{Bindings, Program};
use crate::KernelError;

/// Upper bound on iterations of a single loop statement.
const LOOP_LIMIT: u64 = 1 << 20;
/// Upper bound on call depth.
const CALL_DEPTH_LIMIT: u32 = 64;
/// Pixels per rayon task.
const MIN_PIXELS_PER_TASK: usize = 256;

type Result<T> = std::result::Result<T, KernelError>;

fn fault<T>(message: impl Into<String>) -> Result<T> {
    Err(KernelError::runtime(message))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scalar {
    F32(f32),
    I32(i32),
    U32(u32),
    Bool(bool),
}

impl Scalar {
    fn zero(kind: ScalarKind) -> Result<Self> {
        Ok(match kind {
            ScalarKind::Float | ScalarKind::AbstractFloat => Self::F32(0.0),
            ScalarKind::Sint | ScalarKind::AbstractInt => Self::I32(0),
            ScalarKind::Uint => Self::U32(0),
            ScalarKind::Bool => Self::Bool(false),
        })
    }

    fn as_f32(self) -> f32 {
        match self {
            Self::F32(v) => v,
            Self::I32(v) => v as f32,
            Self::U32(v) => v as f32,
            Self::Bool(v) => v as u8 as f32,
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            Self::F32(v) => v as i32,
            Self::I32(v) => v,
            Self::U32(v) => v as i32,
            Self::Bool(v) => v as i32,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Self::F32(v) => v as u32,
            Self::I32(v) => v as u32,
            Self::U32(v) => v,
            Self::Bool(v) => v as u32,
        }
    }

    fn as_bool(self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(v),
            other => fault(format!("expected bool, got {other:?}")),
        }
    }

    fn bits(self) -> u32 {
        match self {
            Self::F32(v) => v.to_bits(),
            Self::I32(v) => v as u32,
            Self::U32(v) => v,
            Self::Bool(v) => v as u32,
        }
    }

    fn convert(self, kind: ScalarKind) -> Result<Self> {
        Ok(match kind {
            ScalarKind::Float | ScalarKind::AbstractFloat => Self::F32(self.as_f32()),
            ScalarKind::Sint | ScalarKind::AbstractInt => Self::I32(self.as_i32()),
            ScalarKind::Uint => Self::U32(self.as_u32()),
            ScalarKind::Bool => Self::Bool(match self {
                Self::F32(v) => v != 0.0,
                Self::I32(v) => v != 0,
                Self::U32(v) => v != 0,
                Self::Bool(v) => v,
            }),
        })
    }

    fn bitcast(self, kind: ScalarKind) -> Result<Self> {
        let bits = self.bits();
        Ok(match kind {
            ScalarKind::Float => Self::F32(f32::from_bits(bits)),
            ScalarKind::Sint => Self::I32(bits as i32),
            ScalarKind::Uint => Self::U32(bits),
            other => return fault(format!("cannot bitcast to {other:?}")),
        })
    }
}

/// Brings two operands to a common kind: float wins, then unsigned.
fn unify(a: Scalar, b: Scalar) -> (Scalar, Scalar) {
    use Scalar::*;
    match (a, b) {
        (F32(_), F32(_)) | (I32(_), I32(_)) | (U32(_), U32(_)) | (Bool(_), Bool(_)) => (a, b),
        (F32(_), _) | (_, F32(_)) => (F32(a.as_f32()), F32(b.as_f32())),
        (U32(_), _) | (_, U32(_)) => (U32(a.as_u32()), U32(b.as_u32())),
        _ => (I32(a.as_i32()), I32(b.as_i32())),
    }
}

/// Where a pointer points.
#[derive(Debug, Clone, PartialEq)]
enum Root {
    Local(usize),
    Src,
    Dst,
    Dims,
}

#[derive(Debug, Clone, PartialEq)]
struct Place {
    root: Root,
    path: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Scalar(Scalar),
    Vector { len: u8, lanes: [Scalar; 4] },
    /// Arrays, structs and matrix columns.
    Composite(Vec<Value>),
    Pointer(Place),
    Void,
}

impl Value {
    fn f32(v: f32) -> Self {
        Self::Scalar(Scalar::F32(v))
    }

    fn vector(lanes: &[Scalar]) -> Result<Self> {
        if !(2..=4).contains(&lanes.len()) {
            return fault(format!("vector of {} components", lanes.len()));
        }
        let mut out = [Scalar::F32(0.0); 4];
        out[..lanes.len()].copy_from_slice(lanes);
        Ok(Self::Vector {
            len: lanes.len() as u8,
            lanes: out,
        })
    }

    fn uvec(lanes: &[u32]) -> Result<Self> {
        let lanes: Vec<Scalar> = lanes.iter().map(|&v| Scalar::U32(v)).collect();
        Self::vector(&lanes)
    }

    fn scalar(&self) -> Result<Scalar> {
        match self {
            Self::Scalar(s) => Ok(*s),
            other => fault(format!("expected scalar, got {other:?}")),
        }
    }

    fn as_bool(&self) -> Result<bool> {
        self.scalar()?.as_bool()
    }

    fn index(&self) -> Result<u32> {
        match self.scalar()? {
            Scalar::I32(v) if v < 0 => fault(format!("negative index {v}")),
            Scalar::I32(v) => Ok(v as u32),
            Scalar::U32(v) => Ok(v),
            other => fault(format!("invalid index {other:?}")),
        }
    }

    /// Lanes of a scalar or vector.
    fn lanes(&self) -> Result<&[Scalar]> {
        match self {
            Self::Scalar(s) => Ok(std::slice::from_ref(s)),
            Self::Vector { len, lanes } => Ok(&lanes[..*len as usize]),
            other => fault(format!("expected scalar or vector, got {other:?}")),
        }
    }

    fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    /// Applies `f` lane by lane, keeping the shape.
    fn map(&self, mut f: impl FnMut(Scalar) -> Result<Scalar>) -> Result<Self> {
        match self {
            Self::Scalar(s) => Ok(Self::Scalar(f(*s)?)),
            Self::Vector { len, lanes } => {
                let mut out = *lanes;
                for lane in &mut out[..*len as usize] {
                    *lane = f(*lane)?;
                }
                Ok(Self::Vector {
                    len: *len,
                    lanes: out,
                })
            }
            other => fault(format!("expected scalar or vector, got {other:?}")),
        }
    }

    /// Combines lane by lane, broadcasting scalars against vectors.
    fn zip(&self, other: &Self, mut f: impl FnMut(Scalar, Scalar) -> Result<Scalar>) -> Result<Self> {
        let a = self.lanes()?;
        let b = other.lanes()?;
        let n = a.len().max(b.len());
        if a.len() != b.len() && a.len() != 1 && b.len() != 1 {
            return fault(format!("vector size mismatch: {} vs {}", a.len(), b.len()));
        }
        let mut out = [Scalar::F32(0.0); 4];
        for (i, lane) in out[..n].iter_mut().enumerate() {
            let x = a[if a.len() == 1 { 0 } else { i }];
            let y = b[if b.len() == 1 { 0 } else { i }];
            *lane = f(x, y)?;
        }
        if self.is_vector() || other.is_vector() {
            Ok(Self::Vector {
                len: n as u8,
                lanes: out,
            })
        } else {
            Ok(Self::Scalar(out[0]))
        }
    }

    fn element(&self, index: u32) -> Result<Value> {
        match self {
            Self::Vector { len, lanes } if index < *len as u32 => {
                Ok(Self::Scalar(lanes[index as usize]))
            }
            Self::Composite(items) => items
                .get(index as usize)
                .cloned()
                .ok_or_else(|| KernelError::runtime(format!("index {index} out of bounds"))),
            other => fault(format!("cannot index {other:?} with {index}")),
        }
    }

    fn element_mut(&mut self, index: u32) -> Result<ElementMut<'_>> {
        match self {
            Self::Vector { len, lanes } if index < *len as u32 => {
                Ok(ElementMut::Lane(&mut lanes[index as usize]))
            }
            Self::Composite(items) => match items.get_mut(index as usize) {
                Some(item) => Ok(ElementMut::Value(item)),
                None => fault(format!("index {index} out of bounds")),
            },
            _ => fault(format!("cannot index value with {index}")),
        }
    }
}

enum ElementMut<'a> {
    Lane(&'a mut Scalar),
    Value(&'a mut Value),
}

/// Non-local control flow out of a block.
enum Flow {
    Next,
    Break,
    Continue,
    Return(Value),
}

/// One function activation.
struct Frame<'m> {
    function: &'m Function,
    args: Vec<Value>,
    cache: Vec<Option<Value>>,
    locals: Vec<Value>,
}

/// Per-invocation state.
struct Invocation<'m, 'd> {
    module: &'m naga::Module,
    bindings: Bindings,
    src: &'m [f32],
    dims: Dims,
    /// This invocation's pixel of `dst` and its offset in the full buffer.
    dst: &'d mut [f32],
    dst_base: usize,
    dst_len: usize,
    depth: u32,
}

/// Builtin values of one invocation.
#[derive(Debug, Clone, Copy)]
struct Ids {
    global: u32,
    workgroup_size: u32,
    workgroups: u32,
}

/// Runs `program` once per pixel of `dims`.
pub(crate) fn run(
    program: &Program,
    src: &[f32],
    dst: &mut [f32],
    dims: Dims,
    parallel: bool,
) -> Result<()> {
    if dst.len() != dims.len() {
        return fault(format!(
            "output holds {} floats, {}x{}x{} needs {}",
            dst.len(),
            dims.width,
            dims.height,
            dims.channels,
            dims.len()
        ));
    }
    let pixels = dims.pixel_count();
    let channels = dims.channels as usize;
    if pixels == 0 || channels == 0 {
        return Ok(());
    }

    let workgroup_size = program.workgroup_size().max(1);
    let workgroups = pixels.div_ceil(workgroup_size as usize);
    let invocations = workgroups * workgroup_size as usize;
    let dst_len = dst.len();
    let entry = &program.entry_point().function;

    let invoke = |global: usize, window: &mut [f32]| -> Result<()> {
        let mut inv = Invocation {
            module: program.module(),
            bindings: program.bindings(),
            src,
            dims,
            dst: window,
            dst_base: global * channels,
            dst_len,
            depth: 0,
        };
        let ids = Ids {
            global: global as u32,
            workgroup_size,
            workgroups: workgroups as u32,
        };
        let args = entry
            .arguments
            .iter()
            .map(|arg| match &arg.binding {
                Some(Binding::BuiltIn(builtin)) => builtin_value(*builtin, ids),
                _ => fault(format!(
                    "entry argument `{}` must be a builtin",
                    arg.name.as_deref().unwrap_or("_")
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        inv.call(entry, args).map(|_| ())
    };

    if parallel {
        dst.par_chunks_mut(channels)
            .with_min_len(MIN_PIXELS_PER_TASK)
            .enumerate()
            .try_for_each(|(px, window)| invoke(px, window))?;
    } else {
        for (px, window) in dst.chunks_mut(channels).enumerate() {
            invoke(px, window)?;
        }
    }

    // Padding invocations of the last workgroup own no pixel.
    for global in pixels..invocations {
        invoke(global, &mut [])?;
    }
    Ok(())
}

fn builtin_value(builtin: BuiltIn, ids: Ids) -> Result<Value> {
    let local = ids.global % ids.workgroup_size;
    match builtin {
        BuiltIn::GlobalInvocationId => Value::uvec(&[ids.global, 0, 0]),
        BuiltIn::LocalInvocationId => Value::uvec(&[local, 0, 0]),
        BuiltIn::LocalInvocationIndex => Ok(Value::Scalar(Scalar::U32(local))),
        BuiltIn::WorkGroupId => Value::uvec(&[ids.global / ids.workgroup_size, 0, 0]),
        BuiltIn::NumWorkGroups => Value::uvec(&[ids.workgroups, 1, 1]),
        other => fault(format!("unsupported builtin {other:?}")),
    }
}

impl<'m> Invocation<'m, '_> {
    fn call(&mut self, function: &'m Function, args: Vec<Value>) -> Result<Value> {
        if self.depth >= CALL_DEPTH_LIMIT {
            return fault("call depth limit exceeded");
        }
        self.depth += 1;

        let mut frame = Frame {
            function,
            args,
            cache: vec![None; function.expressions.len()],
            locals: Vec::with_capacity(function.local_variables.len()),
        };
        for (_, local) in function.local_variables.iter() {
            let value = match local.init {
                Some(init) => self.eval(&mut frame, init)?,
                None => self.zero(local.ty)?,
            };
            frame.locals.push(value);
        }

        let flow = self.exec_block(&mut frame, &function.body)?;
        self.depth -= 1;
        match flow {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Void),
        }
    }

    fn exec_block(&mut self, frame: &mut Frame<'m>, block: &'m naga::Block) -> Result<Flow> {
        for stmt in block.iter() {
            match self.exec(frame, stmt)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, frame: &mut Frame<'m>, stmt: &'m Statement) -> Result<Flow> {
        match stmt {
            Statement::Emit(range) => {
                for handle in range.clone() {
                    let value = self.compute(frame, handle)?;
                    frame.cache[handle.index()] = Some(value);
                }
            }
            Statement::Block(block) => return self.exec_block(frame, block),
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                let branch = if self.eval(frame, *condition)?.as_bool()? {
                    accept
                } else {
                    reject
                };
                return self.exec_block(frame, branch);
            }
            Statement::Switch { selector, cases } => {
                let selector = self.eval(frame, *selector)?.scalar()?;
                let start = cases
                    .iter()
                    .position(|case| match case.value {
                        SwitchValue::I32(v) => selector.as_i32() == v,
                        SwitchValue::U32(v) => selector.as_u32() == v,
                        SwitchValue::Default => false,
                    })
                    .or_else(|| cases.iter().position(|c| c.value == SwitchValue::Default));
                if let Some(start) = start {
                    for case in &cases[start..] {
                        match self.exec_block(frame, &case.body)? {
                            Flow::Next if case.fall_through => continue,
                            Flow::Next | Flow::Break => break,
                            flow => return Ok(flow),
                        }
                    }
                }
            }
            Statement::Loop {
                body,
                continuing,
                break_if,
            } => {
                let mut iterations = 0u64;
                loop {
                    iterations += 1;
                    if iterations > LOOP_LIMIT {
                        return fault("loop iteration limit exceeded");
                    }
                    match self.exec_block(frame, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                    match self.exec_block(frame, continuing)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                    if let Some(cond) = break_if {
                        if self.eval(frame, *cond)?.as_bool()? {
                            break;
                        }
                    }
                }
            }
            Statement::Break => return Ok(Flow::Break),
            Statement::Continue => return Ok(Flow::Continue),
            Statement::Return { value } => {
                let value = match value {
                    Some(h) => self.eval(frame, *h)?,
                    None => Value::Void,
                };
                return Ok(Flow::Return(value));
            }
            Statement::Store { pointer, value } => {
                let place = self.pointer(frame, *pointer)?;
                let value = self.eval(frame, *value)?;
                self.store(frame, &place, value)?;
            }
            Statement::Call {
                function,
                arguments,
                result,
            } => {
                let args = arguments
                    .iter()
                    .map(|a| self.eval(frame, *a))
                    .collect::<Result<Vec<_>>>()?;
                let module = self.module;
                let callee = &module.functions[*function];
                let value = self.call(callee, args)?;
                if let Some(result) = result {
                    frame.cache[result.index()] = Some(value);
                }
            }
            other => return fault(format!("unsupported statement {other:?}")),
        }
        Ok(Flow::Next)
    }

    /// Value of an expression, computing constants and handles on first use.
    fn eval(&mut self, frame: &mut Frame<'m>, handle: Handle<Expression>) -> Result<Value> {
        if let Some(value) = &frame.cache[handle.index()] {
            return Ok(value.clone());
        }
        let value = self.compute(frame, handle)?;
        frame.cache[handle.index()] = Some(value.clone());
        Ok(value)
    }

    fn pointer(&mut self, frame: &mut Frame<'m>, handle: Handle<Expression>) -> Result<Place> {
        match self.eval(frame, handle)? {
            Value::Pointer(place) => Ok(place),
            other => fault(format!("expected pointer, got {other:?}")),
        }
    }

    fn compute(&mut self, frame: &mut Frame<'m>, handle: Handle<Expression>) -> Result<Value> {
        let function = frame.function;
        match &function.expressions[handle] {
            Expression::Literal(lit) => literal(*lit),
            Expression::Constant(c) => self.constant(self.module.constants[*c].init),
            Expression::ZeroValue(ty) => self.zero(*ty),
            Expression::Compose { ty, components } => {
                let values = components
                    .iter()
                    .map(|c| self.eval(frame, *c))
                    .collect::<Result<Vec<_>>>()?;
                self.compose(*ty, values)
            }
            Expression::Splat { size, value } => {
                let s = self.eval(frame, *value)?.scalar()?;
                Value::vector(&vec![s; *size as usize])
            }
            Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let v = self.eval(frame, *vector)?;
                let lanes = v.lanes()?;
                let picked = pattern[..*size as usize]
                    .iter()
                    .map(|c| {
                        lanes
                            .get(*c as usize)
                            .copied()
                            .ok_or_else(|| KernelError::runtime("swizzle out of range"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Value::vector(&picked)
            }
            Expression::FunctionArgument(i) => frame
                .args
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| KernelError::runtime(format!("missing argument {i}"))),
            Expression::GlobalVariable(g) => {
                let b = self.bindings;
                let root = if *g == b.src {
                    Root::Src
                } else if *g == b.dst {
                    Root::Dst
                } else if *g == b.dims {
                    Root::Dims
                } else {
                    return fault(format!(
                        "global `{}` is not a kernel binding",
                        self.module.global_variables[*g]
                            .name
                            .as_deref()
                            .unwrap_or("_")
                    ));
                };
                Ok(Value::Pointer(Place {
                    root,
                    path: Vec::new(),
                }))
            }
            Expression::LocalVariable(l) => Ok(Value::Pointer(Place {
                root: Root::Local(l.index()),
                path: Vec::new(),
            })),
            Expression::Access { base, index } => {
                let index = self.eval(frame, *index)?.index()?;
                self.access(frame, *base, index)
            }
            Expression::AccessIndex { base, index } => self.access(frame, *base, *index),
            Expression::Load { pointer } => {
                let place = self.pointer(frame, *pointer)?;
                self.load(frame, &place)
            }
            Expression::Unary { op, expr } => {
                let v = self.eval(frame, *expr)?;
                unary(*op, &v)
            }
            Expression::Binary { op, left, right } => {
                let a = self.eval(frame, *left)?;
                let b = self.eval(frame, *right)?;
                binary(*op, &a, &b)
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                let cond = self.eval(frame, *condition)?;
                let t = self.eval(frame, *accept)?;
                let f = self.eval(frame, *reject)?;
                match cond {
                    Value::Scalar(c) => Ok(if c.as_bool()? { t } else { f }),
                    Value::Vector { len, lanes } => {
                        let (tl, fl) = (t.lanes()?, f.lanes()?);
                        let picked = (0..len as usize)
                            .map(|i| -> Result<Scalar> {
                                Ok(if lanes[i].as_bool()? { tl[i] } else { fl[i] })
                            })
                            .collect::<Result<Vec<_>>>()?;
                        Value::vector(&picked)
                    }
                    other => fault(format!("invalid select condition {other:?}")),
                }
            }
            Expression::Relational { fun, argument } => {
                let v = self.eval(frame, *argument)?;
                relational(*fun, &v)
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                ..
            } => {
                let a = self.eval(frame, *arg)?;
                let b = arg1.map(|h| self.eval(frame, h)).transpose()?;
                let c = arg2.map(|h| self.eval(frame, h)).transpose()?;
                math(*fun, &a, b.as_ref(), c.as_ref())
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => {
                let v = self.eval(frame, *expr)?;
                match convert {
                    Some(_) => v.map(|s| s.convert(*kind)),
                    None => v.map(|s| s.bitcast(*kind)),
                }
            }
            Expression::ArrayLength(expr) => match self.pointer(frame, *expr)?.root {
                Root::Src => Ok(Value::Scalar(Scalar::U32(self.src.len() as u32))),
                Root::Dst => Ok(Value::Scalar(Scalar::U32(self.dst_len as u32))),
                _ => fault("arrayLength of a non-storage array"),
            },
            // Filled in by the `Call` statement.
            Expression::CallResult(_) => fault("call result read before the call"),
            other => fault(format!("unsupported expression {other:?}")),
        }
    }

    fn access(&mut self, frame: &mut Frame<'m>, base: Handle<Expression>, index: u32) -> Result<Value> {
        match self.eval(frame, base)? {
            Value::Pointer(mut place) => {
                place.path.push(index);
                Ok(Value::Pointer(place))
            }
            value => value.element(index),
        }
    }

    fn load(&self, frame: &Frame<'m>, place: &Place) -> Result<Value> {
        match place.root {
            Root::Local(i) => {
                let mut value = frame
                    .locals
                    .get(i)
                    .ok_or_else(|| KernelError::runtime("unknown local"))?;
                for &index in &place.path {
                    match value.element_ref(index)? {
                        ElementRef::Lane(s) => return Ok(Value::Scalar(s)),
                        ElementRef::Value(v) => value = v,
                    }
                }
                Ok(value.clone())
            }
            Root::Src => {
                let i = single_index(place)?;
                self.src
                    .get(i)
                    .map(|v| Value::f32(*v))
                    .ok_or_else(|| KernelError::runtime(format!("src[{i}] out of bounds")))
            }
            Root::Dst => {
                let i = single_index(place)?;
                match i.checked_sub(self.dst_base).and_then(|o| self.dst.get(o)) {
                    Some(v) => Ok(Value::f32(*v)),
                    None => fault(format!(
                        "dst[{i}] is outside the pixel of invocation {}",
                        self.pixel()
                    )),
                }
            }
            Root::Dims => {
                let dims = Value::uvec(&self.dims.uniform())?;
                match place.path.as_slice() {
                    [] => Ok(dims),
                    [i] => dims.element(*i),
                    _ => fault("invalid dims access"),
                }
            }
        }
    }

    fn store(&mut self, frame: &mut Frame<'m>, place: &Place, value: Value) -> Result<()> {
        match place.root {
            Root::Local(i) => match frame.locals.get_mut(i) {
                Some(target) => store_path(target, &place.path, value),
                None => fault("unknown local"),
            },
            Root::Dst => {
                let i = single_index(place)?;
                let v = value.scalar()?.as_f32();
                let pixel = self.pixel();
                match i.checked_sub(self.dst_base).and_then(|o| self.dst.get_mut(o)) {
                    Some(slot) => {
                        *slot = v;
                        Ok(())
                    }
                    None => fault(format!(
                        "dst[{i}] is outside the pixel of invocation {pixel}"
                    )),
                }
            }
            Root::Src | Root::Dims => fault("store to read-only binding"),
        }
    }

    fn pixel(&self) -> usize {
        self.dst_base / (self.dims.channels.max(1) as usize)
    }

    fn zero(&self, ty: Handle<naga::Type>) -> Result<Value> {
        match &self.module.types[ty].inner {
            TypeInner::Scalar(s) => Ok(Value::Scalar(Scalar::zero(s.kind)?)),
            TypeInner::Vector { size, scalar } => {
                Value::vector(&vec![Scalar::zero(scalar.kind)?; *size as usize])
            }
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = Value::vector(&vec![Scalar::zero(scalar.kind)?; *rows as usize])?;
                Ok(Value::Composite(vec![column; *columns as usize]))
            }
            TypeInner::Array {
                base,
                size: naga::ArraySize::Constant(n),
                ..
            } => {
                let item = self.zero(*base)?;
                Ok(Value::Composite(vec![item; n.get() as usize]))
            }
            TypeInner::Struct { members, .. } => members
                .iter()
                .map(|m| self.zero(m.ty))
                .collect::<Result<Vec<_>>>()
                .map(Value::Composite),
            other => fault(format!("cannot zero-initialize {other:?}")),
        }
    }

    fn compose(&self, ty: Handle<naga::Type>, values: Vec<Value>) -> Result<Value> {
        match &self.module.types[ty].inner {
            TypeInner::Vector { scalar, .. } => {
                let mut lanes = Vec::with_capacity(4);
                for v in &values {
                    for s in v.lanes()? {
                        lanes.push(s.convert(scalar.kind)?);
                    }
                }
                Value::vector(&lanes)
            }
            _ => Ok(Value::Composite(values)),
        }
    }

    /// Evaluates a constant expression from the module's global arena.
    fn constant(&self, handle: Handle<Expression>) -> Result<Value> {
        match &self.module.global_expressions[handle] {
            Expression::Literal(lit) => literal(*lit),
            Expression::Constant(c) => self.constant(self.module.constants[*c].init),
            Expression::ZeroValue(ty) => self.zero(*ty),
            Expression::Compose { ty, components } => {
                let values = components
                    .iter()
                    .map(|c| self.constant(*c))
                    .collect::<Result<Vec<_>>>()?;
                self.compose(*ty, values)
            }
            Expression::Splat { size, value } => {
                let s = self.constant(*value)?.scalar()?;
                Value::vector(&vec![s; *size as usize])
            }
            other => fault(format!("unsupported constant expression {other:?}")),
        }
    }
}

enum ElementRef<'a> {
    Lane(Scalar),
    Value(&'a Value),
}

impl Value {
    fn element_ref(&self, index: u32) -> Result<ElementRef<'_>> {
        match self {
            Self::Vector { len, lanes } if index < *len as u32 => {
                Ok(ElementRef::Lane(lanes[index as usize]))
            }
            Self::Composite(items) => match items.get(index as usize) {
                Some(item) => Ok(ElementRef::Value(item)),
                None => fault(format!("index {index} out of bounds")),
            },
            _ => fault(format!("cannot index value with {index}")),
        }
    }
}

fn store_path(target: &mut Value, path: &[u32], value: Value) -> Result<()> {
    let Some((&index, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    match target.element_mut(index)? {
        ElementMut::Lane(lane) if rest.is_empty() => {
            *lane = value.scalar()?;
            Ok(())
        }
        ElementMut::Lane(_) => fault("cannot index into a scalar"),
        ElementMut::Value(inner) => store_path(inner, rest, value),
    }
}

fn single_index(place: &Place) -> Result<usize> {
    match place.path.as_slice() {
        [i] => Ok(*i as usize),
        _ => fault("storage arrays take exactly one index"),
    }
}

fn literal(lit: Literal) -> Result<Value> {
    let s = match lit {
        Literal::F32(v) => Scalar::F32(v),
        Literal::I32(v) => Scalar::I32(v),
        Literal::U32(v) => Scalar::U32(v),
        Literal::Bool(v) => Scalar::Bool(v),
        Literal::AbstractInt(v) => Scalar::I32(v as i32),
        Literal::AbstractFloat(v) => Scalar::F32(v as f32),
        other => return fault(format!("unsupported literal {other:?}")),
    };
    Ok(Value::Scalar(s))
}

fn unary(op: UnaryOperator, v: &Value) -> Result<Value> {
    v.map(|s| {
        Ok(match (op, s) {
            (UnaryOperator::Negate, Scalar::F32(x)) => Scalar::F32(-x),
            (UnaryOperator::Negate, Scalar::I32(x)) => Scalar::I32(x.wrapping_neg()),
            (UnaryOperator::LogicalNot, Scalar::Bool(x)) => Scalar::Bool(!x),
            (UnaryOperator::BitwiseNot, Scalar::I32(x)) => Scalar::I32(!x),
            (UnaryOperator::BitwiseNot, Scalar::U32(x)) => Scalar::U32(!x),
            (op, s) => return fault(format!("invalid operand {s:?} for {op:?}")),
        })
    })
}

fn binary(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value> {
    if matches!(a, Value::Composite(_)) || matches!(b, Value::Composite(_)) {
        return fault(format!("{op:?} on matrices or arrays is not supported"));
    }
    a.zip(b, |x, y| binary_scalar(op, x, y))
}

fn binary_scalar(op: BinaryOperator, a: Scalar, b: Scalar) -> Result<Scalar> {
    use BinaryOperator as Op;
    use Scalar::*;

    let (a, b) = unify(a, b);
    Ok(match (op, a, b) {
        (Op::Add, F32(x), F32(y)) => F32(x + y),
        (Op::Subtract, F32(x), F32(y)) => F32(x - y),
        (Op::Multiply, F32(x), F32(y)) => F32(x * y),
        (Op::Divide, F32(x), F32(y)) => F32(x / y),
        (Op::Modulo, F32(x), F32(y)) => F32(x % y),

        (Op::Add, I32(x), I32(y)) => I32(x.wrapping_add(y)),
        (Op::Subtract, I32(x), I32(y)) => I32(x.wrapping_sub(y)),
        (Op::Multiply, I32(x), I32(y)) => I32(x.wrapping_mul(y)),
        (Op::Divide, I32(x), I32(y)) => I32(if y == 0 { x } else { x.wrapping_div(y) }),
        (Op::Modulo, I32(x), I32(y)) => I32(if y == 0 { 0 } else { x.wrapping_rem(y) }),

        (Op::Add, U32(x), U32(y)) => U32(x.wrapping_add(y)),
        (Op::Subtract, U32(x), U32(y)) => U32(x.wrapping_sub(y)),
        (Op::Multiply, U32(x), U32(y)) => U32(x.wrapping_mul(y)),
        (Op::Divide, U32(x), U32(y)) => U32(if y == 0 { x } else { x / y }),
        (Op::Modulo, U32(x), U32(y)) => U32(if y == 0 { 0 } else { x % y }),

        (Op::Equal, x, y) => Bool(x == y),
        (Op::NotEqual, x, y) => Bool(x != y),
        (Op::Less, x, y) => Bool(compare(x, y)?.is_lt()),
        (Op::LessEqual, x, y) => Bool(compare(x, y)?.is_le()),
        (Op::Greater, x, y) => Bool(compare(x, y)?.is_gt()),
        (Op::GreaterEqual, x, y) => Bool(compare(x, y)?.is_ge()),

        (Op::And | Op::LogicalAnd, Bool(x), Bool(y)) => Bool(x && y),
        (Op::InclusiveOr | Op::LogicalOr, Bool(x), Bool(y)) => Bool(x || y),
        (Op::ExclusiveOr, Bool(x), Bool(y)) => Bool(x ^ y),
        (Op::And, I32(x), I32(y)) => I32(x & y),
        (Op::InclusiveOr, I32(x), I32(y)) => I32(x | y),
        (Op::ExclusiveOr, I32(x), I32(y)) => I32(x ^ y),
        (Op::And, U32(x), U32(y)) => U32(x & y),
        (Op::InclusiveOr, U32(x), U32(y)) => U32(x | y),
        (Op::ExclusiveOr, U32(x), U32(y)) => U32(x ^ y),

        (Op::ShiftLeft, I32(x), y) => I32(x.wrapping_shl(y.as_u32())),
        (Op::ShiftRight, I32(x), y) => I32(x.wrapping_shr(y.as_u32())),
        (Op::ShiftLeft, U32(x), y) => U32(x.wrapping_shl(y.as_u32())),
        (Op::ShiftRight, U32(x), y) => U32(x.wrapping_shr(y.as_u32())),

        (op, x, y) => return fault(format!("invalid operands {x:?}, {y:?} for {op:?}")),
    })
}

/// Ordering of two unified scalars; NaN compares false both ways.
fn compare(a: Scalar, b: Scalar) -> Result<CmpResult> {
    use Scalar::*;
    Ok(match (a, b) {
        (F32(x), F32(y)) => CmpResult(x.partial_cmp(&y)),
        (I32(x), I32(y)) => CmpResult(Some(x.cmp(&y))),
        (U32(x), U32(y)) => CmpResult(Some(x.cmp(&y))),
        (x, y) => return fault(format!("cannot order {x:?} and {y:?}")),
    })
}

struct CmpResult(Option<std::cmp::Ordering>);

impl CmpResult {
    fn is_lt(&self) -> bool {
        self.0.is_some_and(|o| o.is_lt())
    }
    fn is_le(&self) -> bool {
        self.0.is_some_and(|o| o.is_le())
    }
    fn is_gt(&self) -> bool {
        self.0.is_some_and(|o| o.is_gt())
    }
    fn is_ge(&self) -> bool {
        self.0.is_some_and(|o| o.is_ge())
    }
}

fn relational(fun: RelationalFunction, v: &Value) -> Result<Value> {
    match fun {
        RelationalFunction::All => {
            let all = v.lanes()?.iter().try_fold(true, |acc, s| -> Result<bool> {
                Ok(acc && s.as_bool()?)
            })?;
            Ok(Value::Scalar(Scalar::Bool(all)))
        }
        RelationalFunction::Any => {
            let any = v.lanes()?.iter().try_fold(false, |acc, s| -> Result<bool> {
                Ok(acc || s.as_bool()?)
            })?;
            Ok(Value::Scalar(Scalar::Bool(any)))
        }
        RelationalFunction::IsNan => v.map(|s| Ok(Scalar::Bool(s.as_f32().is_nan()))),
        RelationalFunction::IsInf => v.map(|s| Ok(Scalar::Bool(s.as_f32().is_infinite()))),
    }
}

/// WGSL `sign`: zero stays zero.
fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn float_fn(v: &Value, f: impl Fn(f32) -> f32) -> Result<Value> {
    v.map(|s| match s {
        Scalar::F32(x) => Ok(Scalar::F32(f(x))),
        other => fault(format!("expected float, got {other:?}")),
    })
}

fn math(fun: MathFunction, a: &Value, b: Option<&Value>, c: Option<&Value>) -> Result<Value> {
    use MathFunction as M;
    use Scalar::*;

    let arg = |v: Option<&Value>| -> Result<Value> {
        v.cloned()
            .ok_or_else(|| KernelError::runtime(format!("{fun:?} is missing an argument")))
    };

    match fun {
        M::Abs => a.map(|s| {
            Ok(match s {
                F32(x) => F32(x.abs()),
                I32(x) => I32(x.wrapping_abs()),
                other => other,
            })
        }),
        M::Min => a.zip(&arg(b)?, |x, y| {
            Ok(match unify(x, y) {
                (F32(x), F32(y)) => F32(x.min(y)),
                (I32(x), I32(y)) => I32(x.min(y)),
                (U32(x), U32(y)) => U32(x.min(y)),
                (x, _) => return fault(format!("min of {x:?}")),
            })
        }),
        M::Max => a.zip(&arg(b)?, |x, y| {
            Ok(match unify(x, y) {
                (F32(x), F32(y)) => F32(x.max(y)),
                (I32(x), I32(y)) => I32(x.max(y)),
                (U32(x), U32(y)) => U32(x.max(y)),
                (x, _) => return fault(format!("max of {x:?}")),
            })
        }),
        M::Clamp => {
            let lo = math(M::Max, a, b, None)?;
            math(M::Min, &lo, c, None)
        }
        M::Saturate => float_fn(a, |x| x.max(0.0).min(1.0)),
        M::Exp => float_fn(a, f32::exp),
        M::Exp2 => float_fn(a, f32::exp2),
        M::Log => float_fn(a, f32::ln),
        M::Log2 => float_fn(a, f32::log2),
        M::Pow => a.zip(&arg(b)?, |x, y| Ok(F32(x.as_f32().powf(y.as_f32())))),
        M::Sqrt => float_fn(a, f32::sqrt),
        M::InverseSqrt => float_fn(a, |x| 1.0 / x.sqrt()),
        M::Floor => float_fn(a, f32::floor),
        M::Ceil => float_fn(a, f32::ceil),
        M::Round => float_fn(a, f32::round_ties_even),
        M::Trunc => float_fn(a, f32::trunc),
        M::Fract => float_fn(a, |x| x - x.floor()),
        M::Sin => float_fn(a, f32::sin),
        M::Cos => float_fn(a, f32::cos),
        M::Tan => float_fn(a, f32::tan),
        M::Sign => a.map(|s| {
            Ok(match s {
                F32(x) => F32(sign(x)),
                I32(x) => I32(x.signum()),
                other => return fault(format!("sign of {other:?}")),
            })
        }),
        M::Step => a.zip(&arg(b)?, |edge, x| {
            Ok(F32(if x.as_f32() >= edge.as_f32() { 1.0 } else { 0.0 }))
        }),
        M::Mix => {
            let (b, t) = (arg(b)?, arg(c)?);
            let (x, y, w) = (a.lanes()?, b.lanes()?, t.lanes()?);
            let n = x.len().max(y.len()).max(w.len());
            if [x.len(), y.len(), w.len()].iter().any(|&len| len != 1 && len != n) {
                return fault("mix of vectors with different sizes");
            }
            let lane = |v: &[Scalar], i: usize| v[if v.len() == 1 { 0 } else { i }].as_f32();
            // e1 * (1 - e3) + e2 * e3
            let mixed: Vec<Scalar> = (0..n)
                .map(|i| {
                    let t = lane(w, i);
                    F32(lane(x, i) * (1.0 - t) + lane(y, i) * t)
                })
                .collect();
            if n == 1 {
                Ok(Value::Scalar(mixed[0]))
            } else {
                Value::vector(&mixed)
            }
        }
        M::Dot => {
            let b = arg(b)?;
            let (x, y) = (a.lanes()?, b.lanes()?);
            if x.len() != y.len() {
                return fault("dot of vectors with different sizes");
            }
            let mut sum = 0.0f32;
            for (p, q) in x.iter().zip(y) {
                sum += p.as_f32() * q.as_f32();
            }
            Ok(Value::f32(sum))
        }
        M::Length => {
            let sum: f32 = a.lanes()?.iter().map(|s| s.as_f32() * s.as_f32()).sum();
            Ok(Value::f32(sum.sqrt()))
        }
        other => fault(format!("unsupported builtin {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Codegen;

    const HEADER: &str = "@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
";

    fn run_kernel(body: &str, src: &[f32], dims: Dims, parallel: bool) -> Result<Vec<f32>> {
        let source = format!("{HEADER}{body}");
        let program = Program::compile(&source, Codegen::Default)?;
        let mut dst = vec![0.0; dims.len()];
        run(&program, src, &mut dst, dims, parallel)?;
        Ok(dst)
    }

    const SCALE: &str = "
fn scale(v: vec3<f32>, k: f32) -> vec3<f32> {
    return v * k;
}

@compute @workgroup_size(4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let total = dims.x * dims.y;
    if (id.x >= total) {
        return;
    }
    let c = dims.z;
    let base = id.x * c;
    let rgb = scale(vec3<f32>(src[base], src[base + 1u], src[base + 2u]), 2.0);
    dst[base] = rgb.x;
    dst[base + 1u] = rgb.y;
    dst[base + 2u] = rgb.z;
}
";

    #[test]
    fn runs_helper_function_per_pixel() {
        let src: Vec<f32> = (0..15).map(|i| i as f32).collect();
        let out = run_kernel(SCALE, &src, Dims::new(5, 1, 3), false).unwrap();
        let expected: Vec<f32> = src.iter().map(|v| v * 2.0).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn parallel_matches_serial() {
        let src: Vec<f32> = (0..3000).map(|i| i as f32 * 0.25).collect();
        let dims = Dims::new(50, 20, 3);
        let serial = run_kernel(SCALE, &src, dims, false).unwrap();
        let parallel = run_kernel(SCALE, &src, dims, true).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn loops_and_locals() {
        let body = "
@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    var acc = 0.0;
    var weights = array<f32, 3>(1.0, 2.0, 3.0);
    for (var i = 0u; i < 3u; i++) {
        acc += src[id.x * 3u + i] * weights[i];
    }
    var v = vec2<f32>(0.0, 0.0);
    v.y = acc;
    dst[id.x * 3u] = v.y;
    dst[id.x * 3u + 1u] = select(0.0, 1.0, acc > 10.0);
    dst[id.x * 3u + 2u] = clamp(acc, 0.0, 5.0);
}
";
        let out = run_kernel(body, &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0], Dims::new(2, 1, 3), false)
            .unwrap();
        assert_eq!(out, [6.0, 0.0, 5.0, 12.0, 1.0, 5.0]);
    }

    #[test]
    fn math_builtins_match_std() {
        let body = "
@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let x = src[id.x * 4u];
    dst[id.x * 4u] = pow(x, 2.4);
    dst[id.x * 4u + 1u] = log(max(x, 1e-10)) / 2.302585;
    dst[id.x * 4u + 2u] = exp(x * 0.5);
    dst[id.x * 4u + 3u] = sign(-x) * abs(x);
}
";
        let x = 0.18f32;
        let out = run_kernel(body, &[x, 0.0, 0.0, 0.0], Dims::new(1, 1, 4), false).unwrap();
        assert_eq!(out[0], x.powf(2.4));
        assert_eq!(out[1], x.max(1e-10).ln() / 2.302585);
        assert_eq!(out[2], (x * 0.5).exp());
        assert_eq!(out[3], -x);
    }

    #[test]
    fn write_outside_pixel_faults() {
        let body = "
@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    dst[id.x * dims.z + dims.z] = 1.0;
}
";
        let err = run_kernel(body, &[0.0; 8], Dims::new(2, 1, 4), false).unwrap_err();
        assert!(matches!(err, KernelError::Runtime { .. }));
        assert!(err.message().contains("outside"), "{err}");
    }

    #[test]
    fn padding_invocations_are_run() {
        // 3 pixels, workgroups of 4: the guard must stop invocation 3.
        let body = "
@compute @workgroup_size(4)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    dst[id.x] = 1.0;
}
";
        let err = run_kernel(body, &[0.0; 3], Dims::new(3, 1, 1), false).unwrap_err();
        assert!(err.message().contains("dst[3]"), "{err}");
    }

    #[test]
    fn runaway_loop_is_stopped() {
        let body = "
@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    var i = 0u;
    loop {
        i = i + 1u;
        if (i == 0u) { break; }
    }
    dst[id.x] = f32(i);
}
";
        let err = run_kernel(body, &[0.0], Dims::new(1, 1, 1), false).unwrap_err();
        assert!(err.message().contains("limit"));
    }
}
