//! WGSL front end: parse, validate and check the kernel ABI.

use std::sync::Arc;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Handle, ShaderStage};

use crate::KernelError;

/// Code generation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codegen {
    /// Invocations run in parallel wherever the device allows.
    #[default]
    Default,
    /// Invocations run one after another on the calling thread.
    Serial,
}

/// Global variables bound at the fixed kernel slots.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bindings {
    pub src: Handle<naga::GlobalVariable>,
    pub dst: Handle<naga::GlobalVariable>,
    pub dims: Handle<naga::GlobalVariable>,
}

struct Inner {
    source: String,
    module: naga::Module,
    entry: usize,
    bindings: Bindings,
}

/// A parsed and validated kernel program.
///
/// Cloning is cheap; the module is shared.
#[derive(Clone)]
pub struct Program {
    inner: Arc<Inner>,
    codegen: Codegen,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("entry_point", &self.entry_point_name())
            .field("workgroup_size", &self.workgroup_size())
            .field("codegen", &self.codegen)
            .finish()
    }
}

/// Binding slots of the kernel ABI.
pub const SRC_BINDING: u32 = 0;
pub const DST_BINDING: u32 = 1;
pub const DIMS_BINDING: u32 = 2;

fn parse_error(line: u32, message: impl Into<String>) -> KernelError {
    KernelError::Parse {
        line: line.max(1),
        message: message.into(),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl Program {
    /// Parses and validates `source`.
    ///
    /// Errors carry the 1-based line of the offending construct; problems
    /// with no position in the text report line 1.
    pub fn compile(source: &str, codegen: Codegen) -> Result<Self, KernelError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            let line = e.location(source).map_or(1, |loc| loc.line_number);
            parse_error(line, e.message())
        })?;

        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| {
                let line = e.location(source).map_or(1, |loc| loc.line_number);
                parse_error(line, error_chain(e.as_inner()))
            })?;

        let entry = module
            .entry_points
            .iter()
            .position(|ep| ep.stage == ShaderStage::Compute && ep.name == "main")
            .or_else(|| {
                module
                    .entry_points
                    .iter()
                    .position(|ep| ep.stage == ShaderStage::Compute)
            })
            .ok_or_else(|| parse_error(1, "no @compute entry point"))?;

        let [_, wg_y, wg_z] = module.entry_points[entry].workgroup_size;
        if wg_y != 1 || wg_z != 1 {
            return Err(parse_error(
                1,
                "workgroup size must be one-dimensional (y = z = 1)",
            ));
        }

        let bindings = Bindings {
            src: find_binding(&module, source, SRC_BINDING, "src", |s| {
                matches!(s, AddressSpace::Storage { .. })
            })?,
            dst: find_binding(&module, source, DST_BINDING, "dst", |s| {
                matches!(s, AddressSpace::Storage { access } if access.contains(naga::StorageAccess::STORE))
            })?,
            dims: find_binding(&module, source, DIMS_BINDING, "dims", |s| {
                *s == AddressSpace::Uniform
            })?,
        };

        tracing::trace!(
            entry = module.entry_points[entry].name.as_str(),
            functions = module.functions.len(),
            "kernel compiled"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                source: source.to_string(),
                module,
                entry,
                bindings,
            }),
            codegen,
        })
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn codegen(&self) -> Codegen {
        self.codegen
    }

    pub fn entry_point_name(&self) -> &str {
        &self.entry_point().name
    }

    /// Invocations per workgroup along x.
    pub fn workgroup_size(&self) -> u32 {
        self.entry_point().workgroup_size[0]
    }

    pub(crate) fn module(&self) -> &naga::Module {
        &self.inner.module
    }

    pub(crate) fn entry_point(&self) -> &naga::EntryPoint {
        &self.inner.module.entry_points[self.inner.entry]
    }

    pub(crate) fn bindings(&self) -> Bindings {
        self.inner.bindings
    }
}

fn find_binding(
    module: &naga::Module,
    source: &str,
    slot: u32,
    what: &str,
    space_ok: impl Fn(&AddressSpace) -> bool,
) -> Result<Handle<naga::GlobalVariable>, KernelError> {
    let (handle, var) = module
        .global_variables
        .iter()
        .find(|(_, var)| {
            var.binding
                .as_ref()
                .is_some_and(|b| b.group == 0 && b.binding == slot)
        })
        .ok_or_else(|| {
            parse_error(1, format!("missing `{what}` at @group(0) @binding({slot})"))
        })?;

    if !space_ok(&var.space) {
        let line = module
            .global_variables
            .get_span(handle)
            .location(source)
            .line_number;
        return Err(parse_error(
            line,
            format!("binding {slot} (`{what}`) has the wrong address space"),
        ));
    }
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> dims: vec4<u32>;
";

    #[test]
    fn compiles_minimal_kernel() {
        let source = format!(
            "{HEADER}
@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {{
    dst[id.x] = src[id.x];
}}
"
        );
        let program = Program::compile(&source, Codegen::Default).unwrap();
        assert_eq!(program.entry_point_name(), "main");
        assert_eq!(program.workgroup_size(), 64);
    }

    #[test]
    fn syntax_error_reports_line() {
        let source = format!("{HEADER}\nfn broken( {{\n");
        match Program::compile(&source, Codegen::Default) {
            Err(KernelError::Parse { line, message }) => {
                assert!(line >= 5, "line {line}");
                assert!(!message.is_empty());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn type_error_reports_line() {
        let source = format!(
            "{HEADER}
@compute @workgroup_size(1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {{
    let x: f32 = id.x;
    dst[0] = x;
}}
"
        );
        match Program::compile(&source, Codegen::Default) {
            Err(KernelError::Parse { line, .. }) => assert!(line >= 1),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn missing_binding_is_rejected() {
        let source = "@group(0) @binding(0) var<storage, read> src: array<f32>;
@compute @workgroup_size(1)
fn main() {}
";
        let err = Program::compile(source, Codegen::Default).unwrap_err();
        assert!(err.message().contains("binding(1)"), "{err}");
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let source = format!("{HEADER}\nfn helper() {{}}\n");
        let err = Program::compile(&source, Codegen::Default).unwrap_err();
        assert!(err.message().contains("entry point"));
    }
}
