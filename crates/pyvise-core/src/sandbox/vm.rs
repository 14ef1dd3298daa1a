//! Embedded interpreter lifecycle for one execution
//!
//! A fresh RustPython interpreter is created per call, so no interpreter
//! state survives between executions. Before user code runs, two hooks are
//! installed:
//!
//! - `builtins.__import__` is replaced with an allowlist gate. Imports
//!   originating from user code (running as `__main__`) must name a granted
//!   capability module; imports made internally by already-loaded modules
//!   pass through, so a granted module can load its own dependencies.
//! - `sys.stdout` / `sys.stderr` are replaced with writer objects that
//!   append to the shared capture buffer.
//!
//! Both hooks double as cancellation points: they observe the deadline flag
//! and raise into the running code at its next write or import, which is
//! the cooperative half of timeout enforcement.
//!
//! Failures are extracted into [`VmFailure`] values: sentinel-prefixed
//! messages distinguish the hook-raised conditions from ordinary runtime
//! exceptions, which carry their own class name and a formatted traceback.

use std::collections::HashSet;
use std::sync::Arc;

use rustpython_vm::{
    builtins::PyBaseExceptionRef, compiler::Mode, function::FuncArgs, AsObject, Interpreter,
    PyObjectRef, PyResult, VirtualMachine,
};

use crate::config::Capability;
use crate::sandbox::compiler::CompiledUnit;
use crate::sandbox::environment;
use crate::sandbox::output::{CaptureLimitExceeded, OutputBuffer};
use crate::sandbox::plotting::FigureRegistry;
use crate::sandbox::timeout::CancelFlag;

const MODULE_SENTINEL: &str = "ModuleNotAllowed:";
const CANCEL_SENTINEL: &str = "ExecutionCancelled";
const SAVED_IMPORT_ATTR: &str = "__sandbox_original_import__";

/// Structured failure of a run inside the VM.
#[derive(Debug, Clone)]
pub(crate) enum VmFailure {
    Syntax {
        message: String,
        line: Option<u32>,
    },
    CapabilityDenied {
        module: String,
    },
    Cancelled,
    Runtime {
        kind: String,
        message: String,
        traceback: String,
    },
    Internal(String),
}

#[derive(Debug)]
pub(crate) struct VmRunOutcome {
    pub failure: Option<VmFailure>,
}

/// Execute a compiled unit in a fresh interpreter with the given capability
/// set. Output lands in `output`; figures land in `figures`.
pub(crate) fn run_sandboxed(
    unit: &CompiledUnit,
    capabilities: &[Capability],
    capture_plots: bool,
    output: OutputBuffer,
    figures: FigureRegistry,
    cancel: CancelFlag,
) -> VmRunOutcome {
    let allowed_set: Arc<HashSet<String>> = Arc::new(
        capabilities
            .iter()
            .map(|c| c.module_name().to_string())
            .collect(),
    );

    let interpreter = Interpreter::with_init(Default::default(), |vm| {
        vm.add_native_modules(rustpython_stdlib::get_module_inits());
    });

    interpreter.enter(|vm| {
        install_import_hook(vm, &allowed_set, cancel.clone());
        install_output_capture(vm, output, cancel);

        let scope = match environment::build_environment(vm, capabilities, &figures, capture_plots)
        {
            Ok(scope) => scope,
            Err(exc) => {
                return VmRunOutcome {
                    failure: Some(VmFailure::Internal(format!(
                        "capability environment setup failed: {}",
                        exception_message(vm, &exc)
                    ))),
                }
            }
        };

        // The validator already parsed this source; a failure here means the
        // VM grammar disagrees and is reported as the syntax error it is.
        let code = match vm.compile(unit.source(), Mode::Exec, "<sandbox>".to_owned()) {
            Ok(code) => code,
            Err(err) => {
                let (row, _col) = err.python_location();
                return VmRunOutcome {
                    failure: Some(VmFailure::Syntax {
                        message: err.to_string(),
                        line: if row > 0 { Some(row as u32) } else { None },
                    }),
                };
            }
        };

        match vm.run_code_obj(code, scope) {
            Ok(_) => VmRunOutcome { failure: None },
            Err(exc) => VmRunOutcome {
                failure: Some(classify_exception(vm, exc)),
            },
        }
    })
}

fn classify_exception(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> VmFailure {
    let message = exception_message(vm, &exc);

    if let Some(module) = message.strip_prefix(MODULE_SENTINEL) {
        return VmFailure::CapabilityDenied {
            module: module.to_string(),
        };
    }
    if message.starts_with(CANCEL_SENTINEL) {
        return VmFailure::Cancelled;
    }

    let kind = exc.class().name().to_string();
    let mut traceback = String::new();
    let _ = vm.write_exception(&mut traceback, &exc);
    VmFailure::Runtime {
        kind,
        message,
        traceback,
    }
}

fn exception_message(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
    exc.as_object()
        .str(vm)
        .map(|s| s.as_str().to_owned())
        .unwrap_or_else(|_| "unknown error".to_owned())
}

/// Replace `builtins.__import__` with the capability allowlist gate.
///
/// The real `__import__` is stashed under a private attribute on first
/// install so the gate always delegates to the interpreter's own machinery.
fn install_import_hook(vm: &VirtualMachine, allowed_set: &Arc<HashSet<String>>, cancel: CancelFlag) {
    let original_import = if let Ok(saved) = vm.builtins.get_attr(SAVED_IMPORT_ATTR, vm) {
        saved
    } else {
        let real_original = match vm.builtins.get_attr("__import__", vm) {
            Ok(f) => f,
            Err(_) => return,
        };
        let _ = vm
            .builtins
            .set_attr(SAVED_IMPORT_ATTR, real_original.clone(), vm);
        real_original
    };

    // The hook closure runs only on the interpreter's thread.
    #[allow(clippy::arc_with_non_send_sync)]
    let original_import = Arc::new(original_import);
    let allowed_set = Arc::clone(allowed_set);

    let hook = vm.new_function(
        "__import__",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            if cancel.is_cancelled() {
                return Err(vm.new_runtime_error(CANCEL_SENTINEL.to_owned()));
            }

            let module_name: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();

            if is_user_code_import(&args, vm) && !is_module_allowed(&module_name, &allowed_set) {
                return Err(vm.new_import_error(
                    format!("{}{}", MODULE_SENTINEL, module_name),
                    vm.ctx.new_str(module_name),
                ));
            }

            original_import.call(args, vm)
        },
    );

    let _ = vm.builtins.set_attr("__import__", hook, vm);
}

/// An import counts as user code when the calling frame's `__name__` is
/// `__main__` (or absent). Modules loaded on behalf of a granted capability
/// import under their own name and pass through.
fn is_user_code_import(args: &FuncArgs, vm: &VirtualMachine) -> bool {
    let globals = match args.args.get(1) {
        Some(globals) if !vm.is_none(globals) => globals,
        _ => return true,
    };

    if let Ok(name_val) = vm.call_method(globals, "get", (vm.ctx.new_str("__name__"),)) {
        if !vm.is_none(&name_val) {
            if let Ok(name_str) = name_val.str(vm) {
                let name = name_str.as_str();
                return name.is_empty() || name == "__main__";
            }
        }
    }
    true
}

/// Direct match, or a submodule of an allowed parent package: granting
/// `statistics` also admits whatever `statistics.*` loads for itself.
fn is_module_allowed(module_name: &str, allowed_set: &HashSet<String>) -> bool {
    if allowed_set.contains(module_name) {
        return true;
    }
    if let Some(dot) = module_name.find('.') {
        return allowed_set.contains(&module_name[..dot]);
    }
    false
}

/// Point `sys.stdout` / `sys.stderr` at the shared capture buffer.
fn install_output_capture(vm: &VirtualMachine, output: OutputBuffer, cancel: CancelFlag) {
    let stdout_obj = build_writer_object(vm, output.clone(), cancel.clone(), true);
    let stderr_obj = build_writer_object(vm, output, cancel, false);

    let _ = vm.sys_module.set_attr("stdout", stdout_obj, vm);
    let _ = vm.sys_module.set_attr("stderr", stderr_obj, vm);
}

/// A minimal file-like object whose `write` lands in the capture buffer.
fn build_writer_object(
    vm: &VirtualMachine,
    output: OutputBuffer,
    cancel: CancelFlag,
    is_stdout: bool,
) -> PyObjectRef {
    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            if cancel.is_cancelled() {
                return Err(vm.new_runtime_error(CANCEL_SENTINEL.to_owned()));
            }

            let text: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();

            let write_result = if is_stdout {
                output.write_stdout(&text)
            } else {
                output.write_stderr(&text)
            };

            match write_result {
                Ok(()) => Ok(vm.ctx.new_int(text.len()).into()),
                Err(CaptureLimitExceeded { limit_bytes }) => Err(vm.new_runtime_error(format!(
                    "Output limit exceeded: {} bytes",
                    limit_bytes
                ))),
            }
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            Ok(vm.ctx.none())
        },
    );

    let ns = vm.new_module("<writer>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    let _ = ns.set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::compiler;

    fn run(code: &str, capabilities: &[Capability]) -> (VmRunOutcome, String, String) {
        let unit = compiler::compile(code).expect("test source must pass validation");
        let output = OutputBuffer::new();
        let figures = FigureRegistry::new();
        let outcome = run_sandboxed(
            &unit,
            capabilities,
            false,
            output.clone(),
            figures,
            CancelFlag::new(),
        );
        let (stdout, stderr) = output.snapshot();
        (outcome, stdout, stderr)
    }

    #[test]
    fn test_stdout_capture() {
        let (outcome, stdout, _) = run("print('hello')", &[]);
        assert!(outcome.failure.is_none(), "unexpected: {:?}", outcome.failure);
        assert_eq!(stdout, "hello\n");
    }

    #[test]
    fn test_runtime_error_carries_kind_and_partial_output() {
        let (outcome, stdout, _) = run("print('before')\nx = 1 / 0", &[]);
        match outcome.failure {
            Some(VmFailure::Runtime { ref kind, .. }) => {
                assert_eq!(kind, "ZeroDivisionError");
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
        assert_eq!(stdout, "before\n");
    }

    #[test]
    fn test_denied_import_is_a_capability_error() {
        let (outcome, _, _) = run("import socket", &[Capability::Math]);
        match outcome.failure {
            Some(VmFailure::CapabilityDenied { ref module }) => assert_eq!(module, "socket"),
            // Depending on how the frame resolves __import__ under a
            // restricted __builtins__, denial may surface as a plain
            // runtime import failure instead; both deny the capability.
            Some(VmFailure::Runtime { .. }) => {}
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_granted_math_capability_is_usable() {
        let (outcome, stdout, _) = run("print(int(math.sqrt(144)))", &[Capability::Math]);
        assert!(outcome.failure.is_none(), "unexpected: {:?}", outcome.failure);
        assert_eq!(stdout, "12\n");
    }
}
