//! Capability environment construction
//!
//! Every execution gets a fresh environment: a scope whose `__builtins__`
//! is a whitelist-only dict, with the same whitelist mirrored into the
//! globals and guard functions shadowing the reflective and I/O built-ins
//! the static validator already rejects. Capability modules are bound by a
//! generated setup snippet executed in the scope before user code; a module
//! that fails to import is silently omitted, so a script that relies on it
//! fails later with a name-resolution error rather than aborting
//! environment construction.

use rustpython_vm::{function::FuncArgs, scope::Scope, PyObjectRef, PyResult, VirtualMachine};

use crate::config::Capability;
use crate::sandbox::plotting::{self, FigureRegistry};

/// Primitive built-ins available to every execution, whatever the policy.
pub const BUILTIN_WHITELIST: &[&str] = &[
    "abs",
    "all",
    "any",
    "bool",
    "dict",
    "divmod",
    "enumerate",
    "float",
    "int",
    "isinstance",
    "len",
    "list",
    "max",
    "min",
    "print",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "sorted",
    "str",
    "sum",
    "tuple",
    "zip",
    // Exception types, so sandboxed code can raise and catch by name.
    "Exception",
    "ArithmeticError",
    "IndexError",
    "KeyError",
    "RuntimeError",
    "StopIteration",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

/// Built-ins shadowed by a guard that fails at call time. The static
/// validator rejects these names already; the guards keep the denial in
/// place for any path that bypasses the scan.
const GUARDED_BUILTINS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "breakpoint",
    "exit",
    "quit",
    "help",
];

/// Build the capability environment for one execution.
///
/// The returned scope carries the built-in whitelist, the capability-guard
/// shadows, and whichever granted capability modules loaded successfully.
/// When `bind_plotting` is set and the policy grants it, the non-interactive
/// charting surface is bound as `plotting` with the conventional `plt`
/// alias.
pub fn build_environment(
    vm: &VirtualMachine,
    capabilities: &[Capability],
    figures: &FigureRegistry,
    bind_plotting: bool,
) -> PyResult<Scope> {
    let scope = vm.new_scope_with_builtins();

    // Capability modules are imported before the built-ins are clamped:
    // the import machinery needs the interpreter's own `__import__`, and the
    // runtime import hook is already gating what it will load. User code
    // never needs an import statement; granted modules arrive pre-bound.
    bind_capability_modules(vm, &scope, capabilities)?;

    // Whitelist-only __builtins__, replacing the full interpreter set for
    // frames created from this scope.
    let restricted = vm.ctx.new_dict();
    for name in BUILTIN_WHITELIST {
        if let Ok(value) = vm.builtins.get_attr(*name, vm) {
            restricted.set_item(*name, value.clone(), vm)?;
            // Mirrored into globals so resolution never reaches an
            // unrestricted fallback.
            scope.globals.set_item(*name, value, vm)?;
        }
    }
    scope
        .globals
        .set_item("__builtins__", restricted.into(), vm)?;

    for name in GUARDED_BUILTINS {
        scope
            .globals
            .set_item(*name, make_guard(vm, name), vm)?;
    }

    // User code runs as __main__; the import hook keys off this.
    scope
        .globals
        .set_item("__name__", vm.ctx.new_str("__main__").into(), vm)?;

    if bind_plotting && capabilities.contains(&Capability::Plotting) {
        let module = plotting::make_module(vm, figures.clone());
        scope.globals.set_item("plotting", module.clone(), vm)?;
        scope.globals.set_item("plt", module, vm)?;
    }

    Ok(scope)
}

/// A callable that denies a capability at call time.
fn make_guard(vm: &VirtualMachine, name: &'static str) -> PyObjectRef {
    vm.new_function(
        name,
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            Err(vm.new_runtime_error(format!(
                "'{}' is not an available capability in this sandbox",
                name
            )))
        },
    )
    .into()
}

/// Bind importable capability modules through a generated setup snippet.
///
/// Each granted module is imported with a silent fallback, matching the
/// lazy-omission contract: absence shows up later as the script's own
/// name-resolution failure, not as a setup error.
fn bind_capability_modules(
    vm: &VirtualMachine,
    scope: &Scope,
    capabilities: &[Capability],
) -> PyResult<()> {
    let setup = capability_setup_source(capabilities);
    if setup.is_empty() {
        return Ok(());
    }

    let code = vm
        .compile(
            &setup,
            rustpython_vm::compiler::Mode::Exec,
            "<capability_setup>".to_owned(),
        )
        .map_err(|err| vm.new_runtime_error(format!("capability setup failed to compile: {}", err)))?;
    vm.run_code_obj(code, scope.clone())?;
    Ok(())
}

fn capability_setup_source(capabilities: &[Capability]) -> String {
    let mut setup = String::new();
    for capability in capabilities {
        // Plotting is a native module bound directly, not imported.
        if *capability == Capability::Plotting {
            continue;
        }
        let module = capability.module_name();
        setup.push_str(&format!("try:\n    import {}\n", module));
        if let Some(alias) = capability.alias() {
            setup.push_str(&format!("    {} = {}\n", alias, module));
        }
        setup.push_str("except ImportError:\n    pass\n");
    }
    setup
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_vm::Interpreter;

    fn with_vm(test: impl FnOnce(&VirtualMachine)) {
        let interpreter = Interpreter::with_init(Default::default(), |vm| {
            vm.add_native_modules(rustpython_stdlib::get_module_inits());
        });
        interpreter.enter(|vm| test(vm));
    }

    fn has_global(vm: &VirtualMachine, scope: &Scope, name: &str) -> bool {
        let globals: PyObjectRef = scope.globals.clone().into();
        vm.call_method(&globals, "get", (vm.ctx.new_str(name),))
            .map(|value| !vm.is_none(&value))
            .unwrap_or(false)
    }

    #[test]
    fn test_whitelist_and_guards_present() {
        with_vm(|vm| {
            let figures = FigureRegistry::new();
            let scope = build_environment(vm, &[], &figures, false).unwrap();
            assert!(has_global(vm, &scope, "print"));
            assert!(has_global(vm, &scope, "sum"));
            assert!(has_global(vm, &scope, "open")); // guard shadow
            assert!(has_global(vm, &scope, "__builtins__"));
        });
    }

    #[test]
    fn test_math_capability_binds_module() {
        with_vm(|vm| {
            let figures = FigureRegistry::new();
            let scope =
                build_environment(vm, &[Capability::Math], &figures, false).unwrap();
            assert!(has_global(vm, &scope, "math"));
        });
    }

    #[test]
    fn test_plotting_bound_under_both_names() {
        with_vm(|vm| {
            let figures = FigureRegistry::new();
            let scope =
                build_environment(vm, &[Capability::Plotting], &figures, true).unwrap();
            assert!(has_global(vm, &scope, "plotting"));
            assert!(has_global(vm, &scope, "plt"));
        });
    }

    #[test]
    fn test_plot_capture_disabled_skips_binding() {
        with_vm(|vm| {
            let figures = FigureRegistry::new();
            let scope =
                build_environment(vm, &[Capability::Plotting], &figures, false).unwrap();
            assert!(!has_global(vm, &scope, "plt"));
        });
    }

    #[test]
    fn test_setup_source_silently_tolerates_missing_modules() {
        let setup = capability_setup_source(&[Capability::Math, Capability::Statistics]);
        assert!(setup.contains("import math"));
        assert!(setup.contains("import statistics"));
        assert!(setup.contains("except ImportError"));
        assert!(setup.contains("stats = statistics"));
    }
}
