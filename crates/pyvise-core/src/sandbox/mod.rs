//! Sandboxed execution of untrusted source text
//!
//! The executor composes the pieces in a fixed order: static validation,
//! capability environment construction, the best-effort memory ceiling, and
//! deadline supervision around a fresh embedded interpreter. Standard output
//! and error are captured for the duration of the call only, and open chart
//! surfaces are rasterized after a successful run. Every path (success,
//! syntax error, restricted construct, timeout, memory exhaustion, runtime
//! exception, even an interpreter panic) returns an [`ExecutionResult`];
//! nothing escapes as a raised error.
//!
//! Executions are serialized through a process-wide gate: the memory ceiling
//! and the cancellation hooks are process-level, so two concurrent calls in
//! one process would not be isolated from each other. Callers that need
//! concurrency run one process per in-flight call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::config::SandboxPolicy;
use crate::errors::EngineError;

pub mod compiler;
pub mod environment;
pub mod limits;
pub mod output;
pub mod plotting;
pub mod result;
pub mod timeout;
pub(crate) mod vm;

pub use result::{ExecutionRequest, ExecutionResult, PlotArtifact, ValidationResult};

use output::OutputBuffer;
use plotting::FigureRegistry;
use result::ExecutionFailure;
use timeout::{CancelFlag, DeadlineOutcome};
use vm::{VmFailure, VmRunOutcome};

static EXECUTION_GATE: Mutex<()> = Mutex::new(());

/// How strongly each resource guarantee holds on this build and platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    /// The limit is applied by the operating system.
    Enforced,
    /// The call deadline is always honored, but in-flight code is only
    /// stopped at its next cancellation point.
    Cooperative,
    /// No enforcement is available; the guarantee is absent.
    Unsupported,
}

/// Explicit statement of the engine's guarantees, so a capability gap is a
/// reported fact rather than a silent skip.
#[derive(Debug, Clone, Serialize)]
pub struct EnforcementReport {
    pub memory_ceiling: EnforcementLevel,
    pub preemption: EnforcementLevel,
}

/// The sandboxed code-execution engine.
///
/// Holds only the immutable policy; all per-call state (environment,
/// buffers, figures) is created fresh for each execution and discarded
/// afterward, so calls are independent of one another.
pub struct CodeSandbox {
    policy: SandboxPolicy,
}

impl CodeSandbox {
    pub fn new(policy: SandboxPolicy) -> Result<Self, EngineError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn enforcement(&self) -> EnforcementReport {
        EnforcementReport {
            memory_ceiling: if limits::memory_ceiling_supported() {
                EnforcementLevel::Enforced
            } else {
                EnforcementLevel::Unsupported
            },
            preemption: EnforcementLevel::Cooperative,
        }
    }

    /// Validate source without executing it: the compile step only, no
    /// capability binding, no resource limiting, no deadline arming.
    pub fn validate_code(&self, source: &str) -> ValidationResult {
        match compiler::validate(source) {
            Ok(()) => result::validation_success(),
            Err(issue) => result::validation_failure(issue),
        }
    }

    /// Run one request to completion and report the outcome as data.
    pub fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let _gate = EXECUTION_GATE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let timeout_seconds = request
            .timeout_seconds
            .filter(|s| *s > 0)
            .unwrap_or(self.policy.timeout_seconds);

        let started = Instant::now();
        let timestamp = Utc::now().to_rfc3339();

        let unit = match compiler::compile(&request.code) {
            Ok(unit) => unit,
            Err(issue) => {
                log::debug!("Rejected source at compile stage: {}", issue);
                return result::failure(
                    result::from_compile_issue(issue),
                    String::new(),
                    String::new(),
                    started.elapsed(),
                    timestamp,
                );
            }
        };

        let limit_status = limits::apply_memory_ceiling(self.policy.max_memory_mb);
        log::debug!("Memory ceiling status: {:?}", limit_status);

        let output = OutputBuffer::new();
        let figures = FigureRegistry::new();
        let cancel = CancelFlag::new();

        let worker_output = output.clone();
        let worker_figures = figures.clone();
        let worker_cancel = cancel.clone();
        let capabilities = self.policy.allowed_modules.clone();
        let capture_plots = request.capture_plots;

        let outcome = timeout::run_with_deadline(timeout_seconds, &cancel, move || {
            let run = catch_unwind(AssertUnwindSafe(|| {
                vm::run_sandboxed(
                    &unit,
                    &capabilities,
                    capture_plots,
                    worker_output,
                    worker_figures,
                    worker_cancel,
                )
            }));
            run.unwrap_or_else(|_| VmRunOutcome {
                failure: Some(VmFailure::Internal(
                    "interpreter panicked during execution".to_string(),
                )),
            })
        });

        let (stdout, stderr) = output.snapshot();
        let elapsed = started.elapsed();

        match outcome {
            DeadlineOutcome::DeadlineExceeded => result::failure(
                ExecutionFailure::Timeout {
                    seconds: timeout_seconds,
                },
                stdout,
                stderr,
                elapsed,
                timestamp,
            ),
            DeadlineOutcome::WorkerFailed(message) => result::failure(
                ExecutionFailure::Internal { message },
                stdout,
                stderr,
                elapsed,
                timestamp,
            ),
            DeadlineOutcome::Completed(run) => match run.failure {
                None => {
                    let plots = if capture_plots {
                        collect_plots(&figures)
                    } else {
                        Vec::new()
                    };
                    log::info!(
                        "Execution succeeded in {:.3}s ({} plot(s), {} stdout byte(s))",
                        elapsed.as_secs_f64(),
                        plots.len(),
                        stdout.len()
                    );
                    result::success(stdout, stderr, plots, elapsed, timestamp)
                }
                Some(failure) => result::failure(
                    map_vm_failure(failure, timeout_seconds, self.policy.max_memory_mb),
                    stdout,
                    stderr,
                    elapsed,
                    timestamp,
                ),
            },
        }
    }
}

/// Enumerate open chart surfaces in creation order, rasterize each, then
/// close them all. The artifact index is the surface's position in the
/// enumeration.
fn collect_plots(figures: &FigureRegistry) -> Vec<PlotArtifact> {
    let mut artifacts = Vec::new();
    for (index, figure) in figures.take_all().iter().enumerate() {
        match plotting::rasterize(figure) {
            Ok(data) => artifacts.push(PlotArtifact {
                index,
                format: "png".to_string(),
                data,
            }),
            Err(err) => log::warn!("Skipping figure {}: {}", index, err),
        }
    }
    artifacts
}

fn map_vm_failure(failure: VmFailure, timeout_seconds: u64, max_memory_mb: u64) -> ExecutionFailure {
    match failure {
        VmFailure::Syntax { message, line } => ExecutionFailure::Syntax { message, line },
        VmFailure::CapabilityDenied { module } => ExecutionFailure::CapabilityDenied { module },
        VmFailure::Cancelled => ExecutionFailure::Timeout {
            seconds: timeout_seconds,
        },
        VmFailure::Runtime {
            kind,
            message,
            traceback,
        } => {
            if kind == result::KIND_MEMORY {
                ExecutionFailure::Memory { max_memory_mb }
            } else {
                ExecutionFailure::Runtime {
                    kind,
                    message,
                    traceback,
                }
            }
        }
        VmFailure::Internal(message) => ExecutionFailure::Internal { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_policy() {
        let policy = SandboxPolicy {
            timeout_seconds: 0,
            ..Default::default()
        };
        assert!(CodeSandbox::new(policy).is_err());
    }

    #[test]
    fn test_enforcement_report_is_explicit() {
        let sandbox = CodeSandbox::new(SandboxPolicy::default()).unwrap();
        let report = sandbox.enforcement();
        assert_eq!(report.preemption, EnforcementLevel::Cooperative);
        if cfg!(unix) {
            assert_eq!(report.memory_ceiling, EnforcementLevel::Enforced);
        } else {
            assert_eq!(report.memory_ceiling, EnforcementLevel::Unsupported);
        }
    }

    #[test]
    fn test_validate_code_reports_kind_and_line() {
        let sandbox = CodeSandbox::new(SandboxPolicy::default()).unwrap();

        let ok = sandbox.validate_code("print('hi')");
        assert!(ok.valid);

        let bad = sandbox.validate_code("def f(:");
        assert!(!bad.valid);
        assert_eq!(bad.error_kind.as_deref(), Some(result::KIND_SYNTAX));
        assert_eq!(bad.source_line, Some(1));
    }
}
