//! Sandboxed code-execution engine for untrusted source text.
//!
//! This crate accepts arbitrary source, compiles it under a restricted
//! grammar, runs it inside an embedded interpreter with a whitelisted
//! capability environment, and returns a structured, never-throwing result
//! with captured output and any generated chart artifacts.
//!
//! # Architecture Overview
//!
//! The engine is organized around a few subsystems:
//!
//! - **Static validation**: parse and restricted-subset vetting before any
//!   code runs, with a stable error taxonomy
//! - **Capability environment**: a fresh, whitelist-only namespace per
//!   execution, with typed capability modules bound under conventional names
//! - **Resource supervision**: a best-effort process memory ceiling and a
//!   cancellable-task deadline around a dedicated worker thread
//! - **Artifact capture**: in-memory stdout/stderr buffers and a
//!   non-interactive charting surface rasterized to PNG
//! - **Tool surface**: the `execute_code` / `validate_code` operations
//!   exposed for an external dispatch layer
//! - **Configuration**: an immutable policy read once from the environment
//!
//! Safety model: this is a language-level restriction plus best-effort
//! resource limiting, not kernel-level isolation; see the README for what
//! that does and does not guarantee.

pub mod config;
pub mod errors;
pub mod sandbox;
pub mod tools;

pub use config::{Capability, PolicyLoader, SandboxPolicy};
pub use errors::EngineError;
pub use sandbox::{
    CodeSandbox, EnforcementLevel, EnforcementReport, ExecutionRequest, ExecutionResult,
    PlotArtifact, ValidationResult,
};
pub use tools::{Tool, ToolFactory, ToolMetadata, ToolRegistry};
