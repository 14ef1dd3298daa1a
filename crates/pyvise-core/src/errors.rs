//! Error types for failure handling across the engine
//!
//! Sandboxed executions never surface as Rust errors: every outcome of
//! running untrusted code is folded into an `ExecutionResult` value by the
//! executor. The variants here cover everything *around* an execution
//! (configuration loading, tool argument handling, result serialization)
//! where normal error propagation applies.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Tool execution failed for '{tool_name}': {message}")]
    ToolError { tool_name: String, message: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}
