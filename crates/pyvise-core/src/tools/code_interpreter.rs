//! Sandbox operations exposed as tools
//!
//! `execute_code` runs source text in the sandbox and returns the full
//! execution result as JSON; `validate_code` runs the compile step alone.
//! The engine call is synchronous and bounded by its own deadline, so it is
//! bridged onto the blocking pool rather than holding an async worker.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::EngineError;
use crate::sandbox::{CodeSandbox, ExecutionRequest};
use crate::tools::{Tool, ToolMetadata};

pub struct ExecuteCodeTool {
    sandbox: Arc<CodeSandbox>,
}

impl ExecuteCodeTool {
    pub fn new(sandbox: Arc<CodeSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "execute_code".to_string(),
            description: "Executes code in a restricted sandbox with time and memory ceilings, returning captured output and any generated plots".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Code to execute"
                    },
                    "timeout_seconds": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Execution timeout in seconds (defaults to the configured value)"
                    },
                    "capture_plots": {
                        "type": "boolean",
                        "description": "Whether to capture generated plots (default true)"
                    }
                },
                "required": ["code"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, EngineError> {
        let code = arguments
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::ToolError {
                tool_name: "execute_code".to_string(),
                message: "Missing or invalid 'code' parameter".to_string(),
            })?
            .to_string();

        let mut request = ExecutionRequest::new(code);
        if let Some(seconds) = arguments.get("timeout_seconds").and_then(|v| v.as_u64()) {
            request = request.with_timeout(seconds);
        }
        if let Some(false) = arguments.get("capture_plots").and_then(|v| v.as_bool()) {
            request = request.without_plots();
        }

        let sandbox = self.sandbox.clone();
        let result = tokio::task::spawn_blocking(move || sandbox.execute(&request))
            .await
            .map_err(|e| EngineError::ToolError {
                tool_name: "execute_code".to_string(),
                message: format!("Execution task failed: {}", e),
            })?;

        log::info!(
            "execute_code finished: success={}, kind={:?}",
            result.success,
            result.error_kind
        );
        Ok(serde_json::to_string(&result)?)
    }
}

pub struct ValidateCodeTool {
    sandbox: Arc<CodeSandbox>,
}

impl ValidateCodeTool {
    pub fn new(sandbox: Arc<CodeSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ValidateCodeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "validate_code".to_string(),
            description: "Validates code against the sandbox's restricted grammar without executing it".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Code to validate"
                    }
                },
                "required": ["code"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, EngineError> {
        let code = arguments
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::ToolError {
                tool_name: "validate_code".to_string(),
                message: "Missing or invalid 'code' parameter".to_string(),
            })?;

        let result = self.sandbox.validate_code(code);
        Ok(serde_json::to_string(&result)?)
    }
}
