//! Tool surface for the dispatch layer
//!
//! The engine is consumed by an external dispatch layer that invokes named
//! operations with JSON arguments. That contract is modeled here as a small
//! tool system: each operation implements [`Tool`], describing itself with
//! [`ToolMetadata`] and returning its result as structured text. The
//! protocol server that routes requests to these tools is out of scope.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SandboxPolicy;
use crate::errors::EngineError;
use crate::sandbox::CodeSandbox;

#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// Core Tool trait that all operations implement
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> ToolMetadata;
    async fn execute(&self, arguments: Value) -> Result<String, EngineError>;
}

// Tool registry for managing multiple tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.metadata().name.clone();
        self.tools.insert(name, tool);
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|tool| tool.metadata()).collect()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Tool factory for creating the engine's operation surface
pub struct ToolFactory;

impl ToolFactory {
    pub fn create_execute_code(sandbox: Arc<CodeSandbox>) -> Arc<dyn Tool> {
        Arc::new(code_interpreter::ExecuteCodeTool::new(sandbox))
    }

    pub fn create_validate_code(sandbox: Arc<CodeSandbox>) -> Arc<dyn Tool> {
        Arc::new(code_interpreter::ValidateCodeTool::new(sandbox))
    }

    /// Registry with both sandbox operations wired to one engine instance.
    pub fn create_default_registry(policy: SandboxPolicy) -> Result<ToolRegistry, EngineError> {
        let sandbox = Arc::new(CodeSandbox::new(policy)?);
        let mut registry = ToolRegistry::new();
        registry.register_tool(Self::create_execute_code(sandbox.clone()));
        registry.register_tool(Self::create_validate_code(sandbox));
        Ok(registry)
    }
}

pub mod code_interpreter;

pub use code_interpreter::{ExecuteCodeTool, ValidateCodeTool};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.tool_count(), 0);

        let sandbox = Arc::new(CodeSandbox::new(SandboxPolicy::default()).unwrap());
        registry.register_tool(ToolFactory::create_execute_code(sandbox));
        assert_eq!(registry.tool_count(), 1);
        assert!(registry.get_tool("execute_code").is_some());
        assert!(registry.get_tool("nonexistent").is_none());
    }

    #[test]
    fn test_default_registry_exposes_both_operations() {
        let registry = ToolFactory::create_default_registry(SandboxPolicy::default()).unwrap();
        assert_eq!(registry.tool_count(), 2);
        assert!(registry.get_tool("execute_code").is_some());
        assert!(registry.get_tool("validate_code").is_some());

        let names: Vec<String> = registry.list_tools().iter().map(|t| t.name.clone()).collect();
        assert!(names.contains(&"execute_code".to_string()));
        assert!(names.contains(&"validate_code".to_string()));
    }
}
