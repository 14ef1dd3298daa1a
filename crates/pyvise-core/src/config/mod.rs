//! Configuration module for the sandbox engine
//!
//! Provides the immutable execution policy plus an environment-variable
//! loader. Configuration is read once at process start; the engine treats it
//! as read-only for the process lifetime.

pub mod loader;
pub mod types;

pub use loader::{PolicyLoader, ENV_ALLOWED_MODULES, ENV_MAX_MEMORY_MB, ENV_TIMEOUT};
pub use types::{Capability, SandboxPolicy};

use crate::errors::EngineError;

/// Load the sandbox policy from the process environment.
pub fn load_policy() -> Result<SandboxPolicy, EngineError> {
    PolicyLoader::from_env()
}
