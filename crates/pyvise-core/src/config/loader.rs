//! Environment-based policy loading
//!
//! The policy is read once at process start and treated as immutable for the
//! process lifetime. Missing variables fall back to defaults; malformed
//! values and unknown capability names are load-time errors rather than
//! silently ignored knobs.

use std::env;

use crate::config::types::{Capability, SandboxPolicy};
use crate::errors::EngineError;

pub const ENV_TIMEOUT: &str = "SANDBOX_TIMEOUT";
pub const ENV_MAX_MEMORY_MB: &str = "SANDBOX_MAX_MEMORY_MB";
pub const ENV_ALLOWED_MODULES: &str = "SANDBOX_ALLOWED_MODULES";

pub struct PolicyLoader;

impl PolicyLoader {
    /// Build a [`SandboxPolicy`] from process environment variables.
    pub fn from_env() -> Result<SandboxPolicy, EngineError> {
        let mut policy = SandboxPolicy::default();

        if let Some(value) = non_empty(ENV_TIMEOUT) {
            policy.timeout_seconds = value.parse::<u64>().map_err(|_| {
                EngineError::ConfigError(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_TIMEOUT, value
                ))
            })?;
        }

        if let Some(value) = non_empty(ENV_MAX_MEMORY_MB) {
            policy.max_memory_mb = value.parse::<u64>().map_err(|_| {
                EngineError::ConfigError(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_MAX_MEMORY_MB, value
                ))
            })?;
        }

        if let Some(value) = non_empty(ENV_ALLOWED_MODULES) {
            policy.allowed_modules = parse_module_list(&value)?;
        }

        policy.validate()?;
        log::info!(
            "Sandbox policy loaded: timeout={}s, memory_ceiling={}MB, capabilities=[{}]",
            policy.timeout_seconds,
            policy.max_memory_mb,
            policy
                .allowed_modules
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(policy)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_module_list(raw: &str) -> Result<Vec<Capability>, EngineError> {
    let mut capabilities = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let capability = entry.parse::<Capability>()?;
        if !capabilities.contains(&capability) {
            capabilities.push(capability);
        }
    }
    Ok(capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        env::remove_var(ENV_TIMEOUT);
        env::remove_var(ENV_MAX_MEMORY_MB);
        env::remove_var(ENV_ALLOWED_MODULES);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let policy = PolicyLoader::from_env().unwrap();
        assert_eq!(policy.timeout_seconds, 30);
        assert_eq!(policy.max_memory_mb, 512);
        assert_eq!(policy.allowed_modules.len(), Capability::ALL.len());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var(ENV_TIMEOUT, "5");
        env::set_var(ENV_MAX_MEMORY_MB, "128");
        env::set_var(ENV_ALLOWED_MODULES, "math, plotting");
        let policy = PolicyLoader::from_env().unwrap();
        clear_env();

        assert_eq!(policy.timeout_seconds, 5);
        assert_eq!(policy.max_memory_mb, 128);
        assert_eq!(
            policy.allowed_modules,
            vec![Capability::Math, Capability::Plotting]
        );
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_capability() {
        clear_env();
        env::set_var(ENV_ALLOWED_MODULES, "math,numpy");
        let result = PolicyLoader::from_env();
        clear_env();
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_malformed_numbers() {
        clear_env();
        env::set_var(ENV_TIMEOUT, "soon");
        let result = PolicyLoader::from_env();
        clear_env();
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }
}
