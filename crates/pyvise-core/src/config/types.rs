//! Configuration type definitions for the sandbox engine
//!
//! The policy is deliberately small: a wall-clock budget, a memory ceiling,
//! and a typed set of capabilities the executed code may use. Capabilities
//! are a closed enum rather than free-form module names, so a typo in the
//! configuration fails at load time instead of silently granting nothing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;

/// A module-level capability that can be granted to sandboxed code.
///
/// Each variant maps to a module bound into the capability environment under
/// its full name and, where one is conventional, a short alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Numeric functions (`math`).
    Math,
    /// Pseudo-random generators (`random`).
    Random,
    /// Descriptive statistics (`statistics`, alias `stats`).
    Statistics,
    /// Non-interactive charting surface (`plotting`, alias `plt`).
    Plotting,
}

impl Capability {
    /// Every capability the engine knows about.
    pub const ALL: [Capability; 4] = [
        Capability::Math,
        Capability::Random,
        Capability::Statistics,
        Capability::Plotting,
    ];

    /// The module name sandboxed code uses to refer to this capability.
    pub fn module_name(&self) -> &'static str {
        match self {
            Capability::Math => "math",
            Capability::Random => "random",
            Capability::Statistics => "statistics",
            Capability::Plotting => "plotting",
        }
    }

    /// Conventional short alias bound next to the full name, if any.
    pub fn alias(&self) -> Option<&'static str> {
        match self {
            Capability::Statistics => Some("stats"),
            Capability::Plotting => Some("plt"),
            _ => None,
        }
    }
}

impl FromStr for Capability {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "math" => Ok(Capability::Math),
            "random" => Ok(Capability::Random),
            "statistics" | "stats" => Ok(Capability::Statistics),
            "plotting" | "plt" => Ok(Capability::Plotting),
            other => Err(EngineError::ConfigError(format!(
                "Unknown sandbox capability '{}' (known: math, random, statistics, plotting)",
                other
            ))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_name())
    }
}

/// Immutable execution policy, created once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxPolicy {
    /// Default wall-clock budget per execution, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Address-space ceiling applied for the process, in megabytes.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Capabilities granted to executed code.
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<Capability>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_memory_mb: default_max_memory_mb(),
            allowed_modules: default_allowed_modules(),
        }
    }
}

impl SandboxPolicy {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.timeout_seconds == 0 {
            return Err(EngineError::ConfigError(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.max_memory_mb == 0 {
            return Err(EngineError::ConfigError(
                "max_memory_mb must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.allowed_modules.contains(&capability)
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_memory_mb() -> u64 {
    512
}

fn default_allowed_modules() -> Vec<Capability> {
    Capability::ALL.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parsing() {
        assert_eq!("math".parse::<Capability>().unwrap(), Capability::Math);
        assert_eq!("  PLT ".parse::<Capability>().unwrap(), Capability::Plotting);
        assert!("pandas".parse::<Capability>().is_err());
    }

    #[test]
    fn test_policy_defaults_are_valid() {
        let policy = SandboxPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.timeout_seconds, 30);
        assert_eq!(policy.max_memory_mb, 512);
        assert!(policy.grants(Capability::Plotting));
    }

    #[test]
    fn test_policy_rejects_zero_budgets() {
        let policy = SandboxPolicy {
            timeout_seconds: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = SandboxPolicy {
            max_memory_mb: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
