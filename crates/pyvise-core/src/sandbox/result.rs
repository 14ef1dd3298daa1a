//! Result shapes and the outcome formatter
//!
//! Every execution produces exactly one [`ExecutionResult`]; every
//! validation produces exactly one [`ValidationResult`]. The formatter is
//! pure: it maps an internal failure plus whatever output was captured
//! before the failure into the final field set, and performs no I/O.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sandbox::compiler::CompileIssue;

pub const KIND_SYNTAX: &str = "SyntaxError";
pub const KIND_COMPILATION: &str = "CompilationError";
pub const KIND_TIMEOUT: &str = "TimeoutError";
pub const KIND_MEMORY: &str = "MemoryError";
pub const KIND_IMPORT: &str = "ImportError";
pub const KIND_INTERNAL: &str = "InternalError";

/// One request to run sandboxed code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    /// Overrides the policy default when present.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Bind the charting surface and collect figures after the run.
    #[serde(default = "default_capture_plots")]
    pub capture_plots: bool,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout_seconds: None,
            capture_plots: true,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn without_plots(mut self) -> Self {
        self.capture_plots = false;
        self
    }
}

fn default_capture_plots() -> bool {
    true
}

/// A rasterized chart surface, one per figure open when execution ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotArtifact {
    pub index: usize,
    pub format: String,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub plots: Vec<PlotArtifact>,
    pub execution_time_seconds: f64,
    /// UTC start time, RFC 3339.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
}

/// Internal failure classification handed to the formatter.
#[derive(Debug, Clone)]
pub(crate) enum ExecutionFailure {
    Syntax { message: String, line: Option<u32> },
    Restricted { message: String },
    Timeout { seconds: u64 },
    Memory { max_memory_mb: u64 },
    CapabilityDenied { module: String },
    Runtime { kind: String, message: String, traceback: String },
    Internal { message: String },
}

pub(crate) fn success(
    stdout: String,
    stderr: String,
    plots: Vec<PlotArtifact>,
    elapsed: Duration,
    timestamp: String,
) -> ExecutionResult {
    ExecutionResult {
        success: true,
        stdout,
        stderr,
        plots,
        execution_time_seconds: elapsed.as_secs_f64(),
        timestamp,
        error: None,
        error_kind: None,
        source_line: None,
        traceback: None,
    }
}

pub(crate) fn failure(
    failure: ExecutionFailure,
    stdout: String,
    stderr: String,
    elapsed: Duration,
    timestamp: String,
) -> ExecutionResult {
    let (error, error_kind, source_line, traceback) = describe(failure);
    ExecutionResult {
        success: false,
        stdout,
        stderr,
        plots: Vec::new(),
        execution_time_seconds: elapsed.as_secs_f64(),
        timestamp,
        error: Some(error),
        error_kind: Some(error_kind),
        source_line,
        traceback,
    }
}

pub(crate) fn validation_failure(issue: CompileIssue) -> ValidationResult {
    match issue {
        CompileIssue::Syntax { message, line } => ValidationResult {
            valid: false,
            error: Some(message),
            error_kind: Some(KIND_SYNTAX.to_string()),
            source_line: line,
        },
        CompileIssue::Restricted { message } => ValidationResult {
            valid: false,
            error: Some(message),
            error_kind: Some(KIND_COMPILATION.to_string()),
            source_line: None,
        },
    }
}

pub(crate) fn validation_success() -> ValidationResult {
    ValidationResult {
        valid: true,
        error: None,
        error_kind: None,
        source_line: None,
    }
}

pub(crate) fn from_compile_issue(issue: CompileIssue) -> ExecutionFailure {
    match issue {
        CompileIssue::Syntax { message, line } => ExecutionFailure::Syntax { message, line },
        CompileIssue::Restricted { message } => ExecutionFailure::Restricted { message },
    }
}

fn describe(failure: ExecutionFailure) -> (String, String, Option<u32>, Option<String>) {
    match failure {
        ExecutionFailure::Syntax { message, line } => {
            (message, KIND_SYNTAX.to_string(), line, None)
        }
        ExecutionFailure::Restricted { message } => {
            (message, KIND_COMPILATION.to_string(), None, None)
        }
        ExecutionFailure::Timeout { seconds } => (
            format!("Code execution timed out after {} seconds", seconds),
            KIND_TIMEOUT.to_string(),
            None,
            None,
        ),
        ExecutionFailure::Memory { max_memory_mb } => (
            format!(
                "Code execution exceeded memory limit of {}MB",
                max_memory_mb
            ),
            KIND_MEMORY.to_string(),
            None,
            None,
        ),
        ExecutionFailure::CapabilityDenied { module } => (
            format!("module '{}' is not an allowed capability", module),
            KIND_IMPORT.to_string(),
            None,
            None,
        ),
        ExecutionFailure::Runtime {
            kind,
            message,
            traceback,
        } => (message, kind, None, Some(traceback)),
        ExecutionFailure::Internal { message } => {
            (message, KIND_INTERNAL.to_string(), None, None)
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_failure_message_names_budget() {
        let result = failure(
            ExecutionFailure::Timeout { seconds: 7 },
            "partial".to_string(),
            String::new(),
            Duration::from_secs(7),
            "2026-01-01T00:00:00Z".to_string(),
        );
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some(KIND_TIMEOUT));
        assert!(result.error.as_deref().unwrap().contains("7 seconds"));
        assert_eq!(result.stdout, "partial");
    }

    #[test]
    fn test_memory_failure_message_names_ceiling() {
        let result = failure(
            ExecutionFailure::Memory { max_memory_mb: 256 },
            String::new(),
            String::new(),
            Duration::from_millis(100),
            "2026-01-01T00:00:00Z".to_string(),
        );
        assert_eq!(result.error_kind.as_deref(), Some(KIND_MEMORY));
        assert!(result.error.as_deref().unwrap().contains("256MB"));
    }

    #[test]
    fn test_runtime_failure_keeps_own_kind_and_traceback() {
        let result = failure(
            ExecutionFailure::Runtime {
                kind: "ZeroDivisionError".to_string(),
                message: "division by zero".to_string(),
                traceback: "Traceback (most recent call last): ...".to_string(),
            },
            String::new(),
            String::new(),
            Duration::from_millis(5),
            "2026-01-01T00:00:00Z".to_string(),
        );
        assert_eq!(result.error_kind.as_deref(), Some("ZeroDivisionError"));
        assert!(result.traceback.is_some());
    }

    #[test]
    fn test_plot_payload_serializes_as_hex() {
        let artifact = PlotArtifact {
            index: 0,
            format: "png".to_string(),
            data: vec![0x89, 0x50, 0x4e, 0x47],
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["data"], "89504e47");

        let back: PlotArtifact = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, vec![0x89, 0x50, 0x4e, 0x47]);
    }

    #[test]
    fn test_success_serialization_omits_error_fields() {
        let result = success(
            "hi\n".to_string(),
            String::new(),
            Vec::new(),
            Duration::from_millis(12),
            "2026-01-01T00:00:00Z".to_string(),
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("error_kind"));
        assert!(json.contains("\"success\":true"));
    }
}
