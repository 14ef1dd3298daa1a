//! Best-effort address-space ceiling
//!
//! The ceiling is applied with `setrlimit(RLIMIT_AS)` and is process-wide:
//! it stays in force after the execution that applied it, and it cannot be
//! raised back above the hard limit once lowered. A deployment that reuses
//! one process for many tenants must run each execution in a disposable
//! worker process instead of relying on this call; see the crate README.
//!
//! On platforms or environments where the limit cannot be set the call
//! degrades to a no-op and reports `Unsupported`: execution proceeds
//! unlimited, which is a documented weakening of the guarantee, not an
//! error.

/// Result of attempting to apply the memory ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitStatus {
    /// The ceiling is in force for the remainder of the process lifetime.
    Applied,
    /// The platform or environment refused the limit; execution is unlimited.
    Unsupported(String),
}

#[cfg(unix)]
pub fn apply_memory_ceiling(max_memory_mb: u64) -> LimitStatus {
    use nix::sys::resource::{setrlimit, Resource};

    let bytes = max_memory_mb.saturating_mul(1024 * 1024);
    match setrlimit(Resource::RLIMIT_AS, bytes, bytes) {
        Ok(()) => {
            log::debug!("Applied RLIMIT_AS ceiling of {}MB", max_memory_mb);
            LimitStatus::Applied
        }
        Err(err) => {
            log::warn!(
                "Could not apply {}MB memory ceiling ({}); execution proceeds unlimited",
                max_memory_mb,
                err
            );
            LimitStatus::Unsupported(err.to_string())
        }
    }
}

#[cfg(not(unix))]
pub fn apply_memory_ceiling(max_memory_mb: u64) -> LimitStatus {
    log::warn!(
        "Memory ceiling of {}MB not enforceable on this platform; execution proceeds unlimited",
        max_memory_mb
    );
    LimitStatus::Unsupported("rlimits unavailable on this platform".to_string())
}

/// Whether this build can enforce the ceiling at all.
pub fn memory_ceiling_supported() -> bool {
    cfg!(unix)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Setting RLIMIT_AS needs no privilege as long as the value stays at or
    // under the hard limit, so a generous ceiling is safe to apply inside
    // the test process.
    #[test]
    #[cfg(unix)]
    fn test_apply_generous_ceiling() {
        use nix::sys::resource::{getrlimit, Resource};

        let (_, hard) = getrlimit(Resource::RLIMIT_AS).unwrap();
        let ceiling_mb = (hard / (1024 * 1024)).min(4 * 1024 * 1024).max(1);
        let status = apply_memory_ceiling(ceiling_mb);
        assert_eq!(status, LimitStatus::Applied);
    }

    #[test]
    fn test_support_flag_matches_platform() {
        assert_eq!(memory_ceiling_supported(), cfg!(unix));
    }
}
