//! Shared capture buffer for sandboxed stdout/stderr
//!
//! One buffer is created per execution and handed to the interpreter's
//! writer hooks. The supervising thread keeps a clone, so partial output is
//! readable even when the execution is abandoned at the deadline. Capture is
//! capped so a print loop cannot exhaust host memory before the deadline
//! fires.

use std::sync::{Arc, Mutex};

/// Hard cap on captured bytes per stream.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

/// Error raised into the sandbox when a stream exceeds [`MAX_CAPTURE_BYTES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimitExceeded {
    pub limit_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Captured>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_stdout(&self, text: &str) -> Result<(), CaptureLimitExceeded> {
        let mut captured = lock(&self.inner);
        append_capped(&mut captured.stdout, text)
    }

    pub fn write_stderr(&self, text: &str) -> Result<(), CaptureLimitExceeded> {
        let mut captured = lock(&self.inner);
        append_capped(&mut captured.stderr, text)
    }

    /// Read whatever has been captured so far without consuming it.
    pub fn snapshot(&self) -> (String, String) {
        let captured = lock(&self.inner);
        (captured.stdout.clone(), captured.stderr.clone())
    }
}

fn append_capped(buffer: &mut String, text: &str) -> Result<(), CaptureLimitExceeded> {
    if buffer.len() + text.len() > MAX_CAPTURE_BYTES {
        let remaining = MAX_CAPTURE_BYTES.saturating_sub(buffer.len());
        // Keep the prefix so partial output survives the failure.
        let mut end = remaining.min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        buffer.push_str(&text[..end]);
        return Err(CaptureLimitExceeded {
            limit_bytes: MAX_CAPTURE_BYTES,
        });
    }
    buffer.push_str(text);
    Ok(())
}

fn lock(inner: &Arc<Mutex<Captured>>) -> std::sync::MutexGuard<'_, Captured> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_are_independent() {
        let buffer = OutputBuffer::new();
        buffer.write_stdout("out").unwrap();
        buffer.write_stderr("err").unwrap();
        let (stdout, stderr) = buffer.snapshot();
        assert_eq!(stdout, "out");
        assert_eq!(stderr, "err");
    }

    #[test]
    fn test_snapshot_sees_writes_from_clones() {
        let buffer = OutputBuffer::new();
        let writer = buffer.clone();
        writer.write_stdout("hello\n").unwrap();
        assert_eq!(buffer.snapshot().0, "hello\n");
    }

    #[test]
    fn test_capture_cap_keeps_prefix() {
        let buffer = OutputBuffer::new();
        let chunk = "x".repeat(MAX_CAPTURE_BYTES - 4);
        buffer.write_stdout(&chunk).unwrap();
        let err = buffer.write_stdout("overflow").unwrap_err();
        assert_eq!(err.limit_bytes, MAX_CAPTURE_BYTES);
        let (stdout, _) = buffer.snapshot();
        assert_eq!(stdout.len(), MAX_CAPTURE_BYTES);
    }
}
