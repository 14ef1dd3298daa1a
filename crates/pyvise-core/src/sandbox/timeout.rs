//! Deadline supervision for a single execution
//!
//! The execution runs on a dedicated worker thread while the calling thread
//! waits on a channel with a timeout. When the deadline elapses, a shared
//! cancellation flag is raised; the interpreter observes it at its hook
//! points (output writes, import calls) and aborts the run at the next such
//! suspension point. Code that never reaches a hook point (a pure CPU loop)
//! keeps its thread until the process exits. The caller still gets a timely
//! `TimeoutError` result either way: the deadline bounds the *call*, the
//! flag is the cooperative brake for the code itself.
//!
//! Arming and disarming are scoped to the call. There is no process-global
//! alarm or interrupt handler to install and restore.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cooperative cancellation flag shared with interpreter hook points.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of supervising a task against a deadline.
#[derive(Debug)]
pub enum DeadlineOutcome<T> {
    /// The task finished (successfully or not) before the deadline.
    Completed(T),
    /// The deadline elapsed; the cancellation flag has been raised and the
    /// worker thread abandoned.
    DeadlineExceeded,
    /// The worker thread could not be started or died without reporting.
    WorkerFailed(String),
}

// Worker threads get a generous stack: the interpreter bounds recursion at
// the language level, but deeply nested expressions still burn native frames.
const WORKER_STACK_BYTES: usize = 8 * 1024 * 1024;

/// Run `task` on a worker thread, waiting at most `seconds` for its result.
pub fn run_with_deadline<T, F>(seconds: u64, cancel: &CancelFlag, task: F) -> DeadlineOutcome<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("sandbox-exec".to_string())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(move || {
            let _ = tx.send(task());
        });

    if let Err(err) = spawned {
        return DeadlineOutcome::WorkerFailed(format!("failed to spawn worker thread: {}", err));
    }

    match rx.recv_timeout(Duration::from_secs(seconds)) {
        Ok(value) => DeadlineOutcome::Completed(value),
        Err(RecvTimeoutError::Timeout) => {
            cancel.cancel();
            log::warn!(
                "Execution exceeded its {}s deadline; worker thread abandoned \
                 (CPU-bound code may stay busy until it reaches a cancellation point)",
                seconds
            );
            DeadlineOutcome::DeadlineExceeded
        }
        Err(RecvTimeoutError::Disconnected) => {
            DeadlineOutcome::WorkerFailed("worker thread exited without a result".to_string())
        }
    }
}
