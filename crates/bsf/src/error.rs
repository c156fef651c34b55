//! Error types surfaced by the executor and its handles.

use std::time::Duration;
use thiserror::Error;

/// Error returned by a user supplied worker hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, BsfError>;

/// Everything that can go wrong between configuring an executor and
/// collecting a task's outputs.
#[derive(Debug, Error)]
pub enum BsfError {
    /// The pool was asked to start with no worker threads.
    #[error("cannot start executor with zero worker threads")]
    ZeroThreads,

    /// Batch geometry rejected by [`ExecutorConfig::validate`](crate::ExecutorConfig::validate).
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread {index}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// A worker's init hook reported failure; the whole start fails.
    #[error("worker {index} failed to initialize: {reason}")]
    WorkerInit { index: usize, reason: String },

    /// The startup barrier ran out of time with `ready` of `total` workers
    /// initialized.
    #[error("worker init timed out after {timeout:?} ({ready}/{total} ready)")]
    InitTimeout {
        ready: usize,
        total: usize,
        timeout: Duration,
    },

    /// A task was submitted without any input items.
    #[error("task has no input items")]
    EmptyTask,

    /// Task length is not a multiple of the configured batch alignment.
    #[error("task of {len} items is not a multiple of batch alignment {align}")]
    MisalignedTask { len: usize, align: usize },

    /// Every task slot is taken. Transient; retry once tasks complete.
    #[error("task pool exhausted ({capacity} tasks in flight)")]
    PoolExhausted { capacity: usize },

    /// Submission before `start` or after `stop`.
    #[error("executor is not running")]
    NotRunning,

    /// The task was abandoned before its results were produced.
    #[error("task was cancelled before completion")]
    Cancelled,

    /// The compute callback panicked or returned the wrong number of outputs
    /// for the batch this task was part of.
    #[error("batch computation failed: {0}")]
    ComputeFailed(String),
}

impl BsfError {
    /// True for outcomes where the caller may simply resubmit later.
    pub fn is_transient(&self) -> bool {
        matches!(self, BsfError::PoolExhausted { .. } | BsfError::NotRunning)
    }
}
