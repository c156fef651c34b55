use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{BsfError, Result};

/// # ExecutorConfig
///
/// Tunables for a [`TaskExecutor`](crate::TaskExecutor).
///
/// Batches never exceed `max_batch_size` items, and every task submitted must
/// contain a multiple of `batch_align` items. Because `max_batch_size` is itself
/// required to be a multiple of `batch_align`, every batch handed to the compute
/// callback is aligned as well.
///
/// The struct deserializes with defaults for missing fields, so it can be
/// embedded in a larger server configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker threads started by [`start_configured`](crate::TaskExecutor::start_configured)
    pub thread_count: usize,

    /// Startup barrier budget in milliseconds, `0` waits forever
    pub init_timeout_ms: u64,

    /// Upper bound on items per batch
    pub max_batch_size: usize,

    /// Batch and task sizes must be a multiple of this
    pub batch_align: usize,

    /// Maximum tasks in flight at once, `0` for unbounded
    pub max_pending_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_count: 4,
            init_timeout_ms: 0,
            max_batch_size: 32,
            batch_align: 1,
            max_pending_tasks: 0,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    /// Sets the startup barrier budget. `Duration::ZERO` waits forever; any
    /// other duration is rounded up to whole milliseconds so it never
    /// collapses to zero.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.init_timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn batch_align(mut self, align: usize) -> Self {
        self.batch_align = align;
        self
    }

    pub fn max_pending_tasks(mut self, limit: usize) -> Self {
        self.max_pending_tasks = limit;
        self
    }

    /// The startup budget as a [`Duration`]; zero means no deadline.
    pub fn init_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Checks the batch geometry. Thread count is checked by `start`.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(BsfError::InvalidConfig("max_batch_size must be positive".into()));
        }
        if self.batch_align == 0 {
            return Err(BsfError::InvalidConfig("batch_align must be positive".into()));
        }
        if self.max_batch_size % self.batch_align != 0 {
            return Err(BsfError::InvalidConfig(format!(
                "max_batch_size {} is not a multiple of batch_align {}",
                self.max_batch_size, self.batch_align
            )));
        }
        Ok(())
    }
}
