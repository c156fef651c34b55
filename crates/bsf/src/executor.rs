use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use crate::communication::{Task, Ticket};
use crate::config::ExecutorConfig;
use crate::core::dispatcher::Shared;
use crate::core::handler::{BatchCompute, NoHooks, WorkerHooks};
use crate::core::pool::TaskPool;
use crate::core::queue::WorkQueue;
use crate::core::worker::{InitStatus, WorkerPool};
use crate::error::{BsfError, Result};

/// # TaskExecutor
///
/// Batches individually submitted requests onto a fixed pool of worker
/// threads.
///
/// Callers hand in their input items with [`submit`](TaskExecutor::submit) and
/// get back a [`Ticket`]. Workers merge queued tasks into batches of at most
/// `max_batch_size` items, run the [`BatchCompute`] callback over each batch,
/// and copy every task's outputs back before resolving its ticket. A task
/// larger than a batch is split across as many rounds as it needs.
///
/// The executor is meant to be shared, typically behind an `Arc`; every method
/// takes `&self`. Dropping it stops the workers.
///
/// ## Lifecycle
///
/// 1. [`new`](TaskExecutor::new) validates the configuration; no threads yet
/// 2. [`start`](TaskExecutor::start) spawns workers and waits for their init hooks
/// 3. [`submit`](TaskExecutor::submit) is accepted only while started
/// 4. [`stop`](TaskExecutor::stop) cancels queued work and joins the workers
///
/// ```ignore
/// let executor = TaskExecutor::new(ExecutorConfig::new().max_batch_size(64), |inputs: &[f32], outputs: &mut Vec<f32>| {
///     outputs.extend(inputs.iter().map(|x| x * 2.0));
/// })?;
/// executor.start(4, Duration::from_secs(10))?;
/// let doubled = executor.submit(vec![1.0, 2.0])?.wait()?;
/// ```
pub struct TaskExecutor<I, O, C, H = NoHooks> {
    shared: Arc<Shared<I, O, C, H>>,

    pool: TaskPool,

    /// Present while started. Held for the whole of `start` and `stop`, so
    /// the two never interleave.
    workers: Mutex<Option<WorkerPool>>,

    /// Worker count of the started pool, zero otherwise. Readable while a
    /// `start` is still waiting on init hooks.
    active: AtomicUsize,

    config: ExecutorConfig,
}

impl<I, O, C> TaskExecutor<I, O, C, NoHooks>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    C: BatchCompute<I, O>,
{
    /// Creates an executor without per-thread hooks.
    pub fn new(config: ExecutorConfig, compute: C) -> Result<Self> {
        Self::with_hooks(config, compute, NoHooks)
    }
}

impl<I, O, C, H> TaskExecutor<I, O, C, H>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
    C: BatchCompute<I, O>,
    H: WorkerHooks,
{
    pub fn with_hooks(config: ExecutorConfig, compute: C, hooks: H) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                queue: WorkQueue::new(),
                compute,
                hooks,
                capacity: config.max_batch_size,
                align: config.batch_align,
            }),
            pool: TaskPool::new(config.max_pending_tasks),
            workers: Mutex::new(None),
            active: AtomicUsize::new(0),
            config,
        })
    }

    /// Spawns `thread_count` workers and waits until all of them have run
    /// their init hook.
    ///
    /// Fails if any worker fails to spawn or initialize, or if `init_timeout`
    /// passes first (zero waits forever). On failure the ready workers are
    /// joined and those still inside their init hook are detached, so `start`
    /// returns as soon as the failure is seen. Starting an already started
    /// executor is a no-op.
    ///
    /// `stop`, `Drop` and [`worker_statuses`](TaskExecutor::worker_statuses)
    /// wait for a `start` in progress. With a zero `init_timeout`, an init hook
    /// that never returns blocks them indefinitely.
    pub fn start(&self, thread_count: usize, init_timeout: Duration) -> Result<()> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            warn!("executor has already started");
            return Ok(());
        }

        let pool = WorkerPool::spawn(&self.shared, thread_count)?;
        if let Err(err) = pool.wait_ready(init_timeout) {
            pool.shutdown(&self.shared.queue, true);
            return Err(err);
        }

        self.shared.queue.open();
        info!(
            threads = thread_count,
            max_batch_size = self.config.max_batch_size,
            batch_align = self.config.batch_align,
            "executor started"
        );
        self.active.store(pool.len(), Ordering::SeqCst);
        *workers = Some(pool);
        Ok(())
    }

    /// [`start`](TaskExecutor::start) with the thread count and init timeout
    /// from the configuration.
    pub fn start_configured(&self) -> Result<()> {
        self.start(self.config.thread_count, self.config.init_timeout_duration())
    }

    /// Queues `input` for processing.
    ///
    /// The input must be non-empty and a multiple of the batch alignment. The
    /// returned ticket resolves to one output per input item, in order.
    pub fn submit(&self, input: Vec<I>) -> Result<Ticket<O>> {
        if input.is_empty() {
            return Err(BsfError::EmptyTask);
        }
        let align = self.config.batch_align;
        if input.len() % align != 0 {
            return Err(BsfError::MisalignedTask { len: input.len(), align });
        }

        let permit = self.pool.acquire()?;
        let (sender, receiver) = oneshot::channel();
        let task = Arc::new(Task::new(input, sender, permit));
        let (id, size) = (task.id(), task.size());

        if self.shared.queue.push(task).is_err() {
            debug!(task = %id, "rejected submission, executor not running");
            return Err(BsfError::NotRunning);
        }
        debug!(task = %id, size, "task queued");
        Ok(Ticket::new(id, receiver))
    }
}

impl<I, O, C, H> TaskExecutor<I, O, C, H> {
    /// Stops the workers and cancels everything still queued.
    ///
    /// Batches already fetched by a worker run to completion; tasks that were
    /// queued but not fully claimed resolve as [`BsfError::Cancelled`]. The
    /// executor can be started again afterwards.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        let Some(pool) = workers.take() else {
            debug!("stop called on an executor that is not running");
            return;
        };
        self.active.store(0, Ordering::SeqCst);

        let abandoned = self.shared.queue.close();
        if !abandoned.is_empty() {
            warn!(tasks = abandoned.len(), "cancelling queued tasks on shutdown");
        }
        for task in &abandoned {
            task.cancel();
        }

        pool.shutdown(&self.shared.queue, false);
        info!("executor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.thread_count() > 0
    }

    /// Number of worker threads while running, zero otherwise.
    pub fn thread_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Init status of each worker, empty while stopped.
    pub fn worker_statuses(&self) -> Vec<InitStatus> {
        self.workers
            .lock()
            .as_ref()
            .map(WorkerPool::statuses)
            .unwrap_or_default()
    }

    /// Tasks still in the queue, including one partly claimed at the head.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Tasks holding a pool slot; always zero when the pool is unbounded.
    pub fn tasks_in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

impl<I, O, C, H> Drop for TaskExecutor<I, O, C, H> {
    fn drop(&mut self) {
        self.stop();
    }
}
