//! Worker thread lifecycle: spawning, the startup barrier, and shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use tracing::{debug, error, info_span, warn};
use crate::error::{BsfError, Result};
use super::dispatcher::{Shared, dispatch_loop};
use super::handler::{BatchCompute, WorkerHooks};
use super::queue::WorkQueue;

/// How often `wait_ready` re-reads worker init status.
pub(crate) const INIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Progress of a worker's init hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Pending,
    Ready,
    Failed,
}

impl InitStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => InitStatus::Pending,
            1 => InitStatus::Ready,
            _ => InitStatus::Failed,
        }
    }
}

/// Per-thread bookkeeping visible to the thread that started the pool.
pub(crate) struct ThreadContext {
    index: usize,

    status: AtomicU8,

    failure: Mutex<Option<String>>,
}

impl ThreadContext {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            status: AtomicU8::new(InitStatus::Pending as u8),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn status(&self) -> InitStatus {
        InitStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn mark_ready(&self) {
        self.status.store(InitStatus::Ready as u8, Ordering::Release);
    }

    pub(crate) fn mark_failed(&self, reason: String) {
        *self.failure.lock() = Some(reason);
        self.status.store(InitStatus::Failed as u8, Ordering::Release);
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }
}

/// Marks a worker failed if its thread unwinds before reporting readiness,
/// so the startup barrier never waits on a dead thread.
struct InitPill<'a> {
    context: &'a ThreadContext,
}

impl Drop for InitPill<'_> {
    fn drop(&mut self) {
        if thread::panicking() && self.context.status() == InitStatus::Pending {
            self.context.mark_failed("worker panicked during init".to_string());
        }
    }
}

struct Worker {
    context: Arc<ThreadContext>,

    handle: JoinHandle<()>,
}

/// # WorkerPool
///
/// The fixed set of threads serving one executor run.
///
/// Each pool owns its own `running` flag, so threads left behind by an
/// abandoned start can never be revived by a later one.
pub(crate) struct WorkerPool {
    running: Arc<AtomicBool>,

    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawns `thread_count` workers running the dispatch loop.
    ///
    /// If any spawn fails, the threads already started are stopped before the
    /// error is returned; those still in their init hook are detached.
    pub(crate) fn spawn<I, O, C, H>(
        shared: &Arc<Shared<I, O, C, H>>,
        thread_count: usize,
    ) -> Result<Self>
    where
        I: Clone + Send + Sync + 'static,
        O: Send + 'static,
        C: BatchCompute<I, O>,
        H: WorkerHooks,
    {
        if thread_count == 0 {
            error!("cannot start workers with zero threads");
            return Err(BsfError::ZeroThreads);
        }

        let mut pool = Self {
            running: Arc::new(AtomicBool::new(true)),
            workers: Vec::with_capacity(thread_count),
        };

        for index in 0..thread_count {
            let context = Arc::new(ThreadContext::new(index));
            let spawned = thread::Builder::new()
                .name(format!("bsf-worker-{index}"))
                .spawn({
                    let context = context.clone();
                    let shared = shared.clone();
                    let running = pool.running.clone();
                    move || {
                        let span = info_span!("bsf_worker", index);
                        let _entered = span.enter();
                        let _pill = InitPill { context: &context };
                        dispatch_loop(&context, &shared, &running);
                    }
                });

            match spawned {
                Ok(handle) => pool.workers.push(Worker { context, handle }),
                Err(source) => {
                    error!(index, %source, "failed to create worker thread");
                    pool.shutdown(&shared.queue, true);
                    return Err(BsfError::Spawn { index, source });
                }
            }
        }

        Ok(pool)
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn statuses(&self) -> Vec<InitStatus> {
        self.workers.iter().map(|w| w.context.status()).collect()
    }

    /// Blocks until every worker is ready, any worker fails, or `timeout`
    /// elapses. A zero `timeout` waits indefinitely.
    pub(crate) fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            let mut ready = 0;
            for worker in &self.workers {
                match worker.context.status() {
                    InitStatus::Ready => ready += 1,
                    InitStatus::Pending => {}
                    InitStatus::Failed => {
                        let index = worker.context.index();
                        let reason = worker.context.failure().unwrap_or_default();
                        error!(index, %reason, "worker init failed");
                        return Err(BsfError::WorkerInit { index, reason });
                    }
                }
            }

            if ready == self.workers.len() {
                debug!(workers = ready, "worker init done");
                return Ok(());
            }

            let mut pause = INIT_POLL_INTERVAL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    error!(ready, total = self.workers.len(), ?timeout, "worker init timed out");
                    return Err(BsfError::InitTimeout {
                        ready,
                        total: self.workers.len(),
                        timeout,
                    });
                }
                pause = pause.min(deadline - now);
            }
            thread::sleep(pause);
        }
    }

    /// Clears the running flag, wakes idle workers, and joins them.
    ///
    /// Workers still inside their init hook are detached instead of joined
    /// when `detach_pending` is set; they exit on their own once init returns.
    /// A failed startup sets it so it never waits on a slow hook.
    pub(crate) fn shutdown<I, O>(self, queue: &WorkQueue<I, O>, detach_pending: bool) {
        self.running.store(false, Ordering::SeqCst);
        queue.wake_all();

        for Worker { context, handle } in self.workers {
            let index = context.index();
            if detach_pending && context.status() == InitStatus::Pending {
                warn!(index, "detaching worker stuck in init");
                continue;
            }
            if handle.join().is_err() {
                error!(index, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use crate::core::handler::NoHooks;
    use crate::error::HookError;

    fn identity(inputs: &[u8], outputs: &mut Vec<u8>) {
        outputs.extend_from_slice(inputs);
    }

    fn shared<H: WorkerHooks>(hooks: H) -> Arc<Shared<u8, u8, fn(&[u8], &mut Vec<u8>), H>> {
        Arc::new(Shared {
            queue: WorkQueue::new(),
            compute: identity as fn(&[u8], &mut Vec<u8>),
            hooks,
            capacity: 8,
            align: 1,
        })
    }

    /// Init hook whose behavior depends on the worker index.
    struct ScriptedInit {
        fail_index: Option<usize>,
        delay: Duration,
        live: Arc<AtomicUsize>,
    }

    struct Live(Arc<AtomicUsize>);

    impl Drop for Live {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl WorkerHooks for ScriptedInit {
        type Context = Live;

        fn init(&self, worker: usize) -> std::result::Result<Live, HookError> {
            thread::sleep(self.delay);
            if Some(worker) == self.fail_index {
                return Err(format!("worker {worker} has no device").into());
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Live(self.live.clone()))
        }
    }

    #[test]
    fn test_thread_context_transitions() {
        let context = ThreadContext::new(7);
        assert_eq!(context.index(), 7);
        assert_eq!(context.status(), InitStatus::Pending);
        context.mark_ready();
        assert_eq!(context.status(), InitStatus::Ready);
        context.mark_failed("gone".into());
        assert_eq!(context.status(), InitStatus::Failed);
        assert_eq!(context.failure().as_deref(), Some("gone"));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let shared = shared(NoHooks);
        assert!(matches!(WorkerPool::spawn(&shared, 0), Err(BsfError::ZeroThreads)));
    }

    #[test]
    fn test_all_workers_become_ready() {
        let shared = shared(NoHooks);
        let pool = WorkerPool::spawn(&shared, 3).unwrap();
        pool.wait_ready(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.statuses().iter().all(|s| *s == InitStatus::Ready));
        pool.shutdown(&shared.queue, false);
    }

    #[test]
    fn test_one_failed_init_fails_barrier() {
        let live = Arc::new(AtomicUsize::new(0));
        let shared = shared(ScriptedInit {
            fail_index: Some(2),
            delay: Duration::ZERO,
            live: live.clone(),
        });
        let pool = WorkerPool::spawn(&shared, 4).unwrap();

        let err = pool.wait_ready(Duration::ZERO).unwrap_err();
        assert!(matches!(err, BsfError::WorkerInit { index: 2, .. }));

        pool.shutdown(&shared.queue, false);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_slow_init_times_out() {
        let live = Arc::new(AtomicUsize::new(0));
        let shared = shared(ScriptedInit {
            fail_index: None,
            delay: Duration::from_millis(500),
            live: live.clone(),
        });
        let pool = WorkerPool::spawn(&shared, 2).unwrap();

        let started = Instant::now();
        let err = pool.wait_ready(Duration::from_millis(150)).unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(450));
        assert!(matches!(err, BsfError::InitTimeout { ready: 0, total: 2, .. }));

        pool.shutdown(&shared.queue, true);
        // Detached workers finish init, see the cleared flag, and exit.
        thread::sleep(Duration::from_millis(700));
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    struct PanickingInit;

    impl WorkerHooks for PanickingInit {
        type Context = ();

        fn init(&self, _worker: usize) -> std::result::Result<(), HookError> {
            panic!("driver crashed");
        }
    }

    #[test]
    fn test_panicking_init_counts_as_failure() {
        let shared = shared(PanickingInit);
        let pool = WorkerPool::spawn(&shared, 1).unwrap();
        let err = pool.wait_ready(Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("panicked during init"));
        pool.shutdown(&shared.queue, false);
    }
}
