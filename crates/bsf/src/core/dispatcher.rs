use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};
use super::batch::{Batch, panic_message};
use super::handler::{BatchCompute, WorkerHooks};
use super::queue::WorkQueue;
use super::worker::ThreadContext;

/// State shared by every worker of one executor.
pub(crate) struct Shared<I, O, C, H> {
    pub(crate) queue: WorkQueue<I, O>,

    pub(crate) compute: C,

    pub(crate) hooks: H,

    /// Items per batch
    pub(crate) capacity: usize,

    pub(crate) align: usize,
}

/// Body of a worker thread.
///
/// Runs the init hook, reports readiness through `context`, then repeats
/// reset, fetch, compute, and distribute until `running` is cleared. The flag
/// is checked at the top of every round and while waiting for work, so a batch
/// that has been fetched is always carried through to distribution.
pub(crate) fn dispatch_loop<I, O, C, H>(
    context: &ThreadContext,
    shared: &Shared<I, O, C, H>,
    running: &AtomicBool,
) where
    I: Clone,
    C: BatchCompute<I, O>,
    H: WorkerHooks,
{
    let mut user_context = match shared.hooks.init(context.index()) {
        Ok(user_context) => {
            debug!("thread init hook succeeded");
            user_context
        }
        Err(err) => {
            error!(%err, "thread init hook failed, worker exits");
            context.mark_failed(err.to_string());
            return;
        }
    };
    context.mark_ready();

    while running.load(Ordering::SeqCst) {
        match panic::catch_unwind(AssertUnwindSafe(|| shared.hooks.reset(&mut user_context))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "thread reset hook failed"),
            Err(payload) => {
                let reason = panic_message("reset hook", payload.as_ref());
                error!(%reason, "thread reset hook panicked, worker keeps serving");
            }
        }

        let mut batch = Batch::new(shared.capacity, shared.align);
        if !shared.queue.fetch_batch(&mut batch, running) {
            break;
        }

        let items = batch.len();
        let tasks = batch.contributions();
        batch.merge_inputs();
        match batch.invoke(&shared.compute) {
            Ok(()) => {
                let completed = batch.distribute_results();
                debug!(items, tasks, completed, "batch dispatched");
            }
            Err(err) => {
                error!(%err, items, tasks, "batch failed");
                batch.fail_all(&err.to_string());
            }
        }
    }

    debug!("worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use crate::communication::{Task, Ticket};
    use crate::core::handler::NoHooks;
    use crate::core::pool::TaskPool;
    use crate::core::worker::InitStatus;
    use crate::error::{BsfError, HookError};

    fn square(inputs: &[u64], outputs: &mut Vec<u64>) {
        outputs.extend(inputs.iter().map(|x| x * x));
    }

    fn submit<C, H>(shared: &Shared<u64, u64, C, H>, items: Vec<u64>) -> Ticket<u64> {
        let (tx, rx) = oneshot::channel();
        let task = Arc::new(Task::new(items, tx, TaskPool::new(0).acquire().unwrap()));
        let id = task.id();
        assert!(shared.queue.push(task).is_ok());
        Ticket::new(id, rx)
    }

    fn shared<C, H>(compute: C, hooks: H) -> Arc<Shared<u64, u64, C, H>> {
        let shared = Arc::new(Shared {
            queue: WorkQueue::new(),
            compute,
            hooks,
            capacity: 4,
            align: 1,
        });
        shared.queue.open();
        shared
    }

    #[test]
    fn test_loop_serves_tasks_until_stopped() {
        let shared = shared(square, NoHooks);
        let running = Arc::new(AtomicBool::new(true));
        let context = Arc::new(ThreadContext::new(0));

        let worker = {
            let (shared, running, context) = (shared.clone(), running.clone(), context.clone());
            thread::spawn(move || dispatch_loop(&context, &shared, &running))
        };

        let first = submit(&shared, vec![1, 2, 3]);
        let second = submit(&shared, vec![4, 5, 6, 7, 8]);
        assert_eq!(first.wait().unwrap(), vec![1, 4, 9]);
        assert_eq!(second.wait().unwrap(), vec![16, 25, 36, 49, 64]);
        assert_eq!(context.status(), InitStatus::Ready);

        running.store(false, Ordering::SeqCst);
        shared.queue.wake_all();
        worker.join().unwrap();
    }

    struct FailingInit;

    impl WorkerHooks for FailingInit {
        type Context = ();

        fn init(&self, _worker: usize) -> Result<(), HookError> {
            Err("no device".into())
        }
    }

    #[test]
    fn test_init_failure_marks_context() {
        let shared = shared(square, FailingInit);
        let running = AtomicBool::new(true);
        let context = ThreadContext::new(3);

        dispatch_loop(&context, &shared, &running);

        assert_eq!(context.status(), InitStatus::Failed);
        assert_eq!(context.failure().as_deref(), Some("no device"));
    }

    struct FlakyReset {
        resets: Arc<AtomicUsize>,
    }

    impl WorkerHooks for FlakyReset {
        type Context = ();

        fn init(&self, _worker: usize) -> Result<(), HookError> {
            Ok(())
        }

        fn reset(&self, _context: &mut ()) -> Result<(), HookError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Err("stale cache".into())
        }
    }

    #[test]
    fn test_reset_failure_does_not_stop_processing() {
        let resets = Arc::new(AtomicUsize::new(0));
        let shared = shared(square, FlakyReset { resets: resets.clone() });
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let (shared, running) = (shared.clone(), running.clone());
            thread::spawn(move || dispatch_loop(&ThreadContext::new(0), &shared, &running))
        };

        assert_eq!(submit(&shared, vec![3]).wait().unwrap(), vec![9]);
        assert!(resets.load(Ordering::SeqCst) >= 1);

        running.store(false, Ordering::SeqCst);
        shared.queue.wake_all();
        worker.join().unwrap();
    }

    struct PanickyReset {
        resets: Arc<AtomicUsize>,
    }

    impl WorkerHooks for PanickyReset {
        type Context = ();

        fn init(&self, _worker: usize) -> Result<(), HookError> {
            Ok(())
        }

        fn reset(&self, _context: &mut ()) -> Result<(), HookError> {
            if self.resets.fetch_add(1, Ordering::SeqCst) < 2 {
                panic!("scratch buffer poisoned");
            }
            Ok(())
        }
    }

    #[test]
    fn test_reset_panic_does_not_kill_worker() {
        let resets = Arc::new(AtomicUsize::new(0));
        let shared = shared(square, PanickyReset { resets: resets.clone() });
        let running = Arc::new(AtomicBool::new(true));

        let first = submit(&shared, vec![2]);
        let worker = {
            let (shared, running) = (shared.clone(), running.clone());
            thread::spawn(move || dispatch_loop(&ThreadContext::new(0), &shared, &running))
        };

        assert_eq!(first.wait().unwrap(), vec![4]);
        assert_eq!(submit(&shared, vec![5]).wait().unwrap(), vec![25]);
        assert!(resets.load(Ordering::SeqCst) >= 2);

        running.store(false, Ordering::SeqCst);
        shared.queue.wake_all();
        assert!(worker.join().is_ok());
    }

    #[test]
    fn test_compute_failure_fails_batch_and_keeps_serving() {
        let calls = Arc::new(AtomicUsize::new(0));
        let compute = {
            let calls = calls.clone();
            move |inputs: &[u64], outputs: &mut Vec<u64>| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first batch explodes");
                }
                outputs.extend_from_slice(inputs);
            }
        };
        let shared = shared(compute, NoHooks);
        let running = Arc::new(AtomicBool::new(true));

        let first = submit(&shared, vec![1]);
        let worker = {
            let (shared, running) = (shared.clone(), running.clone());
            thread::spawn(move || dispatch_loop(&ThreadContext::new(0), &shared, &running))
        };

        assert!(matches!(first.wait(), Err(BsfError::ComputeFailed(_))));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(submit(&shared, vec![2]).wait().unwrap(), vec![2]);

        running.store(false, Ordering::SeqCst);
        shared.queue.wake_all();
        worker.join().unwrap();
    }
}
