use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::{Condvar, Mutex};
use crate::communication::Task;
use super::batch::Batch;

struct QueueState<I, O> {
    tasks: VecDeque<Arc<Task<I, O>>>,

    /// Whether pushes are accepted
    open: bool,
}

/// # WorkQueue
///
/// FIFO of submitted tasks shared by every worker thread.
///
/// The lock guards queue membership and the claims made while a batch is
/// being filled. A task leaves the queue only once all of its items have been
/// claimed; until then it stays at the head and the next batch continues where
/// the previous one stopped.
///
/// ## Fairness
///
/// Batches are filled strictly from the head. A task larger than a batch
/// therefore occupies the head for several rounds and everything queued
/// behind it waits until it is fully claimed.
pub(crate) struct WorkQueue<I, O> {
    state: Mutex<QueueState<I, O>>,

    available: Condvar,
}

impl<I, O> WorkQueue<I, O> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                open: false,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn open(&self) {
        self.state.lock().open = true;
    }

    /// Appends a task and wakes one waiting worker.
    ///
    /// Hands the task back if the queue is closed.
    pub(crate) fn push(&self, task: Arc<Task<I, O>>) -> Result<(), Arc<Task<I, O>>> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(task);
        }
        state.tasks.push_back(task);
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until work is queued, then fills `batch` from the head.
    ///
    /// Returns `false` without touching `batch` once `running` is cleared.
    pub(crate) fn fetch_batch(&self, batch: &mut Batch<I, O>, running: &AtomicBool) -> bool {
        let mut state = self.state.lock();
        loop {
            if !running.load(Ordering::SeqCst) {
                return false;
            }
            if !state.tasks.is_empty() {
                break;
            }
            self.available.wait(&mut state);
        }

        while let Some(task) = state.tasks.front() {
            let room = batch.append_task(task);
            if task.is_drained() {
                state.tasks.pop_front();
            }
            if room == 0 {
                break;
            }
        }

        assert!(!batch.is_empty(), "fetched an empty batch from a non-empty queue");
        true
    }

    /// Stops accepting tasks, wakes every worker, and returns what was queued.
    pub(crate) fn close(&self) -> Vec<Arc<Task<I, O>>> {
        let mut state = self.state.lock();
        state.open = false;
        self.available.notify_all();
        state.tasks.drain(..).collect()
    }

    /// Wakes every worker so it re-checks its running flag.
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.available.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }
}
