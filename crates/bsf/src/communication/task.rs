use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use tokio::sync::oneshot::Sender;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::core::pool::TaskPermit;
use crate::error::BsfError;

/// What a caller eventually receives for a task.
pub(crate) type Outcome<O> = Result<Vec<O>, BsfError>;

/// # Task
///
/// One caller's request as it moves through the scheduler.
///
/// A task owns its input items and one output slot per item. Workers claim
/// contiguous ranges of the input through [`Task::claim`], and later hand the
/// computed values back through [`Task::deliver`]. A large task can be claimed
/// by several batches, possibly held by different workers at the same time.
///
/// ## Counters
///
/// * `cursor` - offset of the next unclaimed item, only grows
/// * `remaining` - items not yet claimed by any batch, only shrinks
/// * `delivered` - items whose outputs have been written back
///
/// Claims are made while the queue lock is held, so `cursor` and `remaining`
/// always move together. Delivery happens outside any shared lock, which is why
/// completion keys off `delivered` reaching `size` rather than `remaining`
/// reaching zero: the last claim may be delivered before an earlier one.
///
/// The completion sender is consumed exactly once, either by the final
/// delivery, by [`Task::fail`], or implicitly when the task is dropped.
pub(crate) struct Task<I, O> {
    id: Uuid,

    input: Vec<I>,

    output: Mutex<Vec<Option<O>>>,

    size: usize,

    remaining: AtomicUsize,

    cursor: AtomicUsize,

    delivered: AtomicUsize,

    completion: Mutex<Option<Sender<Outcome<O>>>>,

    /// Released back to the task pool when the last batch lets go of the task
    _permit: TaskPermit,
}

impl<I, O> Task<I, O> {
    pub(crate) fn new(input: Vec<I>, sender: Sender<Outcome<O>>, permit: TaskPermit) -> Self {
        let size = input.len();
        let mut output = Vec::with_capacity(size);
        output.resize_with(size, || None);
        Self {
            id: Uuid::new_v4(),
            input,
            output: Mutex::new(output),
            size,
            remaining: AtomicUsize::new(size),
            cursor: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            completion: Mutex::new(Some(sender)),
            _permit: permit,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn input(&self) -> &[I] {
        &self.input
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.remaining() == 0
    }

    /// Claims up to `max` unconsumed items and returns their index range.
    ///
    /// Returns `None` when nothing is left or `max` is zero.
    pub(crate) fn claim(&self, max: usize) -> Option<Range<usize>> {
        let taken = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rem| {
                let take = rem.min(max);
                (take > 0).then(|| rem - take)
            })
            .ok()
            .map(|rem| rem.min(max))?;

        let begin = self.cursor.fetch_add(taken, Ordering::AcqRel);
        assert!(
            begin + taken <= self.size,
            "task {} over-claimed: {}..{} of {}",
            self.id, begin, begin + taken, self.size
        );
        Some(begin..begin + taken)
    }

    /// Writes the outputs for a previously claimed range.
    ///
    /// Returns `true` if this delivery completed the task and its caller was
    /// signaled.
    pub(crate) fn deliver(&self, range: Range<usize>, values: impl Iterator<Item = O>) -> bool {
        let count = range.len();
        {
            let mut slots = self.output.lock();
            let mut written = 0;
            for (slot, value) in slots[range].iter_mut().zip(values) {
                assert!(slot.replace(value).is_none(), "output slot written twice");
                written += 1;
            }
            assert_eq!(written, count, "short delivery for task {}", self.id);
        }

        let before = self.delivered.fetch_add(count, Ordering::AcqRel);
        debug_assert!(before + count <= self.size);
        if before + count == self.size {
            self.complete();
            true
        } else {
            false
        }
    }

    /// Resolves the caller with `error` if it has not been signaled yet.
    pub(crate) fn fail(&self, error: BsfError) -> bool {
        match self.completion.lock().take() {
            Some(sender) => {
                debug!(task = %self.id, %error, "failing task");
                // Receiver gone means the caller stopped waiting; nothing to do.
                let _ = sender.send(Err(error));
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel(&self) -> bool {
        self.fail(BsfError::Cancelled)
    }

    fn complete(&self) {
        let Some(sender) = self.completion.lock().take() else {
            debug!(task = %self.id, "task finished after it was already resolved");
            return;
        };

        let slots = std::mem::take(&mut *self.output.lock());
        let outcome = match slots.into_iter().collect::<Option<Vec<O>>>() {
            Some(values) => Ok(values),
            None => Err(BsfError::ComputeFailed(format!(
                "task {} completed with unwritten output slots",
                self.id
            ))),
        };

        debug!(task = %self.id, size = self.size, "task complete");
        if sender.send(outcome).is_err() {
            debug!(task = %self.id, "caller dropped its ticket before completion");
        }
    }
}

impl<I, O> Drop for Task<I, O> {
    fn drop(&mut self) {
        if let Some(sender) = self.completion.get_mut().take() {
            if !sender.is_closed() {
                warn!(task = %self.id, "task dropped before completion; caller sees cancellation");
            }
        }
    }
}
