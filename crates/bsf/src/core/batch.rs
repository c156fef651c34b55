use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;
use crate::communication::Task;
use crate::error::BsfError;
use super::handler::BatchCompute;

/// A claimed range of one task's items.
struct Contribution<I, O> {
    task: Arc<Task<I, O>>,

    range: Range<usize>,
}

/// # Batch
///
/// One dispatch round's worth of work.
///
/// A batch is built by [`append_task`](Batch::append_task) while the queue lock
/// is held, then merged, computed, and distributed by the worker that fetched
/// it. The item count never exceeds `capacity`, and because task sizes and
/// `capacity` are multiples of `align`, every claim and therefore the batch as
/// a whole stays aligned.
pub(crate) struct Batch<I, O> {
    align: usize,

    /// Unclaimed room left in this batch
    room: usize,

    contributions: Vec<Contribution<I, O>>,

    inputs: Vec<I>,

    outputs: Vec<O>,
}

impl<I, O> Batch<I, O> {
    pub(crate) fn new(capacity: usize, align: usize) -> Self {
        assert!(align > 0 && capacity % align == 0, "capacity {capacity} not aligned to {align}");
        Self {
            align,
            room: capacity,
            contributions: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Claims as much of `task` as fits and returns the room left afterwards.
    pub(crate) fn append_task(&mut self, task: &Arc<Task<I, O>>) -> usize {
        if let Some(range) = task.claim(self.room) {
            assert_eq!(range.len() % self.align, 0, "unaligned claim {range:?}");
            self.room -= range.len();
            debug!(task = %task.id(), start = range.start, end = range.end, "claimed");
            self.contributions.push(Contribution {
                task: task.clone(),
                range,
            });
        }
        self.room
    }

    /// Total claimed items.
    pub(crate) fn len(&self) -> usize {
        self.contributions.iter().map(|c| c.range.len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Number of task pieces in this batch.
    pub(crate) fn contributions(&self) -> usize {
        self.contributions.len()
    }

    /// Copies every claimed input range into one contiguous buffer.
    pub(crate) fn merge_inputs(&mut self)
    where
        I: Clone,
    {
        let total = self.len();
        self.inputs.clear();
        self.inputs.reserve(total);
        for contribution in &self.contributions {
            self.inputs
                .extend_from_slice(&contribution.task.input()[contribution.range.clone()]);
        }
    }

    #[cfg(test)]
    pub(crate) fn inputs(&self) -> &[I] {
        &self.inputs
    }

    /// Runs `compute` over the merged inputs.
    ///
    /// A panic in `compute`, or an output buffer that does not line up with the
    /// inputs, is reported as [`BsfError::ComputeFailed`].
    pub(crate) fn invoke<C>(&mut self, compute: &C) -> Result<(), BsfError>
    where
        C: BatchCompute<I, O> + ?Sized,
    {
        let mut outputs = Vec::with_capacity(self.inputs.len());
        let inputs = &self.inputs;
        panic::catch_unwind(AssertUnwindSafe(|| compute.compute(inputs, &mut outputs)))
            .map_err(|payload| BsfError::ComputeFailed(panic_message("compute", payload.as_ref())))?;

        if outputs.len() != self.inputs.len() {
            return Err(BsfError::ComputeFailed(format!(
                "compute produced {} outputs for {} inputs",
                outputs.len(),
                self.inputs.len()
            )));
        }
        self.outputs = outputs;
        Ok(())
    }

    /// Hands each contribution its slice of the outputs.
    ///
    /// Returns how many tasks this round completed.
    pub(crate) fn distribute_results(&mut self) -> usize {
        let mut outputs = std::mem::take(&mut self.outputs).into_iter();
        let mut completed = 0;
        for Contribution { task, range } in self.contributions.drain(..) {
            let count = range.len();
            if task.deliver(range, outputs.by_ref().take(count)) {
                completed += 1;
            }
        }
        debug_assert!(outputs.next().is_none(), "outputs left over after distribution");
        completed
    }

    /// Resolves every contributing task with a compute failure.
    pub(crate) fn fail_all(&mut self, reason: &str) {
        for Contribution { task, .. } in self.contributions.drain(..) {
            task.fail(BsfError::ComputeFailed(reason.to_string()));
        }
    }
}

/// Renders a caught panic payload as `"{what} panicked: {message}"`.
pub(super) fn panic_message(what: &str, payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("{what} panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("{what} panicked: {message}")
    } else {
        format!("{what} panicked")
    }
}
