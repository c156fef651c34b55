use crate::error::HookError;

/// Runs the model over one merged batch.
///
/// `outputs` arrives empty with capacity for `inputs.len()` items and must hold
/// exactly one output per input, in the same order, when the call returns. The
/// call is synchronous and may take as long as it needs; the scheduler imposes
/// no deadline.
///
/// Any `Fn(&[I], &mut Vec<O>)` closure is a valid implementation.
pub trait BatchCompute<I, O>: Send + Sync + 'static {
    fn compute(&self, inputs: &[I], outputs: &mut Vec<O>);
}

impl<I, O, F> BatchCompute<I, O> for F
where
    F: Fn(&[I], &mut Vec<O>) + Send + Sync + 'static,
{
    fn compute(&self, inputs: &[I], outputs: &mut Vec<O>) {
        self(inputs, outputs)
    }
}

/// Per-worker setup and per-round housekeeping.
///
/// `init` runs once on each worker thread before it takes work, and whatever
/// it returns lives on that thread until the worker stops. Any init failure
/// fails the executor's start. `reset` runs before every dispatch round;
/// failures there are logged and the round proceeds.
pub trait WorkerHooks: Send + Sync + 'static {
    type Context;

    fn init(&self, worker: usize) -> Result<Self::Context, HookError>;

    fn reset(&self, _context: &mut Self::Context) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl WorkerHooks for NoHooks {
    type Context = ();

    fn init(&self, _worker: usize) -> Result<(), HookError> {
        Ok(())
    }
}
