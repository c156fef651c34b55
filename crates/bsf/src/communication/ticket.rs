use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use futures::FutureExt;
use tokio::sync::oneshot::{self, error::TryRecvError};
use uuid::Uuid;
use super::task::Outcome;
use crate::error::{BsfError, Result};

/// # Ticket
///
/// The caller's side of a submitted task.
///
/// A ticket resolves exactly once, to the task's outputs in input order, to a
/// compute failure, or to [`BsfError::Cancelled`] if the executor shut down
/// (or otherwise abandoned the task) before the results were produced.
///
/// Synchronous callers use [`Ticket::wait`]. Async callers can `.await` the
/// ticket directly.
///
/// ```ignore
/// let ticket = executor.submit(vec![1.0, 2.0, 3.0])?;
/// let outputs = ticket.wait()?;
/// ```
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket<O> {
    id: Uuid,

    receiver: oneshot::Receiver<Outcome<O>>,
}

impl<O> Ticket<O> {
    pub(crate) fn new(id: Uuid, receiver: oneshot::Receiver<Outcome<O>>) -> Self {
        Self { id, receiver }
    }

    /// Identifier of the underlying task, as it appears in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Blocks the current thread until the task resolves.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime; `.await` the ticket
    /// there instead.
    pub fn wait(self) -> Result<Vec<O>> {
        self.receiver.blocking_recv().unwrap_or(Err(BsfError::Cancelled))
    }

    /// Takes the outcome if the task has already resolved, or hands the
    /// ticket back if it is still pending.
    ///
    /// ```ignore
    /// let ticket = match ticket.try_wait() {
    ///     Ok(outcome) => return outcome,
    ///     Err(pending) => pending,
    /// };
    /// ```
    pub fn try_wait(mut self) -> std::result::Result<Result<Vec<O>>, Self> {
        match self.receiver.try_recv() {
            Ok(outcome) => Ok(outcome),
            Err(TryRecvError::Empty) => Err(self),
            Err(TryRecvError::Closed) => Ok(Err(BsfError::Cancelled)),
        }
    }
}

impl<O> Future for Ticket<O> {
    type Output = Result<Vec<O>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .receiver
            .poll_unpin(cx)
            .map(|received| received.unwrap_or(Err(BsfError::Cancelled)))
    }
}

impl<O> std::fmt::Debug for Ticket<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket").field("id", &self.id).finish_non_exhaustive()
    }
}
