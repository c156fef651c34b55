use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use crate::error::{BsfError, Result};

/// # TaskPool
///
/// Bounds how many tasks may be in flight at once.
///
/// Each submitted task holds a [`TaskPermit`] for its whole life. The permit
/// travels inside the task, so its slot only returns to the pool once the
/// caller has been signaled and every batch holding a piece of the task has
/// dropped it. A capacity of `0` disables the bound.
pub(crate) struct TaskPool {
    slots: Option<Arc<Semaphore>>,

    capacity: usize,
}

/// A claimed slot in the [`TaskPool`], released on drop.
pub(crate) struct TaskPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl TaskPool {
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = (capacity > 0).then(|| Arc::new(Semaphore::new(capacity)));
        Self { slots, capacity }
    }

    /// Takes a slot without waiting, failing when the pool is exhausted.
    pub(crate) fn acquire(&self) -> Result<TaskPermit> {
        match &self.slots {
            None => Ok(TaskPermit { _permit: None }),
            Some(slots) => slots
                .clone()
                .try_acquire_owned()
                .map(|permit| TaskPermit { _permit: Some(permit) })
                .map_err(|_| BsfError::PoolExhausted { capacity: self.capacity }),
        }
    }

    /// Tasks currently holding a slot; always zero for an unbounded pool.
    pub(crate) fn in_flight(&self) -> usize {
        self.slots
            .as_ref()
            .map_or(0, |slots| self.capacity - slots.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_pool_never_exhausts() {
        let pool = TaskPool::new(0);
        let permits: Vec<_> = (0..1000).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(permits.len(), 1000);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_bounded_pool_exhausts_and_recycles() {
        let pool = TaskPool::new(2);
        let first = pool.acquire().unwrap();
        let _second = pool.acquire().unwrap();
        assert_eq!(pool.in_flight(), 2);

        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, BsfError::PoolExhausted { capacity: 2 }));

        drop(first);
        assert_eq!(pool.in_flight(), 1);
        assert!(pool.acquire().is_ok());
    }
}
