//! # Scheduling core
//!
//! * [`queue`] - the shared FIFO workers fetch batches from
//! * [`batch`] - assembling one round's batch and fanning its results back out
//! * [`dispatcher`] - the loop each worker thread runs
//! * [`worker`] - spawning workers, the startup barrier, and shutdown
//! * [`handler`] - the compute callback and per-thread hook traits
//! * [`pool`] - the bound on tasks in flight
//!
pub mod handler;
pub(crate) mod batch;
pub(crate) mod dispatcher;
pub(crate) mod pool;
pub(crate) mod queue;
pub(crate) mod worker;
