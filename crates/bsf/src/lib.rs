//! # bsf
//!
//! A **b**atch **s**cheduling **f**ramework for inference servers.
//!
//! ## Overview
//!
//! Inference backends are most efficient when they see many inputs at once,
//! but requests arrive one at a time from many concurrent callers. `bsf` sits
//! between the two: callers submit their own inputs and block (or `.await`)
//! on a [`Ticket`], while a fixed pool of worker threads merges whatever is
//! queued into bounded batches, runs a shared compute callback over each batch,
//! and hands every caller back exactly its own slice of the outputs.
//!
//! ## Architecture
//!
//! ### Tasks and tickets
//!
//! Each submission becomes a task holding the caller's inputs and one output
//! slot per input. The caller keeps a [`Ticket`], which resolves once every
//! slot has been written, or to [`BsfError::Cancelled`] if the executor stops
//! first. No caller is ever left waiting on a task nobody will finish.
//!
//! ### Batching
//!
//! Workers fill batches from the head of a FIFO queue. A batch never holds more
//! than `max_batch_size` items, and batch sizes are always a multiple of
//! `batch_align`. A task bigger than the room left in a batch is split; the rest
//! of it is picked up by the next round, possibly on another worker, and the
//! task's ticket resolves only when the last piece lands.
//!
//! Because batches are filled strictly from the head, a very large task delays
//! the tasks queued behind it until it has been fully claimed.
//!
//! ### Workers
//!
//! [`TaskExecutor::start`] spawns the workers and waits until each has run its
//! [`WorkerHooks::init`] hook, failing the whole start if any of them fails or
//! the init timeout passes. [`TaskExecutor::stop`] stops them cooperatively and
//! cancels whatever is still queued.
//!
//! ## Example
//!
//! ```ignore
//! use bsf::{ExecutorConfig, TaskExecutor};
//! use std::time::Duration;
//!
//! let executor = TaskExecutor::new(
//!     ExecutorConfig::new().max_batch_size(64).batch_align(4),
//!     |inputs: &[f32], outputs: &mut Vec<f32>| outputs.extend(inputs.iter().map(|x| x.tanh())),
//! )?;
//! executor.start(4, Duration::from_secs(10))?;
//!
//! let outputs = executor.submit(vec![0.5; 8])?.wait()?;
//! assert_eq!(outputs.len(), 8);
//! ```

mod communication;
mod config;
mod error;
mod core;
mod executor;

pub use communication::Ticket;
pub use config::ExecutorConfig;
pub use crate::core::handler::{BatchCompute, NoHooks, WorkerHooks};
pub use crate::core::worker::InitStatus;
pub use error::{BsfError, HookError, Result};
pub use executor::TaskExecutor;
