//! Task queue, registry and worker pool
//!
//! Tasks enter as [`TaskSpec`](crate::domain::TaskSpec)s, get an id and a
//! `pending` entry in the [`TaskRegistry`], and their ids are pushed onto the
//! [`TaskQueue`]. Each of the [`WorkerPool`]'s workers pops ids in FIFO order
//! and is the only writer of the tasks it popped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod pool;
mod registry;
mod task_queue;

pub use pool::WorkerPool;
pub use registry::{StatusCounts, TaskRegistry};
pub use task_queue::TaskQueue;

use crate::orchestrator::OrchestratorError;

/// Errors from enqueueing or pool construction
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Snapshot of queue and worker state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Ids waiting to be dequeued
    pub queue_size: usize,
    /// Tasks in the registry
    pub total_tasks: usize,
    pub pending: usize,
    pub processing: usize,
    pub total_processed: u64,
    pub total_success: u64,
    pub total_failed: u64,
    /// Worker tasks still alive
    pub workers_active: usize,
    pub is_running: bool,
}
