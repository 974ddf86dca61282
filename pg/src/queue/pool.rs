//! Fixed-size pool of async workers draining the task queue
//!
//! Handles:
//! - Worker lifecycle (start, graceful stop with timeout, abort)
//! - Enqueueing single tasks, batches and upstream `(panel_id, prompt)` pairs
//! - Status and statistics snapshots

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{QueueError, QueueStatus, TaskQueue, TaskRegistry};
use crate::config::{Config, QueueConfig};
use crate::domain::{GenerationResult, GenerationTask, PanelOutcome, TaskSpec, TaskStatus};
use crate::orchestrator::{RetryFallbackOrchestrator, panic_message};
use crate::provider::{ErrorKind, GenerationError};
use crate::stats::{StatisticsAggregator, StatisticsSnapshot};

/// State shared between the pool handle and its workers
struct Shared {
    queue: TaskQueue,
    registry: TaskRegistry,
    orchestrator: Arc<RetryFallbackOrchestrator>,
    stats: Arc<StatisticsAggregator>,
    running: AtomicBool,
    busy: AtomicUsize,
    /// Signalled whenever a task reaches a terminal status
    progress: Notify,
    poll_interval: Duration,
}

impl Shared {
    fn complete(&self, task_id: &str, result: GenerationResult) {
        if let Some(success) = self.registry.finish(task_id, result) {
            self.stats.record_task(success);
            info!(%task_id, success, "Task finished");
        }
        self.progress.notify_waiters();
    }
}

/// Bounded pool of generation workers
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: QueueConfig,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<RetryFallbackOrchestrator>, config: QueueConfig) -> Self {
        debug!(?config, "WorkerPool::new: called");
        let shared = Shared {
            queue: TaskQueue::new(),
            registry: TaskRegistry::new(),
            stats: orchestrator.stats(),
            orchestrator,
            running: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
            progress: Notify::new(),
            poll_interval: config.poll_interval(),
        };
        Self {
            shared: Arc::new(shared),
            workers: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Build the orchestrator and pool from configuration
    pub fn from_config(config: &Config) -> Result<Self, QueueError> {
        let orchestrator = RetryFallbackOrchestrator::from_config(config)?;
        Ok(Self::new(Arc::new(orchestrator), config.queue.clone()))
    }

    pub fn orchestrator(&self) -> &RetryFallbackOrchestrator {
        &self.shared.orchestrator
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn the workers; a no-op if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("WorkerPool::start: already running");
            return;
        }
        self.shared.queue.reopen();

        let mut workers = self.workers();
        for worker_id in 0..self.config.max_concurrent {
            let shared = self.shared.clone();
            workers.push(tokio::spawn(worker_loop(worker_id, shared)));
        }
        info!(workers = self.config.max_concurrent, "Worker pool started");
    }

    /// Stop dequeuing, wait for in-flight tasks up to the shutdown timeout,
    /// then abort whatever is left
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            debug!("WorkerPool::stop: not running");
            return;
        }
        self.shared.queue.close();

        let handles = std::mem::take(&mut *self.workers());
        info!(workers = handles.len(), "Stopping worker pool");

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
        let mut aborted = 0;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                // Resolves once the worker's future has been dropped
                let _ = handle.await;
                aborted += 1;
            }
        }

        self.shared.busy.store(0, Ordering::SeqCst);

        if aborted > 0 {
            warn!(aborted, "Aborted workers after shutdown timeout");
            for task_id in self.shared.registry.ids_with_status(TaskStatus::Processing) {
                let Some(task) = self.shared.registry.get(&task_id) else {
                    continue;
                };
                let provider = self.shared.orchestrator.primary_name(&task.request);
                self.shared.complete(
                    &task_id,
                    GenerationResult::failure(
                        provider,
                        task.request.prompt,
                        GenerationError::new(ErrorKind::Unknown, "Worker stopped before the task finished"),
                    ),
                );
            }
        }
        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Register a task and queue it; returns its id
    pub fn add_task(&self, spec: TaskSpec) -> Result<String, QueueError> {
        let task = GenerationTask::from_spec(spec);
        let task_id = task.task_id.clone();
        debug!(%task_id, "WorkerPool::add_task: called");
        self.shared.registry.insert(task)?;
        self.shared.queue.push(task_id.clone());
        Ok(task_id)
    }

    /// Register several tasks atomically, then queue them in order
    pub fn add_tasks_batch(&self, specs: Vec<TaskSpec>) -> Result<Vec<String>, QueueError> {
        debug!(count = specs.len(), "WorkerPool::add_tasks_batch: called");
        let tasks: Vec<GenerationTask> = specs.into_iter().map(GenerationTask::from_spec).collect();
        let ids: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
        self.shared.registry.insert_all(tasks)?;
        for id in &ids {
            self.shared.queue.push(id.clone());
        }
        Ok(ids)
    }

    /// Queue one panel under its own id
    pub fn add_panel(&self, panel_id: impl Into<String>, prompt: impl Into<String>) -> Result<String, QueueError> {
        self.add_task(TaskSpec::new(prompt).with_id(panel_id))
    }

    /// Queue an ordered list of `(panel_id, prompt)` pairs
    pub fn add_panels<I, A, B>(&self, panels: I) -> Result<Vec<String>, QueueError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let specs = panels
            .into_iter()
            .map(|(panel_id, prompt)| TaskSpec::new(prompt).with_id(panel_id))
            .collect();
        self.add_tasks_batch(specs)
    }

    pub fn get_task(&self, task_id: &str) -> Option<GenerationTask> {
        self.shared.registry.get(task_id)
    }

    pub fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.shared.registry.status(task_id)
    }

    /// Wait until no task is pending or processing
    ///
    /// Returns false if `timeout` elapsed first. Without a timeout this waits
    /// indefinitely, so the pool should be running.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        debug!(?timeout, "WorkerPool::wait_for_completion: called");
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.shared.progress.notified();
            if self.shared.registry.all_terminal() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.shared.registry.all_terminal();
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        let counts = self.shared.registry.counts();
        let totals = self.shared.stats.task_totals();
        QueueStatus {
            queue_size: self.shared.queue.len(),
            total_tasks: counts.total,
            pending: counts.pending,
            processing: counts.processing,
            total_processed: totals.total_processed,
            total_success: totals.total_success,
            total_failed: totals.total_failed,
            workers_active: self.workers().iter().filter(|h| !h.is_finished()).count(),
            is_running: self.is_running(),
        }
    }

    /// Workers currently running a task
    pub fn busy_workers(&self) -> usize {
        self.shared.busy.load(Ordering::SeqCst)
    }

    pub fn get_statistics(&self) -> StatisticsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Downstream records for every terminal task, in enqueue order
    pub fn outcomes(&self) -> Vec<PanelOutcome> {
        self.shared.registry.outcomes()
    }

    /// Forget terminal tasks; returns how many were removed
    pub fn clear_completed(&self) -> usize {
        let removed = self.shared.registry.clear_completed();
        info!(removed, "Cleared completed tasks");
        removed
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    debug!(worker_id, "worker_loop: started");
    while shared.running.load(Ordering::SeqCst) {
        let Some(task_id) = shared.queue.pop(shared.poll_interval).await else {
            continue;
        };
        let Some(request) = shared.registry.begin(&task_id) else {
            debug!(worker_id, %task_id, "worker_loop: task not pending, skipping");
            continue;
        };

        shared.busy.fetch_add(1, Ordering::SeqCst);
        debug!(worker_id, %task_id, "worker_loop: processing");

        let result = match AssertUnwindSafe(shared.orchestrator.run_to_result(&request))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker_id, %task_id, %message, "Generation panicked");
                GenerationResult::failure(
                    request.provider_name.clone().unwrap_or_default(),
                    &request.prompt,
                    GenerationError::new(ErrorKind::Unknown, format!("Generation panicked: {}", message)),
                )
            }
        };

        shared.complete(&task_id, result);
        shared.busy.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker_id, "worker_loop: exiting");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.queue.close();
        for handle in self.workers().drain(..) {
            handle.abort();
        }
    }
}
