//! FIFO of task ids shared by the workers

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

/// Unbounded FIFO with async, timeout-bounded pops
#[derive(Debug, Default)]
pub struct TaskQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task_id: String) {
        debug!(%task_id, "TaskQueue::push: called");
        match self.items.lock() {
            Ok(mut items) => items.push_back(task_id),
            Err(poisoned) => poisoned.into_inner().push_back(task_id),
        }
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<String> {
        let mut items = match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = items.pop_front();
        if next.is_some() && !items.is_empty() {
            // Pass the wakeup on to another idle worker
            self.notify.notify_one();
        }
        next
    }

    /// Next task id, waiting at most `timeout`
    ///
    /// Returns `None` on timeout or once the queue is closed.
    pub async fn pop(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                debug!("TaskQueue::pop: closed");
                return None;
            }
            if let Some(task_id) = self.try_pop() {
                return Some(task_id);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return if self.is_closed() { None } else { self.try_pop() };
            }
        }
    }

    /// Stop handing out ids and wake every waiting worker
    pub fn close(&self) {
        debug!("TaskQueue::close: called");
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn reopen(&self) {
        debug!("TaskQueue::reopen: called");
        self.closed.store(false, Ordering::SeqCst);
        if !self.is_empty() {
            self.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
