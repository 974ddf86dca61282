//! Authoritative task state, keyed by task id

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::QueueError;
use crate::domain::{GenerationRequest, GenerationResult, GenerationTask, PanelOutcome, TaskStatus};

/// Task counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Tasks {
    by_id: HashMap<String, GenerationTask>,
    /// Insertion order, for outcome listings
    order: Vec<String>,
}

/// Registry of every task not yet cleared
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<Tasks>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tasks> {
        match self.tasks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tasks> {
        match self.tasks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, task: GenerationTask) -> Result<(), QueueError> {
        self.insert_all(vec![task])
    }

    /// Insert every task or none of them
    pub fn insert_all(&self, tasks: Vec<GenerationTask>) -> Result<(), QueueError> {
        debug!(count = tasks.len(), "TaskRegistry::insert_all: called");
        let mut guard = self.write();

        let mut incoming = std::collections::HashSet::new();
        for task in &tasks {
            if guard.by_id.contains_key(&task.task_id) || !incoming.insert(task.task_id.as_str()) {
                return Err(QueueError::DuplicateTask(task.task_id.clone()));
            }
        }

        for task in tasks {
            guard.order.push(task.task_id.clone());
            guard.by_id.insert(task.task_id.clone(), task);
        }
        Ok(())
    }

    /// pending -> processing; hands back the request to run
    pub fn begin(&self, task_id: &str) -> Option<GenerationRequest> {
        let mut guard = self.write();
        let task = guard.by_id.get_mut(task_id)?;
        if task.begin() {
            Some(task.request.clone())
        } else {
            None
        }
    }

    /// processing -> completed/failed; `Some(success)` if the transition happened
    pub fn finish(&self, task_id: &str, result: GenerationResult) -> Option<bool> {
        let mut guard = self.write();
        let Some(task) = guard.by_id.get_mut(task_id) else {
            warn!(%task_id, "Finished task is no longer registered");
            return None;
        };
        let success = result.success;
        task.finish(result).then_some(success)
    }

    pub fn get(&self, task_id: &str) -> Option<GenerationTask> {
        self.read().by_id.get(task_id).cloned()
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.read().by_id.get(task_id).map(|t| t.status)
    }

    /// Ids of tasks currently in `status`
    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<String> {
        let guard = self.read();
        guard
            .order
            .iter()
            .filter(|id| guard.by_id.get(*id).map(|t| t.status == status).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let guard = self.read();
        let mut counts = StatusCounts {
            total: guard.by_id.len(),
            ..Default::default()
        };
        for task in guard.by_id.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// True when nothing is pending or processing
    pub fn all_terminal(&self) -> bool {
        self.read().by_id.values().all(|t| t.status.is_terminal())
    }

    /// Downstream records for terminal tasks, in insertion order
    pub fn outcomes(&self) -> Vec<PanelOutcome> {
        let guard = self.read();
        guard
            .order
            .iter()
            .filter_map(|id| guard.by_id.get(id))
            .filter(|t| t.status.is_terminal())
            .map(|t| t.outcome())
            .collect()
    }

    /// Drop terminal tasks; returns how many were removed
    pub fn clear_completed(&self) -> usize {
        let mut guard = self.write();
        let before = guard.by_id.len();
        guard.by_id.retain(|_, t| !t.status.is_terminal());
        let Tasks { by_id, order } = &mut *guard;
        order.retain(|id| by_id.contains_key(id));
        let removed = before - by_id.len();
        debug!(removed, "TaskRegistry::clear_completed: called");
        removed
    }
}
