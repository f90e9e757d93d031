use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info};
use uuid::Uuid;

use super::types::{Page, TaskState, TaskStatus};
use crate::error_handling::types::ManagementError;

/// Completed tasks kept by [`TaskRegistry::new`].
pub const DEFAULT_MAX_FINISHED_TASKS: usize = 1000;

/// Registry of server tasks and their statuses.
///
/// Tasks are listed newest first. Once more than `max_finished` tasks have completed, the ones
/// that completed earliest are forgotten; queued and running tasks are always kept.
pub struct TaskRegistry {
    table: Mutex<TaskTable>,
    max_finished: usize,
}

#[derive(Default)]
struct TaskTable {
    tasks: HashMap<Uuid, TaskStatus>,
    /// Completed task ids, oldest first.
    completed: VecDeque<Uuid>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MAX_FINISHED_TASKS)
    }

    pub fn with_retention(max_finished: usize) -> Self {
        Self {
            table: Mutex::new(TaskTable::default()),
            max_finished: max_finished.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a task that starts running immediately.
    pub fn start(&self, task_type: &str, task_name: &str, catalog: Option<&str>) -> TaskStatus {
        let now = Utc::now();
        let status = TaskStatus {
            task_id: Uuid::new_v4(),
            task_type: task_type.to_string(),
            task_name: task_name.to_string(),
            catalog: catalog.map(str::to_string),
            created: now,
            started: Some(now),
            finished: None,
            state: TaskState::Running,
            progress: 0,
            result_file: None,
            error: None,
        };
        self.lock().tasks.insert(status.task_id, status.clone());
        info!("[{}] task `{}` started", status.task_id, task_name);
        status
    }

    fn complete(
        &self,
        task_id: Uuid,
        state: TaskState,
        result_file: Option<Uuid>,
        error: Option<String>,
    ) -> Result<TaskStatus, ManagementError> {
        let mut table = self.lock();
        let task = table
            .tasks
            .get_mut(&task_id)
            .ok_or(ManagementError::TaskNotFound(task_id))?;
        if task.state.is_terminal() {
            return Err(ManagementError::TaskNotCancellable(task_id));
        }
        task.state = state;
        task.finished = Some(Utc::now());
        task.result_file = result_file;
        task.error = error;
        if state == TaskState::Finished {
            task.progress = 100;
        }
        debug!("[{}] task moved to {:?}", task_id, state);
        let status = task.clone();

        table.completed.push_back(task_id);
        while table.completed.len() > self.max_finished {
            if let Some(oldest) = table.completed.pop_front() {
                table.tasks.remove(&oldest);
                debug!("[{}] completed task forgotten", oldest);
            }
        }
        Ok(status)
    }

    pub fn finish(
        &self,
        task_id: Uuid,
        result_file: Option<Uuid>,
    ) -> Result<TaskStatus, ManagementError> {
        self.complete(task_id, TaskState::Finished, result_file, None)
    }

    pub fn fail(&self, task_id: Uuid, error: &str) -> Result<TaskStatus, ManagementError> {
        self.complete(task_id, TaskState::Failed, None, Some(error.to_string()))
    }

    /// Marks a queued or running task cancelled.
    pub fn cancel(&self, task_id: Uuid) -> Result<TaskStatus, ManagementError> {
        let status = self.complete(task_id, TaskState::Cancelled, None, None)?;
        info!("[{}] task cancelled", task_id);
        Ok(status)
    }

    pub fn get(&self, task_id: Uuid) -> Result<TaskStatus, ManagementError> {
        self.lock()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(ManagementError::TaskNotFound(task_id))
    }

    /// Lists tasks newest first, optionally restricted to some states.
    pub fn list(
        &self,
        page: usize,
        page_size: usize,
        states: &[TaskState],
    ) -> Result<Page<TaskStatus>, ManagementError> {
        let mut all: Vec<TaskStatus> = self
            .lock()
            .tasks
            .values()
            .filter(|t| states.is_empty() || states.contains(&t.state))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created.cmp(&a.created));
        Page::of(&all, page, page_size)
    }
}
