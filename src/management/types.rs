use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_handling::types::ManagementError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Status of a long-running server task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: Uuid,
    pub task_type: String,
    pub task_name: String,
    pub catalog: Option<String>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub state: TaskState,
    /// Percentage, 0-100.
    pub progress: u8,
    pub result_file: Option<Uuid>,
    pub error: Option<String>,
}

/// A server-side file clients may download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileToFetch {
    pub file_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Subsystem that produced the file.
    pub origin: String,
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) path: PathBuf,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

impl<T: Clone> Page<T> {
    /// Cuts one page out of an already ordered listing.
    pub fn of(all: &[T], page: usize, page_size: usize) -> Result<Self, ManagementError> {
        if page == 0 || page_size == 0 {
            return Err(ManagementError::InvalidPage { page, page_size });
        }
        let items = all
            .iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();
        Ok(Self {
            items,
            page,
            page_size,
            total: all.len(),
        })
    }
}
