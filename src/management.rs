//! Server tasks and downloadable files.

pub mod file_registry;
pub mod task_registry;
pub mod types;

pub use file_registry::{FileChunks, FileRegistry, FETCH_CHUNK_SIZE};
pub use task_registry::TaskRegistry;
pub use types::{FileToFetch, Page, TaskState, TaskStatus};
