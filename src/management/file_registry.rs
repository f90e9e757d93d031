use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use futures::{stream, Stream};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::{FileToFetch, Page};
use crate::error_handling::types::{ManagementError, StorageError};

/// Default chunk size of `FetchFile`.
pub const FETCH_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks read ahead of a slow download.
const STREAM_READ_AHEAD: usize = 4;

/// Registry of files produced by server tasks and available for download.
#[derive(Default)]
pub struct FileRegistry {
    files: Mutex<HashMap<Uuid, FileToFetch>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, FileToFetch>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes an existing file downloadable.
    pub fn register(
        &self,
        path: &Path,
        origin: &str,
        description: Option<String>,
    ) -> Result<FileToFetch, StorageError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| StorageError::ReadFailed(format!("{}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = FileToFetch {
            file_id: Uuid::new_v4(),
            name,
            description,
            origin: origin.to_string(),
            size_bytes: metadata.len(),
            created: Utc::now(),
            path: path.to_path_buf(),
        };
        self.lock().insert(file.file_id, file.clone());
        info!(
            "[{}] file `{}` registered ({} bytes)",
            file.file_id, file.name, file.size_bytes
        );
        Ok(file)
    }

    pub fn get(&self, file_id: Uuid) -> Result<FileToFetch, ManagementError> {
        self.lock()
            .get(&file_id)
            .cloned()
            .ok_or(ManagementError::FileNotFound(file_id))
    }

    /// Lists files newest first, optionally restricted to one origin.
    pub fn list(
        &self,
        page: usize,
        page_size: usize,
        origin: Option<&str>,
    ) -> Result<Page<FileToFetch>, ManagementError> {
        let mut all: Vec<FileToFetch> = self
            .lock()
            .values()
            .filter(|f| origin.map_or(true, |o| f.origin == o))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created.cmp(&a.created));
        Page::of(&all, page, page_size)
    }

    /// Opens a registered file for chunked reading.
    pub fn open(&self, file_id: Uuid, chunk_size: usize) -> Result<FileChunks, ManagementError> {
        let file = self.get(file_id)?;
        let handle = File::open(&file.path).map_err(|e| {
            StorageError::ReadFailed(format!("{}: {}", file.path.display(), e))
        })?;
        Ok(FileChunks {
            file: Some(handle),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Reads a whole registered file.
    #[cfg(test)]
    pub(crate) fn fetch(&self, file_id: Uuid) -> Result<Vec<u8>, ManagementError> {
        let mut content = Vec::new();
        for chunk in self.open(file_id, FETCH_CHUNK_SIZE)? {
            content.extend_from_slice(&chunk?);
        }
        Ok(content)
    }

    /// Unregisters a file and removes it from disk.
    pub fn delete(&self, file_id: Uuid) -> Result<(), ManagementError> {
        let file = self
            .lock()
            .remove(&file_id)
            .ok_or(ManagementError::FileNotFound(file_id))?;
        if let Err(e) = std::fs::remove_file(&file.path) {
            warn!("[{}] unable to remove `{}`: {}", file_id, file.path.display(), e);
        }
        info!("[{}] file `{}` deleted", file_id, file.name);
        Ok(())
    }
}

/// Sequential chunks of a file. Reading stops at the first error.
pub struct FileChunks {
    file: Option<File>,
    chunk_size: usize,
}

impl FileChunks {
    /// Reads the chunks on the blocking pool and yields them as a stream.
    ///
    /// Dropping the stream stops the reader and closes the file. Must be called within a tokio
    /// runtime.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>, StorageError>> + Send + Sync {
        let (tx, mut rx) = mpsc::channel(STREAM_READ_AHEAD);
        tokio::task::spawn_blocking(move || {
            for chunk in self {
                if tx.blocking_send(chunk).is_err() {
                    debug!("File download abandoned, closing the file");
                    break;
                }
            }
        });
        stream::poll_fn(move |cx| rx.poll_recv(cx))
    }
}

impl Iterator for FileChunks {
    type Item = Result<Vec<u8>, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let file = self.file.as_mut()?;
        let mut buf = vec![0u8; self.chunk_size];
        match file.read(&mut buf) {
            Ok(0) => {
                self.file = None;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf))
            }
            Err(e) => {
                self.file = None;
                Some(Err(StorageError::ReadFailed(e.to_string())))
            }
        }
    }
}
