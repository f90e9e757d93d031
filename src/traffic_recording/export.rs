use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use uuid::Uuid;

use super::types::TrafficRecord;
use crate::error_handling::types::StorageError;

/// JSON-lines file a recording writes its records to.
pub struct JsonLinesExport {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl JsonLinesExport {
    pub fn create(directory: &Path, task_id: Uuid) -> Result<Self, StorageError> {
        std::fs::create_dir_all(directory)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", directory.display(), e)))?;
        let path = directory.join(format!("traffic-recording-{}.jsonl", task_id));
        let file = File::create(&path)
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", path.display(), e)))?;
        debug!("Exporting traffic records to `{}`", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    /// Appends one record and returns the total number of bytes written so far.
    pub fn append(&mut self, record: &TrafficRecord) -> Result<u64, StorageError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        self.bytes_written += line.len() as u64;
        Ok(self.bytes_written)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes and closes the file, returning its path.
    pub fn finish(mut self) -> Result<PathBuf, StorageError> {
        self.writer
            .flush()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(self.path)
    }

    /// Closes and removes the file.
    pub fn discard(self) {
        let path = self.path.clone();
        drop(self.writer);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Unable to remove discarded export `{}`: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic_recording::types::{Label, TrafficRecordKind};
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(id: u64) -> TrafficRecord {
        TrafficRecord {
            record_id: id,
            session_id: Uuid::new_v4(),
            session_sequence: 1,
            kind: TrafficRecordKind::Query,
            catalog: "products".into(),
            created: Utc::now(),
            duration_ms: 3,
            payload_bytes: 12,
            labels: vec![Label::new("clientId", "X")],
            summary: Some("query".into()),
        }
    }

    #[test]
    fn writes_one_line_per_record() {
        let dir = tempdir().unwrap();
        let mut export = JsonLinesExport::create(dir.path(), Uuid::new_v4()).unwrap();
        export.append(&record(1)).unwrap();
        let total = export.append(&record(2)).unwrap();
        assert_eq!(total, export.bytes_written());

        let path = export.finish().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<TrafficRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].record_id, 2);
        assert_eq!(content.len() as u64, total);
    }

    #[test]
    fn discard_removes_the_file() {
        let dir = tempdir().unwrap();
        let mut export = JsonLinesExport::create(dir.path(), Uuid::new_v4()).unwrap();
        export.append(&record(1)).unwrap();
        export.discard();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
