//! Traffic recording for a whole server instance.
//!
//! This module provides `TrafficRecorder`, which keeps a bounded, queryable history of session
//! activity while a recording is running. Each recording is registered as a server task; when
//! asked to, it also exports every captured record to a JSON-lines file that becomes
//! downloadable once the recording stops.
//!
//! Highlights
//! - Per-session sampling decided deterministically from the session id
//! - Label allowlist applied before records are stored and indexed
//! - Automatic stop on duration or export size limits
//! - History retrieval in both directions, eagerly or through a lazy cursor
//! - Label name/value rankings kept in step with record eviction

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use tokio::time::Instant;
use uuid::Uuid;

use super::export::JsonLinesExport;
use super::label_index::LabelIndex;
use super::types::{
    CardinalityEntry, HistoryFilter, HistoryOrder, RecordingCriteria, RecordingSettings,
    RecordingStatus, StopReason, TrafficEvent, TrafficRecord, TrafficRecordKind,
};
use crate::error_handling::types::RecordingError;
use crate::management::{FileRegistry, TaskRegistry};

/// Task type and file origin used for traffic recordings.
pub const TRAFFIC_RECORDING_TASK: &str = "TrafficRecording";

struct ActiveRecording {
    task_id: Uuid,
    criteria: RecordingCriteria,
    settings: RecordingSettings,
    started_at: DateTime<Utc>,
    started: Instant,
    captured: u64,
    export: Option<JsonLinesExport>,
}

impl ActiveRecording {
    fn status(&self) -> RecordingStatus {
        RecordingStatus {
            task_id: self.task_id,
            active: true,
            started_at: self.started_at,
            finished_at: None,
            criteria: self.criteria.clone(),
            settings: self.settings.clone(),
            records_captured: self.captured,
            bytes_written: self.export.as_ref().map_or(0, |e| e.bytes_written()),
            stop_reason: None,
            export_file: None,
        }
    }

    fn duration_exceeded(&self, now: Instant) -> bool {
        self.settings
            .max_duration_ms
            .map_or(false, |ms| now.saturating_duration_since(self.started) >= Duration::from_millis(ms))
    }
}

#[derive(Default)]
struct RecorderState {
    active: Option<ActiveRecording>,
    last: Option<RecordingStatus>,
    records: VecDeque<TrafficRecord>,
    labels: LabelIndex,
    next_record_id: u64,
    session_sequences: HashMap<Uuid, u64>,
}

/// Captures session traffic while a recording is running.
///
/// Logging
/// - INFO for recording start/stop
/// - TRACE for every stored record
pub struct TrafficRecorder {
    state: Mutex<RecorderState>,
    tasks: Arc<TaskRegistry>,
    files: Arc<FileRegistry>,
    export_directory: PathBuf,
    max_records: usize,
    retention: Option<chrono::Duration>,
}

impl TrafficRecorder {
    pub fn new(
        tasks: Arc<TaskRegistry>,
        files: Arc<FileRegistry>,
        export_directory: PathBuf,
        max_records: usize,
        retention: Option<Duration>,
    ) -> Self {
        Self {
            state: Mutex::new(RecorderState::default()),
            tasks,
            files,
            export_directory,
            max_records: max_records.max(1),
            retention: retention.and_then(|d| chrono::Duration::from_std(d).ok()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts a recording and registers it as a server task.
    pub fn start(
        &self,
        criteria: RecordingCriteria,
        settings: RecordingSettings,
    ) -> Result<RecordingStatus, RecordingError> {
        if !(1..=100).contains(&criteria.sampling_rate) {
            return Err(RecordingError::InvalidSamplingRate(criteria.sampling_rate));
        }
        let mut state = self.lock();
        if let Some(ref active) = state.active {
            return Err(RecordingError::RecordingAlreadyActive(active.task_id));
        }

        let task = self
            .tasks
            .start(TRAFFIC_RECORDING_TASK, "Traffic recording", None);
        let export = if settings.export_file {
            match JsonLinesExport::create(&self.export_directory, task.task_id) {
                Ok(export) => Some(export),
                Err(e) => {
                    error!("[{}] unable to create traffic export: {}", task.task_id, e);
                    let _ = self.tasks.fail(task.task_id, &e.to_string());
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let active = ActiveRecording {
            task_id: task.task_id,
            criteria,
            settings,
            started_at: Utc::now(),
            started: Instant::now(),
            captured: 0,
            export,
        };
        let status = active.status();
        info!(
            "[{}] traffic recording started (sampling {}%, export {})",
            status.task_id, status.criteria.sampling_rate, status.settings.export_file
        );
        state.active = Some(active);
        Ok(status)
    }

    /// Stops the running recording. Stopping an already stopped recording returns its final
    /// status again.
    pub fn stop(&self, task_id: Option<Uuid>) -> Result<RecordingStatus, RecordingError> {
        let mut state = self.lock();
        match (state.active.as_ref().map(|a| a.task_id), task_id) {
            (Some(expected), Some(given)) if expected != given => {
                Err(RecordingError::TaskMismatch { expected, given })
            }
            (Some(_), _) => self.finish(&mut state, StopReason::Requested),
            (None, given) => match state.last {
                Some(ref last) if given.map_or(true, |id| id == last.task_id) => Ok(last.clone()),
                _ => Err(RecordingError::RecordingNotActive),
            },
        }
    }

    /// Aborts the running recording and discards its export.
    pub fn cancel(&self, task_id: Uuid) -> Result<RecordingStatus, RecordingError> {
        let mut state = self.lock();
        match state.active.as_ref().map(|a| a.task_id) {
            Some(expected) if expected == task_id => self.finish(&mut state, StopReason::Cancelled),
            Some(expected) => Err(RecordingError::TaskMismatch {
                expected,
                given: task_id,
            }),
            None => Err(RecordingError::RecordingNotActive),
        }
    }

    /// Stops the recording once its duration limit passed; called by the periodic sweep.
    pub fn check_limits(&self, now: Instant) -> Option<RecordingStatus> {
        let mut state = self.lock();
        if state.active.as_ref()?.duration_exceeded(now) {
            return self.finish(&mut state, StopReason::DurationLimit).ok();
        }
        None
    }

    /// Stops the recording on server shutdown, keeping its export.
    pub fn shutdown(&self) -> Option<RecordingStatus> {
        let mut state = self.lock();
        state.active.as_ref()?;
        self.finish(&mut state, StopReason::Shutdown).ok()
    }

    fn finish(
        &self,
        state: &mut RecorderState,
        reason: StopReason,
    ) -> Result<RecordingStatus, RecordingError> {
        let active = state.active.take().ok_or(RecordingError::RecordingNotActive)?;
        state.session_sequences.clear();
        let task_id = active.task_id;
        let mut status = active.status();
        status.active = false;
        status.finished_at = Some(Utc::now());
        status.stop_reason = Some(reason);

        let exported = match (reason, active.export) {
            (_, None) => Ok(None),
            (StopReason::Cancelled, Some(export)) => {
                export.discard();
                Ok(None)
            }
            (_, Some(export)) => export.finish().and_then(|path| {
                self.files
                    .register(
                        &path,
                        TRAFFIC_RECORDING_TASK,
                        Some(format!("Traffic recording of task {}", task_id)),
                    )
                    .map(Some)
            }),
        };

        let task_update = match &exported {
            Ok(file) => {
                status.export_file = file.clone();
                match reason {
                    StopReason::Cancelled => self.tasks.cancel(task_id),
                    _ => self
                        .tasks
                        .finish(task_id, status.export_file.as_ref().map(|f| f.file_id)),
                }
            }
            Err(e) => self.tasks.fail(task_id, &e.to_string()),
        };
        if let Err(e) = task_update {
            warn!("[{}] unable to update recording task: {}", task_id, e);
        }

        info!(
            "[{}] traffic recording stopped ({:?}), {} record(s) captured",
            task_id, reason, status.records_captured
        );
        state.last = Some(status.clone());
        exported?;
        Ok(status)
    }

    /// Stores an event when a recording is running and the event passes its criteria.
    ///
    /// Returns the id of the stored record.
    pub fn record(&self, event: TrafficEvent) -> Option<u64> {
        let mut guard = self.lock();
        if guard.active.as_ref()?.duration_exceeded(Instant::now()) {
            let _ = self.finish(&mut guard, StopReason::DurationLimit);
            return None;
        }

        let state = &mut *guard;
        let active = state.active.as_mut()?;
        let closing = event.kind == TrafficRecordKind::SessionClose;
        let admitted = (active.criteria.kinds.is_empty()
            || active.criteria.kinds.contains(&event.kind))
            && sampled(event.session_id, active.criteria.sampling_rate);
        if !admitted {
            if closing {
                state.session_sequences.remove(&event.session_id);
            }
            return None;
        }

        let allowlist = &active.criteria.label_allowlist;
        let labels = event
            .labels
            .into_iter()
            .filter(|l| allowlist.is_empty() || allowlist.contains(&l.name))
            .collect();

        state.next_record_id += 1;
        let session_sequence = {
            let counter = state.session_sequences.entry(event.session_id).or_insert(0);
            *counter += 1;
            *counter
        };
        if closing {
            state.session_sequences.remove(&event.session_id);
        }

        let record = TrafficRecord {
            record_id: state.next_record_id,
            session_id: event.session_id,
            session_sequence,
            kind: event.kind,
            catalog: event.catalog,
            created: Utc::now(),
            duration_ms: event.duration_ms,
            payload_bytes: event.payload_bytes,
            labels,
            summary: event.summary,
        };

        let mut stop_reason = None;
        if let Some(export) = active.export.as_mut() {
            match export.append(&record) {
                Ok(written) => {
                    if active
                        .settings
                        .max_file_size_bytes
                        .map_or(false, |max| written >= max)
                    {
                        stop_reason = Some(StopReason::FileSizeLimit);
                    }
                }
                Err(e) => {
                    error!("[{}] traffic export failed: {}", active.task_id, e);
                    stop_reason = Some(StopReason::ExportFailed);
                }
            }
        }
        active.captured += 1;

        trace!(
            "Recorded #{} {:?} of session {} ({} bytes)",
            record.record_id,
            record.kind,
            record.session_id,
            record.payload_bytes
        );
        for label in &record.labels {
            state.labels.add(label);
        }
        let record_id = record.record_id;
        state.records.push_back(record);
        self.evict(state);

        if let Some(reason) = stop_reason {
            debug!("Stopping traffic recording automatically: {:?}", reason);
            let _ = self.finish(state, reason);
        }
        Some(record_id)
    }

    fn evict(&self, state: &mut RecorderState) {
        let cutoff = self.retention.map(|r| Utc::now() - r);
        while let Some(front) = state.records.front() {
            let expired = cutoff.map_or(false, |c| front.created < c);
            if !expired && state.records.len() <= self.max_records {
                break;
            }
            if let Some(evicted) = state.records.pop_front() {
                for label in &evicted.labels {
                    state.labels.remove(label);
                }
            }
        }
    }

    fn next_matching(
        &self,
        filter: &HistoryFilter,
        order: HistoryOrder,
        after: Option<u64>,
    ) -> Option<TrafficRecord> {
        let mut state = self.lock();
        self.evict(&mut state);
        let records = &state.records;
        match order {
            HistoryOrder::Chronological => {
                let start = after.map_or(0, |id| records.partition_point(|r| r.record_id <= id));
                records
                    .range(start..)
                    .find(|r| filter.matches(r, order))
                    .cloned()
            }
            HistoryOrder::ReverseChronological => {
                let end = after.map_or(records.len(), |id| {
                    records.partition_point(|r| r.record_id < id)
                });
                records
                    .range(..end)
                    .rev()
                    .find(|r| filter.matches(r, order))
                    .cloned()
            }
        }
    }

    /// Returns up to `limit` matching records.
    pub fn query_history(
        &self,
        filter: &HistoryFilter,
        order: HistoryOrder,
        limit: usize,
    ) -> Vec<TrafficRecord> {
        let mut found = Vec::new();
        let mut position = None;
        while found.len() < limit {
            match self.next_matching(filter, order, position) {
                Some(record) => {
                    position = Some(record.record_id);
                    found.push(record);
                }
                None => break,
            }
        }
        found
    }

    /// Returns a lazy cursor over up to `limit` matching records.
    pub fn history_cursor(
        self: &Arc<Self>,
        filter: HistoryFilter,
        order: HistoryOrder,
        limit: usize,
    ) -> HistoryCursor {
        HistoryCursor {
            recorder: Arc::clone(self),
            filter,
            order,
            remaining: limit,
            position: None,
        }
    }

    pub fn label_names_by_cardinality(
        &self,
        prefix: Option<&str>,
        top_n: usize,
    ) -> Vec<CardinalityEntry> {
        let mut state = self.lock();
        self.evict(&mut state);
        state.labels.top_names(prefix, top_n)
    }

    pub fn label_values_by_cardinality(
        &self,
        name: &str,
        prefix: Option<&str>,
        top_n: usize,
    ) -> Vec<CardinalityEntry> {
        let mut state = self.lock();
        self.evict(&mut state);
        state.labels.top_values(name, prefix, top_n)
    }

    pub fn is_recording(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn active_task(&self) -> Option<Uuid> {
        self.lock().active.as_ref().map(|a| a.task_id)
    }

    /// Status of the running recording, or of the last one.
    pub fn status(&self) -> Option<RecordingStatus> {
        let state = self.lock();
        state
            .active
            .as_ref()
            .map(ActiveRecording::status)
            .or_else(|| state.last.clone())
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.lock().session_sequences.len()
    }
}

/// Whether a session falls into the sampled percentage.
fn sampled(session_id: Uuid, rate: u8) -> bool {
    rate >= 100 || session_id.as_u128() % 100 < u128::from(rate)
}

/// Lazy, finite walk over the recorded history.
///
/// Each step resumes after the last returned record id, so records evicted in the meantime are
/// skipped without failing the walk. Dropping the cursor releases it; reissuing the query
/// restarts from the beginning.
pub struct HistoryCursor {
    recorder: Arc<TrafficRecorder>,
    filter: HistoryFilter,
    order: HistoryOrder,
    remaining: usize,
    position: Option<u64>,
}

impl Iterator for HistoryCursor {
    type Item = TrafficRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self
            .recorder
            .next_matching(&self.filter, self.order, self.position)
        {
            Some(record) => {
                self.remaining -= 1;
                self.position = Some(record.record_id);
                Some(record)
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::TaskState;
    use crate::traffic_recording::types::Label;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        tasks: Arc<TaskRegistry>,
        files: Arc<FileRegistry>,
        recorder: Arc<TrafficRecorder>,
    }

    fn fixture(max_records: usize) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempdir().unwrap();
        let tasks = Arc::new(TaskRegistry::new());
        let files = Arc::new(FileRegistry::new());
        let recorder = Arc::new(TrafficRecorder::new(
            Arc::clone(&tasks),
            Arc::clone(&files),
            dir.path().join("exports"),
            max_records,
            None,
        ));
        Fixture {
            _dir: dir,
            tasks,
            files,
            recorder,
        }
    }

    fn event(session: Uuid, kind: TrafficRecordKind, labels: &[(&str, &str)]) -> TrafficEvent {
        let mut e = TrafficEvent::new(session, kind, "products");
        e.labels = labels.iter().map(|(n, v)| Label::new(n, v)).collect();
        e
    }

    #[test]
    fn nothing_is_recorded_while_stopped() {
        let f = fixture(100);
        assert_eq!(
            f.recorder
                .record(event(Uuid::new_v4(), TrafficRecordKind::Query, &[])),
            None
        );
        assert_eq!(f.recorder.record_count(), 0);
        assert_eq!(
            f.recorder.stop(None).unwrap_err(),
            RecordingError::RecordingNotActive
        );
    }

    #[test]
    fn start_validates_and_rejects_second_recording() {
        let f = fixture(100);
        for rate in [0u8, 101] {
            let criteria = RecordingCriteria {
                sampling_rate: rate,
                ..Default::default()
            };
            assert_eq!(
                f.recorder
                    .start(criteria, RecordingSettings::default())
                    .unwrap_err(),
                RecordingError::InvalidSamplingRate(rate)
            );
        }
        let status = f
            .recorder
            .start(RecordingCriteria::default(), RecordingSettings::default())
            .unwrap();
        assert_eq!(
            f.recorder
                .start(RecordingCriteria::default(), RecordingSettings::default())
                .unwrap_err(),
            RecordingError::RecordingAlreadyActive(status.task_id)
        );
        assert_eq!(
            f.tasks.get(status.task_id).unwrap().state,
            TaskState::Running
        );
    }

    #[test]
    fn allowlisted_label_values_are_ranked() {
        let f = fixture(100);
        f.recorder
            .start(
                RecordingCriteria {
                    label_allowlist: vec!["clientId".into()],
                    ..Default::default()
                },
                RecordingSettings::default(),
            )
            .unwrap();
        let session = Uuid::new_v4();
        for client in ["X", "Y", "X", "Y", "X"] {
            f.recorder.record(event(
                session,
                TrafficRecordKind::Query,
                &[("clientId", client), ("secret", "s")],
            ));
        }

        let values = f.recorder.label_values_by_cardinality("clientId", None, 2);
        assert_eq!(
            values,
            vec![
                CardinalityEntry {
                    value: "X".into(),
                    count: 3
                },
                CardinalityEntry {
                    value: "Y".into(),
                    count: 2
                },
            ]
        );
        let names = f.recorder.label_names_by_cardinality(None, 10);
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].value, "clientId");
    }

    #[test]
    fn history_in_both_orders_with_session_sequence() {
        let f = fixture(100);
        f.recorder
            .start(RecordingCriteria::default(), RecordingSettings::default())
            .unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        f.recorder.record(event(a, TrafficRecordKind::SessionStart, &[]));
        f.recorder.record(event(b, TrafficRecordKind::SessionStart, &[]));
        f.recorder.record(event(a, TrafficRecordKind::Mutation, &[]));
        f.recorder.record(event(a, TrafficRecordKind::SessionClose, &[]));

        let forward = f
            .recorder
            .query_history(&HistoryFilter::default(), HistoryOrder::Chronological, 10);
        let ids: Vec<u64> = forward.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let filter = HistoryFilter {
            session_ids: vec![a],
            ..Default::default()
        };
        let reversed =
            f.recorder
                .query_history(&filter, HistoryOrder::ReverseChronological, 2);
        let seqs: Vec<(u64, u64)> = reversed
            .iter()
            .map(|r| (r.record_id, r.session_sequence))
            .collect();
        assert_eq!(seqs, vec![(4, 3), (3, 2)]);
    }

    #[test]
    fn session_sequences_are_released_on_close_and_stop() {
        let f = fixture(10);
        f.recorder
            .start(
                RecordingCriteria {
                    kinds: [TrafficRecordKind::SessionStart].into_iter().collect(),
                    ..Default::default()
                },
                RecordingSettings::default(),
            )
            .unwrap();
        for _ in 0..1000 {
            let s = Uuid::new_v4();
            f.recorder.record(event(s, TrafficRecordKind::SessionStart, &[]));
            f.recorder.record(event(s, TrafficRecordKind::SessionClose, &[]));
        }
        assert_eq!(f.recorder.record_count(), 10);
        assert_eq!(f.recorder.tracked_sessions(), 0);

        // sessions still open when the recording stops
        for _ in 0..5 {
            f.recorder
                .record(event(Uuid::new_v4(), TrafficRecordKind::SessionStart, &[]));
        }
        assert_eq!(f.recorder.tracked_sessions(), 5);
        f.recorder.stop(None).unwrap();
        assert_eq!(f.recorder.tracked_sessions(), 0);
    }

    #[test]
    fn cursor_survives_eviction() {
        let f = fixture(3);
        f.recorder
            .start(RecordingCriteria::default(), RecordingSettings::default())
            .unwrap();
        let s = Uuid::new_v4();
        for _ in 0..3 {
            f.recorder.record(event(s, TrafficRecordKind::Fetch, &[]));
        }

        let mut cursor = f.recorder.history_cursor(
            HistoryFilter::default(),
            HistoryOrder::Chronological,
            10,
        );
        assert_eq!(cursor.next().unwrap().record_id, 1);

        // evicts records 1 and 2
        for _ in 0..2 {
            f.recorder.record(event(s, TrafficRecordKind::Fetch, &[]));
        }
        let rest: Vec<u64> = cursor.map(|r| r.record_id).collect();
        assert_eq!(rest, vec![3, 4, 5]);
    }

    #[test]
    fn eviction_decrements_label_counts() {
        let f = fixture(2);
        f.recorder
            .start(RecordingCriteria::default(), RecordingSettings::default())
            .unwrap();
        let s = Uuid::new_v4();
        f.recorder.record(event(s, TrafficRecordKind::Query, &[("clientId", "X")]));
        f.recorder.record(event(s, TrafficRecordKind::Query, &[("clientId", "Y")]));
        f.recorder.record(event(s, TrafficRecordKind::Query, &[("clientId", "Y")]));

        let values = f.recorder.label_values_by_cardinality("clientId", None, 5);
        assert_eq!(
            values,
            vec![CardinalityEntry {
                value: "Y".into(),
                count: 2
            }]
        );
    }

    #[test]
    fn kinds_and_sampling_limit_capture() {
        let f = fixture(100);
        f.recorder
            .start(
                RecordingCriteria {
                    sampling_rate: 1,
                    kinds: [TrafficRecordKind::Query].into_iter().collect(),
                    ..Default::default()
                },
                RecordingSettings::default(),
            )
            .unwrap();
        let sampled_session = Uuid::from_u128(300);
        let skipped_session = Uuid::from_u128(350);

        assert!(f
            .recorder
            .record(event(sampled_session, TrafficRecordKind::Query, &[]))
            .is_some());
        assert!(f
            .recorder
            .record(event(sampled_session, TrafficRecordKind::Fetch, &[]))
            .is_none());
        assert!(f
            .recorder
            .record(event(skipped_session, TrafficRecordKind::Query, &[]))
            .is_none());
    }

    #[test]
    fn stop_exports_file_and_is_idempotent() {
        let f = fixture(100);
        let started = f
            .recorder
            .start(
                RecordingCriteria::default(),
                RecordingSettings {
                    export_file: true,
                    ..Default::default()
                },
            )
            .unwrap();
        f.recorder
            .record(event(Uuid::new_v4(), TrafficRecordKind::Query, &[]));

        assert!(matches!(
            f.recorder.stop(Some(Uuid::new_v4())),
            Err(RecordingError::TaskMismatch { .. })
        ));
        let stopped = f.recorder.stop(Some(started.task_id)).unwrap();
        assert_eq!(stopped.stop_reason, Some(StopReason::Requested));
        let file = stopped.export_file.clone().unwrap();
        assert!(file.size_bytes > 0);

        let task = f.tasks.get(started.task_id).unwrap();
        assert_eq!(task.state, TaskState::Finished);
        assert_eq!(task.result_file, Some(file.file_id));
        assert!(!f.files.fetch(file.file_id).unwrap().is_empty());

        assert_eq!(f.recorder.stop(None).unwrap(), stopped);
        // stored history outlives the recording
        assert_eq!(f.recorder.record_count(), 1);
    }

    #[test]
    fn cancel_discards_export() {
        let f = fixture(100);
        let started = f
            .recorder
            .start(
                RecordingCriteria::default(),
                RecordingSettings {
                    export_file: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let cancelled = f.recorder.cancel(started.task_id).unwrap();
        assert_eq!(cancelled.export_file, None);
        assert_eq!(
            f.tasks.get(started.task_id).unwrap().state,
            TaskState::Cancelled
        );
        assert_eq!(f.files.list(1, 10, None).unwrap().total, 0);
    }

    #[test]
    fn file_size_limit_stops_recording() {
        let f = fixture(100);
        f.recorder
            .start(
                RecordingCriteria::default(),
                RecordingSettings {
                    export_file: true,
                    max_file_size_bytes: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(f
            .recorder
            .record(event(Uuid::new_v4(), TrafficRecordKind::Query, &[]))
            .is_some());
        assert!(!f.recorder.is_recording());
        let status = f.recorder.status().unwrap();
        assert_eq!(status.stop_reason, Some(StopReason::FileSizeLimit));
        assert!(status.export_file.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn duration_limit_stops_recording() {
        let f = fixture(100);
        f.recorder
            .start(
                RecordingCriteria::default(),
                RecordingSettings {
                    max_duration_ms: Some(1_000),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(f.recorder.check_limits(Instant::now()).is_none());
        tokio::time::advance(Duration::from_millis(1_500)).await;
        let status = f.recorder.check_limits(Instant::now()).unwrap();
        assert_eq!(status.stop_reason, Some(StopReason::DurationLimit));
        assert!(f
            .recorder
            .record(event(Uuid::new_v4(), TrafficRecordKind::Query, &[]))
            .is_none());
    }
}
