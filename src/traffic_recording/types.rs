//! Common data types used across the traffic_recording subsystem.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change_capture::types::WireValue;
use crate::management::FileToFetch;

/// Kind of session activity a traffic record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireValue", into = "WireValue")]
pub enum TrafficRecordKind {
    SessionStart,
    SessionClose,
    Query,
    Fetch,
    Enrichment,
    Mutation,
    TransactionOpen,
    TransactionClose,
    ChangeCaptureRegistration,
    Unknown(i32),
}

impl TrafficRecordKind {
    const NAMES: [(&'static str, TrafficRecordKind); 9] = [
        ("SESSION_START", TrafficRecordKind::SessionStart),
        ("SESSION_CLOSE", TrafficRecordKind::SessionClose),
        ("QUERY", TrafficRecordKind::Query),
        ("FETCH", TrafficRecordKind::Fetch),
        ("ENRICHMENT", TrafficRecordKind::Enrichment),
        ("MUTATION", TrafficRecordKind::Mutation),
        ("TRANSACTION_OPEN", TrafficRecordKind::TransactionOpen),
        ("TRANSACTION_CLOSE", TrafficRecordKind::TransactionClose),
        (
            "CHANGE_CAPTURE_REGISTRATION",
            TrafficRecordKind::ChangeCaptureRegistration,
        ),
    ];

    pub fn from_raw(raw: i32) -> Self {
        usize::try_from(raw)
            .ok()
            .and_then(|i| Self::NAMES.get(i))
            .map(|(_, k)| *k)
            .unwrap_or(TrafficRecordKind::Unknown(raw))
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            TrafficRecordKind::Unknown(raw) => *raw,
            known => Self::NAMES
                .iter()
                .position(|(_, k)| k == known)
                .map(|i| i as i32)
                .unwrap_or(-1),
        }
    }
}

impl TryFrom<WireValue> for TrafficRecordKind {
    type Error = String;

    fn try_from(value: WireValue) -> Result<Self, Self::Error> {
        match value {
            WireValue::Raw(raw) => Ok(TrafficRecordKind::from_raw(raw)),
            WireValue::Name(name) => {
                let upper = name.to_ascii_uppercase();
                Self::NAMES
                    .iter()
                    .find(|(n, _)| *n == upper)
                    .map(|(_, k)| *k)
                    .ok_or_else(|| format!("unknown traffic record kind `{}`", name))
            }
        }
    }
}

impl From<TrafficRecordKind> for WireValue {
    fn from(kind: TrafficRecordKind) -> Self {
        match kind {
            TrafficRecordKind::Unknown(raw) => WireValue::Raw(raw),
            known => TrafficRecordKind::NAMES
                .iter()
                .find(|(_, k)| *k == known)
                .map(|(n, _)| WireValue::Name((*n).to_string()))
                .unwrap_or(WireValue::Raw(known.as_raw())),
        }
    }
}

/// Client-supplied label attached to session traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Activity reported to the recorder by the request handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficEvent {
    pub session_id: Uuid,
    pub kind: TrafficRecordKind,
    pub catalog: String,
    pub duration_ms: u64,
    pub payload_bytes: u64,
    pub labels: Vec<Label>,
    pub summary: Option<String>,
}

impl TrafficEvent {
    pub fn new(session_id: Uuid, kind: TrafficRecordKind, catalog: &str) -> Self {
        Self {
            session_id,
            kind,
            catalog: catalog.to_string(),
            duration_ms: 0,
            payload_bytes: 0,
            labels: Vec::new(),
            summary: None,
        }
    }
}

/// A stored unit of session activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    /// Global, strictly increasing record id.
    pub record_id: u64,
    pub session_id: Uuid,
    /// Position of the record within its session.
    pub session_sequence: u64,
    pub kind: TrafficRecordKind,
    pub catalog: String,
    pub created: DateTime<Utc>,
    pub duration_ms: u64,
    pub payload_bytes: u64,
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// What a recording captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingCriteria {
    /// Percentage of sessions recorded, 1-100.
    pub sampling_rate: u8,
    /// Label names kept on records; empty keeps all.
    pub label_allowlist: Vec<String>,
    /// Record kinds captured; empty captures all.
    pub kinds: HashSet<TrafficRecordKind>,
}

impl Default for RecordingCriteria {
    fn default() -> Self {
        Self {
            sampling_rate: 100,
            label_allowlist: Vec::new(),
            kinds: HashSet::new(),
        }
    }
}

/// How a recording is persisted and bounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Also write captured records to a downloadable JSON-lines file.
    pub export_file: bool,
    pub max_duration_ms: Option<u64>,
    pub max_file_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Requested,
    Cancelled,
    DurationLimit,
    FileSizeLimit,
    ExportFailed,
    Shutdown,
}

/// Status of the current or most recent recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingStatus {
    pub task_id: Uuid,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub criteria: RecordingCriteria,
    pub settings: RecordingSettings,
    pub records_captured: u64,
    pub bytes_written: u64,
    pub stop_reason: Option<StopReason>,
    pub export_file: Option<FileToFetch>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryOrder {
    #[default]
    Chronological,
    ReverseChronological,
}

/// Restricts a history query. Every set condition must hold.
///
/// `since` and `since_record_id` are positions in traversal order: lower bounds for
/// chronological queries and upper bounds for reversed ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryFilter {
    pub session_ids: Vec<Uuid>,
    pub kinds: HashSet<TrafficRecordKind>,
    pub since: Option<DateTime<Utc>>,
    pub since_record_id: Option<u64>,
    pub labels: Vec<Label>,
    pub longer_than_ms: Option<u64>,
    pub fetching_more_bytes_than: Option<u64>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &TrafficRecord, order: HistoryOrder) -> bool {
        if !self.session_ids.is_empty() && !self.session_ids.contains(&record.session_id) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&record.kind) {
            return false;
        }
        let forward = order == HistoryOrder::Chronological;
        if let Some(since) = self.since {
            if (forward && record.created < since) || (!forward && record.created > since) {
                return false;
            }
        }
        if let Some(id) = self.since_record_id {
            if (forward && record.record_id < id) || (!forward && record.record_id > id) {
                return false;
            }
        }
        if !self.labels.iter().all(|l| record.labels.contains(l)) {
            return false;
        }
        if let Some(ms) = self.longer_than_ms {
            if record.duration_ms <= ms {
                return false;
            }
        }
        if let Some(bytes) = self.fetching_more_bytes_than {
            if record.payload_bytes <= bytes {
                return false;
            }
        }
        true
    }
}

/// One entry of a cardinality ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardinalityEntry {
    pub value: String,
    pub count: u64,
}
