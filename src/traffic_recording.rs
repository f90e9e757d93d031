//! Traffic recording core module.
//!
//! Captures a bounded, queryable history of session activity for diagnostics, independent of
//! change data capture.

pub mod export;
pub mod label_index;
pub mod recorder;
pub mod types;

pub use recorder::{HistoryCursor, TrafficRecorder, TRAFFIC_RECORDING_TASK};
pub use types::{
    CardinalityEntry, HistoryFilter, HistoryOrder, Label, RecordingCriteria, RecordingSettings,
    RecordingStatus, StopReason, TrafficEvent, TrafficRecord, TrafficRecordKind,
};
