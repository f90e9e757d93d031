use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::catalog::CatalogState;
use crate::change_capture::types::SubscriptionInfo;
use crate::session_management::session::SessionInfo;

/// Snapshot returned by `ServerStatus`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub version: String,
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub catalog_count: usize,
    pub active_sessions: usize,
    pub open_transactions: usize,
    pub committed_transactions: u64,
    pub rolled_back_transactions: u64,
    pub active_subscriptions: usize,
    pub recording: bool,
    /// Records currently held in the traffic history.
    pub traffic_records: usize,
}

/// Per-catalog view returned by `GetCatalogStatistics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogStatistics {
    pub name: String,
    pub state: CatalogState,
    pub version: u64,
    pub entity_types: Vec<String>,
    pub sessions: Vec<SessionInfo>,
    pub subscriptions: Vec<SubscriptionInfo>,
}

/// What one sweep pass retired.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub expired_sessions: Vec<Uuid>,
    pub expired_transactions: Vec<Uuid>,
    pub recording_stopped: Option<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_sessions.is_empty()
            && self.expired_transactions.is_empty()
            && self.recording_stopped.is_none()
    }
}
