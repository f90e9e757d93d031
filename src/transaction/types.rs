use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::change_capture::Mutation;
use crate::session_management::session::Session;

/// Transaction lifecycle: `Open -> Committing -> Committed` or `Open -> RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Open,
    Committing,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

/// Returned to the client of `OpenTransaction`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionHandle {
    pub transaction_id: Uuid,
    pub session_id: Uuid,
    pub catalog: String,
    /// Catalog version the transaction was opened against.
    pub catalog_version: u64,
    pub opened_at: DateTime<Utc>,
}

/// Returned to the client of `CloseTransaction`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseTransactionResult {
    pub transaction_id: Uuid,
    /// Commit sequence number; absent on rollback.
    pub sequence: Option<u64>,
    pub outcome: TransactionOutcome,
    pub mutation_count: usize,
}

/// Result of applying one entity mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationReceipt {
    pub entity_type: Option<String>,
    pub primary_key: Option<i64>,
    /// Transaction the mutation was appended to; absent when it was auto-committed.
    pub transaction_id: Option<Uuid>,
    /// Commit sequence number when the mutation was auto-committed.
    pub sequence: Option<u64>,
}

pub(crate) struct Transaction {
    pub(crate) id: Uuid,
    pub(crate) session: Arc<Session>,
    pub(crate) opened_at: DateTime<Utc>,
    pub(crate) opened_instant: Instant,
    pub(crate) state: TransactionState,
    pub(crate) mutations: Vec<Mutation>,
}

impl Transaction {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            opened_at: Utc::now(),
            opened_instant: Instant::now(),
            state: TransactionState::Open,
            mutations: Vec::new(),
        }
    }
}
