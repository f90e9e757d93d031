use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::CatalogEntry;
use crate::traffic_recording::types::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
    Textual,
    Binary,
}

/// Access mode and output format requested when the session was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMode {
    pub access: AccessMode,
    pub format: OutputFormat,
}

impl SessionMode {
    pub const READ_ONLY: SessionMode = SessionMode {
        access: AccessMode::ReadOnly,
        format: OutputFormat::Textual,
    };
    pub const READ_WRITE: SessionMode = SessionMode {
        access: AccessMode::ReadWrite,
        format: OutputFormat::Textual,
    };
    pub const BINARY_READ_ONLY: SessionMode = SessionMode {
        access: AccessMode::ReadOnly,
        format: OutputFormat::Binary,
    };
    pub const BINARY_READ_WRITE: SessionMode = SessionMode {
        access: AccessMode::ReadWrite,
        format: OutputFormat::Binary,
    };

    pub fn is_writable(&self) -> bool {
        self.access == AccessMode::ReadWrite
    }
}

/// A live client session bound to one catalog.
///
/// Sessions are shared as `Arc<Session>` between the registry, the transaction coordinator and
/// in-flight request handlers. The registry entry is the owner; once terminated, the session is
/// flagged closed and every further operation through a stale handle fails.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
    /// Client labels attached to every traffic record of the session.
    pub labels: Vec<Label>,
    catalog: Arc<CatalogEntry>,
    last_activity: Mutex<Instant>,
    open_transaction: Mutex<Option<Uuid>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(catalog: Arc<CatalogEntry>, mode: SessionMode) -> Self {
        Self::with_labels(catalog, mode, Vec::new())
    }

    pub(crate) fn with_labels(
        catalog: Arc<CatalogEntry>,
        mode: SessionMode,
        labels: Vec<Label>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            created_at: Utc::now(),
            labels,
            catalog,
            last_activity: Mutex::new(Instant::now()),
            open_transaction: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogEntry> {
        &self.catalog
    }

    pub fn catalog_name(&self) -> String {
        self.catalog.name()
    }

    pub fn is_writable(&self) -> bool {
        self.mode.is_writable()
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = *self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        now.saturating_duration_since(last)
    }

    pub fn open_transaction(&self) -> Option<Uuid> {
        *self.open_transaction.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Binds a transaction to the session. Fails with the id of the already bound one.
    pub(crate) fn bind_transaction(&self, transaction_id: Uuid) -> Result<(), Uuid> {
        let mut slot = self.open_transaction.lock().unwrap_or_else(|e| e.into_inner());
        match *slot {
            Some(existing) => Err(existing),
            None => {
                *slot = Some(transaction_id);
                Ok(())
            }
        }
    }

    pub(crate) fn release_transaction(&self, transaction_id: Uuid) {
        let mut slot = self.open_transaction.lock().unwrap_or_else(|e| e.into_inner());
        if *slot == Some(transaction_id) {
            *slot = None;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flags the session closed. Returns `false` when it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            catalog: self.catalog_name(),
            mode: self.mode,
            created_at: self.created_at,
            idle_ms: self.idle_for(Instant::now()).as_millis() as u64,
            open_transaction: self.open_transaction(),
            labels: self.labels.clone(),
        }
    }
}

/// Serializable snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub catalog: String,
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
    pub idle_ms: u64,
    pub open_transaction: Option<Uuid>,
    pub labels: Vec<Label>,
}
