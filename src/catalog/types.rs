use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

/// Lifecycle state of a catalog.
///
/// A catalog starts in `WarmingUp` (bulk loading, no transactional writers) and moves to
/// `Alive` exactly once through `GoLiveAndClose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogState {
    WarmingUp,
    Alive,
}

/// Shared, interior-mutable record of one catalog.
///
/// The commit lock guards the last committed sequence number and is the only state in the
/// system that requires strict mutual exclusion across transactions.
#[derive(Debug)]
pub struct CatalogEntry {
    name: RwLock<String>,
    state: Mutex<CatalogState>,
    commit: AsyncMutex<u64>,
    version: AtomicU64,
    next_primary_key: AtomicI64,
    entity_types: Mutex<BTreeSet<String>>,
}

impl CatalogEntry {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name: RwLock::new(name),
            state: Mutex::new(CatalogState::WarmingUp),
            commit: AsyncMutex::new(0),
            version: AtomicU64::new(0),
            next_primary_key: AtomicI64::new(1),
            entity_types: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.write().unwrap_or_else(|e| e.into_inner()) = name;
    }

    pub fn state(&self) -> CatalogState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves the catalog from `WarmingUp` to `Alive`. Returns `false` if it was already alive.
    pub(crate) fn go_live(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            CatalogState::WarmingUp => {
                *state = CatalogState::Alive;
                true
            }
            CatalogState::Alive => false,
        }
    }

    /// Last committed sequence number (the catalog version).
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Acquires the catalog commit lock. The guarded value is the last committed sequence.
    pub async fn lock_commit(&self) -> MutexGuard<'_, u64> {
        self.commit.lock().await
    }

    /// Publishes a new version; must be called while holding the commit lock.
    pub(crate) fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }

    pub fn next_primary_key(&self) -> i64 {
        self.next_primary_key.fetch_add(1, Ordering::AcqRel)
    }

    /// Keeps the primary key counter ahead of externally chosen keys.
    pub fn observe_primary_key(&self, pk: i64) {
        self.next_primary_key.fetch_max(pk.saturating_add(1), Ordering::AcqRel);
    }

    pub fn record_entity_types<I: IntoIterator<Item = String>>(&self, types: I) {
        let mut known = self.entity_types.lock().unwrap_or_else(|e| e.into_inner());
        known.extend(types);
    }

    pub fn entity_types(&self) -> Vec<String> {
        self.entity_types
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
