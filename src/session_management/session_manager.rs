use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::session::{Session, SessionInfo, SessionMode};
use crate::catalog::{CatalogEntry, CatalogRegistry, CatalogState};
use crate::change_capture::ChangeCaptureBroker;
use crate::error_handling::types::{CatalogError, SessionError};
use crate::traffic_recording::types::Label;
use crate::transaction::TransactionCoordinator;

/// Outcome of a terminate request. Terminating twice is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationOutcome {
    Terminated,
    AlreadyClosed,
}

/// The structure related to session management
///
/// Issues, tracks and retires sessions and is the single source of truth for whether a
/// session id is valid.
///
/// # Fields Overview
///
/// - `sessions`: live sessions by id
/// - `catalogs`: registry sessions are bound against
/// - `transactions`: rolled back for sessions that go away
/// - `broker`: releases the change capture subscriptions of sessions that go away
/// - `max_sessions`: the maximum number of concurrently open sessions
/// - `session_timeout`: idle time after which the sweep terminates a session (`None` = never)
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    catalogs: Arc<CatalogRegistry>,
    transactions: Arc<TransactionCoordinator>,
    broker: Arc<ChangeCaptureBroker>,
    max_sessions: usize,
    session_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(
        catalogs: Arc<CatalogRegistry>,
        transactions: Arc<TransactionCoordinator>,
        broker: Arc<ChangeCaptureBroker>,
        max_sessions: usize,
        session_timeout: Option<Duration>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            catalogs,
            transactions,
            broker,
            max_sessions,
            session_timeout,
        }
    }

    pub fn create(&self, catalog: &str, mode: SessionMode) -> Result<Arc<Session>, SessionError> {
        self.create_labelled(catalog, mode, Vec::new())
    }

    /// Creates a session whose traffic carries the given labels.
    pub fn create_labelled(
        &self,
        catalog: &str,
        mode: SessionMode,
        labels: Vec<Label>,
    ) -> Result<Arc<Session>, SessionError> {
        let entry = self.catalogs.get(catalog)?;
        if mode.is_writable() && entry.state() == CatalogState::WarmingUp {
            warn!("Rejected read-write session on warming-up catalog `{}`", catalog);
            return Err(CatalogError::CatalogNotAlive(catalog.to_string()).into());
        }

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.len() >= self.max_sessions {
            warn!(
                "Session limit of {} reached, rejecting session on `{}`",
                self.max_sessions, catalog
            );
            return Err(SessionError::SessionLimitReached);
        }
        let session = Arc::new(Session::with_labels(entry, mode, labels));
        sessions.insert(session.id, Arc::clone(&session));
        info!(
            "[{}] session created on `{}` ({:?}, {:?})",
            session.id, catalog, mode.access, mode.format
        );
        Ok(session)
    }

    /// Resolves a session id and records activity on it.
    pub fn lookup(&self, session_id: Uuid) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::NotFound(session_id))?;
        session.touch();
        Ok(session)
    }

    /// Removes a session, rolling back its open transaction and dropping its subscriptions.
    pub fn terminate(&self, session_id: Uuid) -> TerminationOutcome {
        match self.retire(session_id) {
            Some(_) => TerminationOutcome::Terminated,
            None => TerminationOutcome::AlreadyClosed,
        }
    }

    /// Terminates a session and hands it back, `None` when it was already closed.
    pub fn retire(&self, session_id: Uuid) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session_id);
        let Some(session) = removed else {
            debug!("[{}] session already closed", session_id);
            return None;
        };
        if !session.mark_closed() {
            return None;
        }
        self.transactions.rollback_for_session(session_id);
        let released = self.broker.release_session(session_id);
        info!(
            "[{}] session terminated ({} subscription(s) released)",
            session_id, released
        );
        Some(session)
    }

    /// Switches the session's catalog from warm-up to alive and closes the session.
    pub fn go_live_and_close(&self, session_id: Uuid) -> Result<Arc<Session>, SessionError> {
        let session = self.lookup(session_id)?;
        let catalog = session.catalog();
        if !catalog.go_live() {
            return Err(CatalogError::CatalogAlreadyAlive(catalog.name()).into());
        }
        info!("Catalog `{}` went live through session {}", catalog.name(), session_id);
        self.retire(session_id);
        Ok(session)
    }

    /// Terminates every session bound to `catalog`.
    pub fn terminate_for_catalog(&self, catalog: &Arc<CatalogEntry>) -> Vec<Arc<Session>> {
        let affected: Vec<Uuid> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| Arc::ptr_eq(s.catalog(), catalog))
            .map(|s| s.id)
            .collect();
        affected.into_iter().filter_map(|id| self.retire(id)).collect()
    }

    /// Terminates sessions idle for longer than the configured timeout.
    pub fn expire_idle(&self, now: Instant) -> Vec<Arc<Session>> {
        let Some(timeout) = self.session_timeout else {
            return Vec::new();
        };
        let expired: Vec<Uuid> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.idle_for(now) >= timeout)
            .map(|s| s.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                warn!("[{}] session idle for more than {:?}, terminating", id, timeout);
                self.retire(id)
            })
            .collect()
    }

    pub fn sessions_for_catalog(&self, catalog: &str) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.catalog_name() == catalog)
            .map(|s| s.info())
            .collect();
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Terminates all sessions, used on shutdown.
    pub fn shutdown_all_sessions(&self) -> Vec<Arc<Session>> {
        let ids: Vec<Uuid> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.into_iter().filter_map(|id| self.retire(id)).collect()
    }
}
