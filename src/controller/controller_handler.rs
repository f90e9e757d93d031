//! The controller wires the registries together and exposes every remote procedure.
//!
//! Entry points (the web interface, tests) never touch the registries directly: they call the
//! controller, which authorises the caller's session, performs the operation, reports the
//! activity to the traffic recorder and converts every failure into a [`ServiceError`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::types::{CatalogStatistics, ServerStatus, SweepReport};
use crate::catalog::{CatalogEntry, CatalogRegistry, CatalogState, RESERVED_KEYWORDS};
use crate::change_capture::{
    ChangeCaptureBroker, ChangeCaptureFilter, ChangeCaptureStream, ClassifierType, Mutation,
    Operation,
};
use crate::configuration::Config;
use crate::error_handling::types::{CaptureError, ConfigError, RecordingError, ServiceError};
use crate::management::{
    FileChunks, FileRegistry, FileToFetch, Page, TaskRegistry, TaskState, TaskStatus,
    FETCH_CHUNK_SIZE,
};
use crate::session_management::{Session, SessionInfo, SessionManager, SessionMode, TerminationOutcome};
use crate::traffic_recording::{
    CardinalityEntry, HistoryCursor, HistoryFilter, HistoryOrder, Label, RecordingCriteria,
    RecordingSettings, RecordingStatus, TrafficEvent, TrafficRecord, TrafficRecordKind,
    TrafficRecorder,
};
use crate::transaction::{CloseTransactionResult, MutationReceipt, TransactionCoordinator, TransactionHandle};

/// The structure serving every remote procedure
///
/// # Fields Overview
///
/// - `config`: the effective configuration, reported back by `GetConfiguration`
/// - `instance_id`, `started_at`, `started`: identity and uptime reported by `ServerStatus`
/// - `catalogs`: catalog registry
/// - `broker`: change data capture fan-out
/// - `transactions`: transaction coordinator
/// - `sessions`: session registry, owner of every live session
/// - `tasks`, `files`: management registries
/// - `recorder`: traffic recorder fed by every session-scoped call
pub struct Controller {
    pub config: Config,
    instance_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    catalogs: Arc<CatalogRegistry>,
    broker: Arc<ChangeCaptureBroker>,
    transactions: Arc<TransactionCoordinator>,
    sessions: Arc<SessionManager>,
    tasks: Arc<TaskRegistry>,
    files: Arc<FileRegistry>,
    recorder: Arc<TrafficRecorder>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let catalogs = Arc::new(CatalogRegistry::new());
        let broker = ChangeCaptureBroker::new(
            config.change_capture.queue_capacity,
            config.slow_consumer_timeout(),
        );
        let transactions = Arc::new(TransactionCoordinator::new(
            Arc::clone(&broker),
            config.transaction_timeout(),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&catalogs),
            Arc::clone(&transactions),
            Arc::clone(&broker),
            config.sessions.max_sessions,
            config.session_timeout(),
        ));
        let tasks = Arc::new(TaskRegistry::with_retention(config.tasks.max_finished_tasks));
        let files = Arc::new(FileRegistry::new());
        let recorder = Arc::new(TrafficRecorder::new(
            Arc::clone(&tasks),
            Arc::clone(&files),
            config.traffic_recording.export_directory.clone(),
            config.traffic_recording.max_records,
            config.retention(),
        ));

        let instance_id = Uuid::new_v4();
        info!("Controller {} initialised", instance_id);
        Ok(Self {
            config,
            instance_id,
            started_at: Utc::now(),
            started: Instant::now(),
            catalogs,
            broker,
            transactions,
            sessions,
            tasks,
            files,
            recorder,
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    fn session(&self, session_id: Uuid) -> Result<Arc<Session>, ServiceError> {
        Ok(self.sessions.lookup(session_id)?)
    }

    fn record_traffic(
        &self,
        session: &Session,
        kind: TrafficRecordKind,
        started: Instant,
        payload_bytes: u64,
        summary: Option<String>,
    ) {
        let mut event = TrafficEvent::new(session.id, kind, &session.catalog_name());
        event.duration_ms = started.elapsed().as_millis() as u64;
        event.payload_bytes = payload_bytes;
        event.labels = session.labels.clone();
        event.summary = summary;
        self.recorder.record(event);
    }

    fn record_closed(&self, sessions: &[Arc<Session>]) {
        let now = Instant::now();
        for session in sessions {
            self.record_traffic(session, TrafficRecordKind::SessionClose, now, 0, None);
        }
    }

    // Sessions

    pub fn create_session(
        &self,
        catalog: &str,
        mode: SessionMode,
        labels: Vec<Label>,
    ) -> Result<SessionInfo, ServiceError> {
        let started = Instant::now();
        let session = self.sessions.create_labelled(catalog, mode, labels)?;
        self.record_traffic(
            &session,
            TrafficRecordKind::SessionStart,
            started,
            0,
            Some(format!("{:?} {:?}", mode.access, mode.format)),
        );
        Ok(session.info())
    }

    /// Terminates a session. Terminating a closed or unknown session is not an error.
    pub fn terminate_session(&self, session_id: Uuid) -> TerminationOutcome {
        match self.sessions.retire(session_id) {
            Some(session) => {
                self.record_closed(&[session]);
                TerminationOutcome::Terminated
            }
            None => TerminationOutcome::AlreadyClosed,
        }
    }

    /// Closes the caller's own session.
    pub fn close(&self, session_id: Uuid) -> Result<TerminationOutcome, ServiceError> {
        self.session(session_id)?;
        Ok(self.terminate_session(session_id))
    }

    pub fn go_live_and_close(&self, session_id: Uuid) -> Result<(), ServiceError> {
        let session = self.sessions.go_live_and_close(session_id)?;
        self.record_closed(&[session]);
        Ok(())
    }

    pub fn session_info(&self, session_id: Uuid) -> Result<SessionInfo, ServiceError> {
        Ok(self.session(session_id)?.info())
    }

    // Catalog administration

    pub fn catalog_names(&self) -> Vec<String> {
        self.catalogs.names()
    }

    pub fn catalog_state(&self, name: &str) -> Result<CatalogState, ServiceError> {
        Ok(self.catalogs.state(name)?)
    }

    pub fn define_catalog(&self, name: &str) -> Result<CatalogState, ServiceError> {
        Ok(self.catalogs.define(name)?.state())
    }

    /// Makes a catalog leave the warm-up state without a session.
    pub fn go_live(&self, name: &str) -> Result<(), ServiceError> {
        Ok(self.catalogs.go_live(name)?)
    }

    /// Retires the subscriptions and sessions bound to a catalog that is going away.
    fn release_catalog(&self, name: &str, entry: &Arc<CatalogEntry>) {
        let subscriptions = self.broker.release_catalog(name);
        let closed = self.sessions.terminate_for_catalog(entry);
        if subscriptions > 0 || !closed.is_empty() {
            info!(
                "Catalog `{}` released {} session(s) and {} subscription(s)",
                name,
                closed.len(),
                subscriptions
            );
        }
        self.record_closed(&closed);
    }

    pub fn delete_catalog_if_exists(&self, name: &str) -> bool {
        let Ok(entry) = self.catalogs.get(name) else {
            return false;
        };
        if !self.catalogs.delete_if_exists(name) {
            return false;
        }
        self.release_catalog(name, &entry);
        true
    }

    pub fn rename_catalog(&self, from: &str, to: &str) -> Result<(), ServiceError> {
        let entry = self.catalogs.get(from)?;
        self.catalogs.rename(from, to)?;
        self.release_catalog(from, &entry);
        Ok(())
    }

    /// `replaced_by` takes over the name `to_be_replaced`; the previous holder of that name is
    /// dropped.
    pub fn replace_catalog(&self, to_be_replaced: &str, replaced_by: &str) -> Result<(), ServiceError> {
        let source = self.catalogs.get(replaced_by)?;
        let target = self.catalogs.get(to_be_replaced).ok();
        self.catalogs.replace(to_be_replaced, replaced_by)?;
        if let Some(target) = target {
            self.release_catalog(to_be_replaced, &target);
        }
        self.release_catalog(replaced_by, &source);
        Ok(())
    }

    // Session-scoped reads

    pub fn session_catalog_state(&self, session_id: Uuid) -> Result<CatalogState, ServiceError> {
        Ok(self.session(session_id)?.catalog().state())
    }

    pub fn all_entity_types(&self, session_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let started = Instant::now();
        let session = self.session(session_id)?;
        let types = session.catalog().entity_types();
        self.record_traffic(
            &session,
            TrafficRecordKind::Query,
            started,
            0,
            Some("all entity types".to_string()),
        );
        Ok(types)
    }

    // Transactions and data

    pub fn open_transaction(&self, session_id: Uuid) -> Result<TransactionHandle, ServiceError> {
        let started = Instant::now();
        let session = self.session(session_id)?;
        let handle = self.transactions.open(&session)?;
        self.record_traffic(
            &session,
            TrafficRecordKind::TransactionOpen,
            started,
            0,
            Some(handle.transaction_id.to_string()),
        );
        Ok(handle)
    }

    pub async fn close_transaction(
        &self,
        session_id: Uuid,
        transaction_id: Uuid,
        commit: bool,
    ) -> Result<CloseTransactionResult, ServiceError> {
        let started = Instant::now();
        let session = self.session(session_id)?;
        let result = self
            .transactions
            .close(&session, transaction_id, commit)
            .await?;
        self.record_traffic(
            &session,
            TrafficRecordKind::TransactionClose,
            started,
            0,
            Some(format!("{:?} {}", result.outcome, transaction_id)),
        );
        Ok(result)
    }

    pub async fn upsert_entity(
        &self,
        session_id: Uuid,
        entity_type: &str,
        primary_key: Option<i64>,
        classifier: Option<ClassifierType>,
        body: Value,
    ) -> Result<MutationReceipt, ServiceError> {
        if entity_type.is_empty() {
            return Err(ServiceError::InvalidArgument("entity type must not be empty".into()));
        }
        let payload_bytes = serde_json::to_vec(&body).map_or(0, |b| b.len() as u64);
        let mutation = Mutation {
            entity_type: Some(entity_type.to_string()),
            primary_key,
            classifier: classifier.unwrap_or(ClassifierType::Entity),
            operation: Operation::Upsert,
            body: Some(body),
        };
        self.mutate(session_id, mutation, payload_bytes).await
    }

    pub async fn delete_entity(
        &self,
        session_id: Uuid,
        entity_type: &str,
        primary_key: i64,
    ) -> Result<MutationReceipt, ServiceError> {
        if entity_type.is_empty() {
            return Err(ServiceError::InvalidArgument("entity type must not be empty".into()));
        }
        self.mutate(session_id, Mutation::delete_entity(entity_type, primary_key), 0)
            .await
    }

    async fn mutate(
        &self,
        session_id: Uuid,
        mutation: Mutation,
        payload_bytes: u64,
    ) -> Result<MutationReceipt, ServiceError> {
        let started = Instant::now();
        let session = self.session(session_id)?;
        let operation = mutation.operation;
        let receipt = self.transactions.mutate(&session, mutation).await?;
        self.record_traffic(
            &session,
            TrafficRecordKind::Mutation,
            started,
            payload_bytes,
            Some(format!(
                "{:?} {}/{}",
                operation,
                receipt.entity_type.as_deref().unwrap_or("-"),
                receipt.primary_key.map_or("-".to_string(), |pk| pk.to_string())
            )),
        );
        Ok(receipt)
    }

    // Change data capture

    pub fn register_change_capture(
        &self,
        session_id: Uuid,
        filter: ChangeCaptureFilter,
    ) -> Result<ChangeCaptureStream, ServiceError> {
        let started = Instant::now();
        let session = self.session(session_id)?;
        let catalog = session.catalog();
        let stream = self.broker.subscribe(
            session.id,
            &catalog.name(),
            catalog.version(),
            filter,
        )?;
        // termination may have raced the registration
        if session.is_closed() {
            self.broker.unsubscribe(stream.id());
            return Err(CaptureError::SessionClosed(session.id).into());
        }
        self.record_traffic(
            &session,
            TrafficRecordKind::ChangeCaptureRegistration,
            started,
            0,
            Some(stream.id().to_string()),
        );
        Ok(stream)
    }

    /// Ends a subscription owned by the caller. Returns `false` when it had already ended.
    pub fn unregister_change_capture(
        &self,
        session_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let session = self.session(session_id)?;
        Ok(self.broker.unsubscribe_owned(session.id, subscription_id)?)
    }

    // Traffic recording

    pub fn start_traffic_recording(
        &self,
        criteria: RecordingCriteria,
        settings: RecordingSettings,
    ) -> Result<RecordingStatus, ServiceError> {
        Ok(self.recorder.start(criteria, settings)?)
    }

    pub fn stop_traffic_recording(&self, task_id: Option<Uuid>) -> Result<RecordingStatus, ServiceError> {
        Ok(self.recorder.stop(task_id)?)
    }

    pub fn traffic_recording_status(&self) -> Option<RecordingStatus> {
        self.recorder.status()
    }

    pub fn traffic_history_list(
        &self,
        filter: &HistoryFilter,
        limit: usize,
        reversed: bool,
    ) -> Vec<TrafficRecord> {
        let order = if reversed {
            HistoryOrder::ReverseChronological
        } else {
            HistoryOrder::Chronological
        };
        self.recorder.query_history(filter, order, limit)
    }

    pub fn traffic_history(&self, filter: HistoryFilter, limit: usize) -> HistoryCursor {
        self.recorder
            .history_cursor(filter, HistoryOrder::Chronological, limit)
    }

    pub fn traffic_label_names(&self, prefix: Option<&str>, top_n: usize) -> Vec<CardinalityEntry> {
        self.recorder.label_names_by_cardinality(prefix, top_n)
    }

    pub fn traffic_label_values(
        &self,
        name: &str,
        prefix: Option<&str>,
        top_n: usize,
    ) -> Vec<CardinalityEntry> {
        self.recorder.label_values_by_cardinality(name, prefix, top_n)
    }

    // Management

    pub fn server_status(&self) -> ServerStatus {
        ServerStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: self.instance_id,
            started_at: self.started_at,
            uptime_secs: self.started.elapsed().as_secs(),
            catalog_count: self.catalogs.len(),
            active_sessions: self.sessions.active_count(),
            open_transactions: self.transactions.open_count(),
            committed_transactions: self.transactions.committed_count(),
            rolled_back_transactions: self.transactions.rolled_back_count(),
            active_subscriptions: self.broker.active_count(),
            recording: self.recorder.is_recording(),
            traffic_records: self.recorder.record_count(),
        }
    }

    pub fn configuration(&self) -> Result<Value, ServiceError> {
        serde_json::to_value(&self.config).map_err(|e| ServiceError::Internal(e.to_string()))
    }

    pub fn catalog_statistics(&self) -> Vec<CatalogStatistics> {
        self.catalogs
            .names()
            .into_iter()
            .filter_map(|name| {
                let entry = self.catalogs.get(&name).ok()?;
                Some(CatalogStatistics {
                    state: entry.state(),
                    version: entry.version(),
                    entity_types: entry.entity_types(),
                    sessions: self.sessions.sessions_for_catalog(&name),
                    subscriptions: self.broker.subscriptions_for_catalog(&name),
                    name,
                })
            })
            .collect()
    }

    pub fn reserved_keywords(&self) -> Vec<&'static str> {
        RESERVED_KEYWORDS.to_vec()
    }

    pub fn list_task_statuses(
        &self,
        page: usize,
        page_size: usize,
        states: &[TaskState],
    ) -> Result<Page<TaskStatus>, ServiceError> {
        Ok(self.tasks.list(page, page_size, states)?)
    }

    pub fn task_status(&self, task_id: Uuid) -> Result<TaskStatus, ServiceError> {
        Ok(self.tasks.get(task_id)?)
    }

    /// Cancels a task. Cancelling the running recording stops it and discards its export.
    pub fn cancel_task(&self, task_id: Uuid) -> Result<TaskStatus, ServiceError> {
        if self.recorder.active_task() == Some(task_id) {
            return self.cancel_recording(task_id);
        }
        Ok(self.tasks.cancel(task_id)?)
    }

    /// A recording that stopped on its own before the cancel reached it reports its final status.
    pub(super) fn cancel_recording(&self, task_id: Uuid) -> Result<TaskStatus, ServiceError> {
        match self.recorder.cancel(task_id) {
            Ok(_) | Err(RecordingError::RecordingNotActive) => Ok(self.tasks.get(task_id)?),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_files(
        &self,
        page: usize,
        page_size: usize,
        origin: Option<&str>,
    ) -> Result<Page<FileToFetch>, ServiceError> {
        Ok(self.files.list(page, page_size, origin)?)
    }

    pub fn file(&self, file_id: Uuid) -> Result<FileToFetch, ServiceError> {
        Ok(self.files.get(file_id)?)
    }

    pub fn fetch_file(&self, file_id: Uuid) -> Result<FileChunks, ServiceError> {
        Ok(self.files.open(file_id, FETCH_CHUNK_SIZE)?)
    }

    pub fn delete_file(&self, file_id: Uuid) -> Result<(), ServiceError> {
        Ok(self.files.delete(file_id)?)
    }

    // Lifecycle

    /// Retires idle sessions, stale transactions and a recording past its duration limit.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let expired = self.sessions.expire_idle(now);
        self.record_closed(&expired);
        let report = SweepReport {
            expired_sessions: expired.iter().map(|s| s.id).collect(),
            expired_transactions: self.transactions.expire_stale(now),
            recording_stopped: self.recorder.check_limits(now).map(|s| s.task_id),
        };
        if !report.is_empty() {
            debug!("Sweep: {:?}", report);
        }
        report
    }

    /// Runs [`Controller::sweep`] every `sweep_interval_secs` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                controller.sweep(Instant::now());
            }
        })
    }

    /// Closes every session and stops a running recording.
    pub fn shutdown(&self) {
        info!("Controller {} shutting down", self.instance_id);
        let closed = self.sessions.shutdown_all_sessions();
        self.record_closed(&closed);
        if let Some(status) = self.recorder.shutdown() {
            info!("Traffic recording {} stopped on shutdown", status.task_id);
        }
        if self.transactions.open_count() > 0 {
            warn!(
                "{} transaction(s) still open after shutdown",
                self.transactions.open_count()
            );
        }
    }
}
