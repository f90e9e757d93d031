use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use uuid::Uuid;

use super::types::{
    CloseTransactionResult, MutationReceipt, Transaction, TransactionHandle, TransactionOutcome,
    TransactionState,
};
use crate::change_capture::{ChangeCaptureBroker, Mutation, Operation};
use crate::error_handling::types::TransactionError;
use crate::session_management::session::Session;

/// Opens, collects and closes transactions.
///
/// Open transactions live in a table keyed by transaction id. Committing takes the transaction
/// out of the table first, so a session terminating mid-commit cannot roll it back: the commit
/// always runs to completion. The commit step itself runs under the catalog commit lock, which
/// serialises sequence assignment and change capture publication per catalog.
pub struct TransactionCoordinator {
    open: Mutex<HashMap<Uuid, Transaction>>,
    broker: Arc<ChangeCaptureBroker>,
    timeout: Option<Duration>,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl TransactionCoordinator {
    pub fn new(broker: Arc<ChangeCaptureBroker>, timeout: Option<Duration>) -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
            broker,
            timeout,
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    fn lock_open(&self) -> MutexGuard<'_, HashMap<Uuid, Transaction>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_writable(session: &Session) -> Result<(), TransactionError> {
        if session.is_closed() {
            return Err(TransactionError::SessionClosed(session.id));
        }
        if !session.is_writable() {
            return Err(TransactionError::SessionNotWritable(session.id));
        }
        Ok(())
    }

    pub fn open(&self, session: &Arc<Session>) -> Result<TransactionHandle, TransactionError> {
        Self::ensure_writable(session)?;
        let tx = Transaction::new(Arc::clone(session));
        session
            .bind_transaction(tx.id)
            .map_err(|existing| TransactionError::TransactionAlreadyOpen {
                session_id: session.id,
                transaction_id: existing,
            })?;

        let handle = TransactionHandle {
            transaction_id: tx.id,
            session_id: session.id,
            catalog: session.catalog_name(),
            catalog_version: session.catalog().version(),
            opened_at: tx.opened_at,
        };
        self.lock_open().insert(tx.id, tx);

        // the session may have been terminated while we were binding
        if session.is_closed() {
            self.discard(handle.transaction_id);
            return Err(TransactionError::SessionClosed(session.id));
        }

        info!(
            "[{}] transaction opened on `{}` by session {}",
            handle.transaction_id, handle.catalog, session.id
        );
        Ok(handle)
    }

    fn discard(&self, transaction_id: Uuid) -> Option<Transaction> {
        let mut tx = self.lock_open().remove(&transaction_id)?;
        tx.state = TransactionState::RolledBack;
        tx.session.release_transaction(tx.id);
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
        Some(tx)
    }

    /// Appends a mutation to an open transaction owned by `session`.
    pub fn append(
        &self,
        session: &Session,
        transaction_id: Uuid,
        mutation: Mutation,
    ) -> Result<usize, TransactionError> {
        let mut open = self.lock_open();
        let tx = open
            .get_mut(&transaction_id)
            .filter(|tx| tx.state == TransactionState::Open)
            .ok_or(TransactionError::TransactionNotFound(transaction_id))?;
        if tx.session.id != session.id {
            return Err(TransactionError::NotOwner {
                transaction_id,
                session_id: session.id,
            });
        }
        tx.mutations.push(mutation);
        Ok(tx.mutations.len())
    }

    /// Applies an entity mutation in the session's open transaction, or commits it right away
    /// when the session holds none.
    pub async fn mutate(
        &self,
        session: &Arc<Session>,
        mut mutation: Mutation,
    ) -> Result<MutationReceipt, TransactionError> {
        Self::ensure_writable(session)?;
        let catalog = session.catalog();
        if mutation.operation == Operation::Upsert && mutation.entity_type.is_some() {
            match mutation.primary_key {
                Some(pk) => catalog.observe_primary_key(pk),
                None => mutation.primary_key = Some(catalog.next_primary_key()),
            }
        }

        let mut receipt = MutationReceipt {
            entity_type: mutation.entity_type.clone(),
            primary_key: mutation.primary_key,
            transaction_id: None,
            sequence: None,
        };
        match session.open_transaction() {
            Some(transaction_id) => {
                self.append(session, transaction_id, mutation)?;
                receipt.transaction_id = Some(transaction_id);
            }
            None => {
                let sequence = self.commit_mutations(session, &[mutation]).await;
                self.committed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Auto-committed mutation of session {} as sequence {}",
                    session.id, sequence
                );
                receipt.sequence = Some(sequence);
            }
        }
        Ok(receipt)
    }

    /// Commits or rolls back a transaction owned by `session`.
    pub async fn close(
        &self,
        session: &Session,
        transaction_id: Uuid,
        commit: bool,
    ) -> Result<CloseTransactionResult, TransactionError> {
        let mut tx = {
            let mut open = self.lock_open();
            match open.get(&transaction_id) {
                None => return Err(TransactionError::TransactionNotFound(transaction_id)),
                Some(tx) if tx.session.id != session.id => {
                    return Err(TransactionError::NotOwner {
                        transaction_id,
                        session_id: session.id,
                    })
                }
                Some(_) => {}
            }
            open.remove(&transaction_id)
                .ok_or(TransactionError::TransactionNotFound(transaction_id))?
        };

        if !commit {
            tx.state = TransactionState::RolledBack;
            tx.session.release_transaction(tx.id);
            self.rolled_back.fetch_add(1, Ordering::Relaxed);
            info!(
                "[{}] transaction rolled back, {} mutation(s) discarded",
                tx.id,
                tx.mutations.len()
            );
            return Ok(CloseTransactionResult {
                transaction_id,
                sequence: None,
                outcome: TransactionOutcome::RolledBack,
                mutation_count: tx.mutations.len(),
            });
        }

        tx.state = TransactionState::Committing;
        let sequence = self.commit_mutations(&tx.session, &tx.mutations).await;
        tx.state = TransactionState::Committed;
        tx.session.release_transaction(tx.id);
        self.committed.fetch_add(1, Ordering::Relaxed);
        info!(
            "[{}] transaction committed as sequence {} of `{}` ({} mutation(s))",
            tx.id,
            sequence,
            tx.session.catalog_name(),
            tx.mutations.len()
        );
        Ok(CloseTransactionResult {
            transaction_id,
            sequence: Some(sequence),
            outcome: TransactionOutcome::Committed,
            mutation_count: tx.mutations.len(),
        })
    }

    /// Assigns the next catalog sequence number and publishes the mutations under it.
    async fn commit_mutations(&self, session: &Session, mutations: &[Mutation]) -> u64 {
        let catalog = session.catalog();
        let mut last = catalog.lock_commit().await;
        let sequence = *last + 1;
        self.broker
            .publish(&catalog.name(), sequence, mutations)
            .await;
        *last = sequence;
        catalog.set_version(sequence);
        catalog.record_entity_types(
            mutations
                .iter()
                .filter(|m| m.operation == Operation::Upsert)
                .filter_map(|m| m.entity_type.clone()),
        );
        sequence
    }

    /// Rolls back the open transaction of a terminated session, if any.
    pub fn rollback_for_session(&self, session_id: Uuid) -> Option<Uuid> {
        let transaction_id = self
            .lock_open()
            .values()
            .find(|tx| tx.session.id == session_id && tx.state == TransactionState::Open)
            .map(|tx| tx.id)?;
        let tx = self.discard(transaction_id)?;
        info!(
            "[{}] transaction implicitly rolled back, session {} terminated",
            tx.id, session_id
        );
        Some(tx.id)
    }

    /// Rolls back transactions left open past the configured limit.
    pub fn expire_stale(&self, now: Instant) -> Vec<Uuid> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let stale: Vec<Uuid> = self
            .lock_open()
            .values()
            .filter(|tx| now.saturating_duration_since(tx.opened_instant) >= timeout)
            .map(|tx| tx.id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.discard(id))
            .map(|tx| {
                warn!(
                    "[{}] transaction of session {} exceeded {:?}, rolled back",
                    tx.id, tx.session.id, timeout
                );
                tx.id
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self, transaction_id: Uuid) -> bool {
        self.lock_open().contains_key(&transaction_id)
    }

    pub fn open_count(&self) -> usize {
        self.lock_open().len()
    }

    pub fn committed_count(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn rolled_back_count(&self) -> u64 {
        self.rolled_back.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, CatalogRegistry};
    use crate::change_capture::ChangeCaptureFilter;
    use crate::session_management::session::SessionMode;
    use serde_json::json;

    fn setup() -> (Arc<CatalogEntry>, Arc<ChangeCaptureBroker>, Arc<TransactionCoordinator>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = CatalogRegistry::new();
        let catalog = registry.define("products").unwrap();
        registry.go_live("products").unwrap();
        let broker = ChangeCaptureBroker::new(64, Duration::from_secs(1));
        let coordinator = Arc::new(TransactionCoordinator::new(Arc::clone(&broker), None));
        (catalog, broker, coordinator)
    }

    fn session(catalog: &Arc<CatalogEntry>, mode: SessionMode) -> Arc<Session> {
        Arc::new(Session::new(Arc::clone(catalog), mode))
    }

    #[tokio::test]
    async fn read_only_session_cannot_open() {
        let (catalog, _, coordinator) = setup();
        let s = session(&catalog, SessionMode::READ_ONLY);
        assert_eq!(
            coordinator.open(&s).unwrap_err(),
            TransactionError::SessionNotWritable(s.id)
        );
        assert!(matches!(
            coordinator.mutate(&s, Mutation::delete_entity("product", 1)).await,
            Err(TransactionError::SessionNotWritable(_))
        ));
    }

    #[tokio::test]
    async fn second_open_fails_until_first_closes() {
        let (catalog, _, coordinator) = setup();
        let s = session(&catalog, SessionMode::READ_WRITE);
        let first = coordinator.open(&s).unwrap();
        assert_eq!(
            coordinator.open(&s).unwrap_err(),
            TransactionError::TransactionAlreadyOpen {
                session_id: s.id,
                transaction_id: first.transaction_id
            }
        );

        let closed = coordinator
            .close(&s, first.transaction_id, false)
            .await
            .unwrap();
        assert_eq!(closed.outcome, TransactionOutcome::RolledBack);
        assert_eq!(closed.sequence, None);
        assert!(coordinator.open(&s).is_ok());
    }

    #[tokio::test]
    async fn closing_twice_is_not_found() {
        let (catalog, _, coordinator) = setup();
        let s = session(&catalog, SessionMode::READ_WRITE);
        let tx = coordinator.open(&s).unwrap();
        coordinator.close(&s, tx.transaction_id, true).await.unwrap();
        assert_eq!(
            coordinator
                .close(&s, tx.transaction_id, true)
                .await
                .unwrap_err(),
            TransactionError::TransactionNotFound(tx.transaction_id)
        );
    }

    #[tokio::test]
    async fn only_owner_can_close() {
        let (catalog, _, coordinator) = setup();
        let owner = session(&catalog, SessionMode::READ_WRITE);
        let intruder = session(&catalog, SessionMode::READ_WRITE);
        let tx = coordinator.open(&owner).unwrap();
        assert!(matches!(
            coordinator.close(&intruder, tx.transaction_id, true).await,
            Err(TransactionError::NotOwner { .. })
        ));
        assert!(coordinator.is_open(tx.transaction_id));
    }

    #[tokio::test]
    async fn empty_commit_consumes_a_sequence() {
        let (catalog, _, coordinator) = setup();
        let s = session(&catalog, SessionMode::READ_WRITE);
        let tx = coordinator.open(&s).unwrap();
        let result = coordinator.close(&s, tx.transaction_id, true).await.unwrap();
        assert_eq!(result.sequence, Some(1));
        assert_eq!(result.mutation_count, 0);
        assert_eq!(catalog.version(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_get_distinct_increasing_sequences() {
        let (catalog, _, coordinator) = setup();
        let mut handles = Vec::new();
        for i in 0..32 {
            let s = session(&catalog, SessionMode::READ_WRITE);
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                let tx = coordinator.open(&s).unwrap();
                coordinator
                    .append(&s, tx.transaction_id, Mutation::upsert_entity("product", i, json!({})))
                    .unwrap();
                coordinator
                    .close(&s, tx.transaction_id, true)
                    .await
                    .unwrap()
                    .sequence
                    .unwrap()
            }));
        }
        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=32).collect::<Vec<u64>>());
        assert_eq!(catalog.version(), 32);
        assert_eq!(coordinator.committed_count(), 32);
    }

    #[tokio::test]
    async fn committed_mutations_reach_matching_subscribers() {
        let (catalog, broker, coordinator) = setup();
        {
            let mut last = catalog.lock_commit().await;
            *last = 99;
            catalog.set_version(99);
        }
        let writer = session(&catalog, SessionMode::READ_WRITE);
        let mut stream = broker
            .subscribe(
                Uuid::new_v4(),
                "products",
                catalog.version(),
                ChangeCaptureFilter::for_entity_type("product", [Operation::Upsert]),
            )
            .unwrap();

        let tx = coordinator.open(&writer).unwrap();
        coordinator
            .mutate(&writer, Mutation::upsert_entity("product", 42, json!({"name": "x"})))
            .await
            .unwrap();
        coordinator
            .mutate(&writer, Mutation::delete_entity("product", 7))
            .await
            .unwrap();
        let result = coordinator
            .close(&writer, tx.transaction_id, true)
            .await
            .unwrap();
        assert_eq!(result.sequence, Some(100));

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!((event.sequence, event.primary_key), (100, Some(42)));
        assert!(stream.try_next().is_none());
        assert_eq!(catalog.entity_types(), vec!["product".to_string()]);
    }

    #[tokio::test]
    async fn rolled_back_mutations_are_never_published() {
        let (catalog, broker, coordinator) = setup();
        let writer = session(&catalog, SessionMode::READ_WRITE);
        let mut stream = broker
            .subscribe(Uuid::new_v4(), "products", 0, ChangeCaptureFilter::default())
            .unwrap();
        let tx = coordinator.open(&writer).unwrap();
        coordinator
            .mutate(&writer, Mutation::delete_entity("product", 1))
            .await
            .unwrap();
        coordinator
            .close(&writer, tx.transaction_id, false)
            .await
            .unwrap();
        assert!(stream.try_next().is_none());
        assert_eq!(catalog.version(), 0);
    }

    #[tokio::test]
    async fn auto_commit_assigns_primary_keys() {
        let (catalog, _, coordinator) = setup();
        let writer = session(&catalog, SessionMode::READ_WRITE);
        let mut upsert = Mutation::upsert_entity("product", 0, json!({}));
        upsert.primary_key = None;

        let first = coordinator.mutate(&writer, upsert.clone()).await.unwrap();
        assert_eq!(first.primary_key, Some(1));
        assert_eq!(first.sequence, Some(1));
        assert_eq!(first.transaction_id, None);

        coordinator
            .mutate(&writer, Mutation::upsert_entity("product", 10, json!({})))
            .await
            .unwrap();
        let third = coordinator.mutate(&writer, upsert).await.unwrap();
        assert_eq!(third.primary_key, Some(11));
        assert_eq!(catalog.version(), 3);
    }

    #[tokio::test]
    async fn session_loss_rolls_back_open_transaction() {
        let (catalog, _, coordinator) = setup();
        let writer = session(&catalog, SessionMode::READ_WRITE);
        let tx = coordinator.open(&writer).unwrap();
        assert_eq!(
            coordinator.rollback_for_session(writer.id),
            Some(tx.transaction_id)
        );
        assert_eq!(writer.open_transaction(), None);
        assert_eq!(coordinator.rollback_for_session(writer.id), None);
        assert_eq!(coordinator.rolled_back_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_transactions_expire() {
        let broker = ChangeCaptureBroker::new(8, Duration::from_secs(1));
        let coordinator = TransactionCoordinator::new(broker, Some(Duration::from_secs(30)));
        let registry = CatalogRegistry::new();
        let catalog = registry.define("products").unwrap();
        let writer = session(&catalog, SessionMode::READ_WRITE);

        let tx = coordinator.open(&writer).unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(coordinator.expire_stale(Instant::now()).is_empty());
        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(coordinator.expire_stale(Instant::now()), vec![tx.transaction_id]);
        assert!(!coordinator.is_open(tx.transaction_id));
    }
}
