use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc::{self, error::SendTimeoutError, Sender};
use uuid::Uuid;

use super::filter::ChangeCaptureFilter;
use super::subscription::{ChangeCaptureStream, EndSignal, SubscriptionEntry};
use super::types::{
    CaptureContent, ChangeCaptureEvent, Mutation, SubscriptionEnd, SubscriptionInfo,
};
use crate::error_handling::types::CaptureError;

#[derive(Default)]
struct BrokerState {
    subscriptions: HashMap<Uuid, SubscriptionEntry>,
    /// Highest sequence handed to `publish` per catalog.
    last_published: HashMap<String, u64>,
}

/// Result of fanning one committed transaction out to subscribers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub matched_subscriptions: usize,
    pub delivered_events: usize,
    pub evicted: Vec<Uuid>,
}

enum DeliveryOutcome {
    Delivered(usize),
    Evicted,
    Closed,
}

struct Target {
    id: Uuid,
    filter: ChangeCaptureFilter,
    sender: Sender<ChangeCaptureEvent>,
    cursor: Arc<AtomicU64>,
}

/// Fans committed mutations out to change capture subscribers.
///
/// Every subscription owns a bounded FIFO queue. Publishing waits for queue space up to the
/// slow-consumer timeout and then drops the subscriber instead of stalling the catalog's
/// commits. Subscribers are served concurrently; events for one subscriber are enqueued in
/// mutation order, and since the coordinator publishes under the catalog commit lock, every
/// subscriber observes strictly increasing sequence numbers.
pub struct ChangeCaptureBroker {
    state: Mutex<BrokerState>,
    queue_capacity: usize,
    slow_consumer_timeout: Duration,
}

impl ChangeCaptureBroker {
    pub fn new(queue_capacity: usize, slow_consumer_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
            queue_capacity: queue_capacity.max(1),
            slow_consumer_timeout,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a subscription on `catalog`.
    ///
    /// `catalog_version` is the catalog's committed version as seen by the caller; the
    /// subscription observes only mutations committed after both it and anything already
    /// published.
    pub fn subscribe(
        self: &Arc<Self>,
        session_id: Uuid,
        catalog: &str,
        catalog_version: u64,
        filter: ChangeCaptureFilter,
    ) -> Result<ChangeCaptureStream, CaptureError> {
        filter.validate()?;
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        let end = Arc::new(EndSignal::default());

        let since_sequence = {
            let mut state = self.lock_state();
            let published = state.last_published.get(catalog).copied().unwrap_or(0);
            let since = published.max(catalog_version) + 1;
            state.subscriptions.insert(
                id,
                SubscriptionEntry {
                    id,
                    session_id,
                    catalog: catalog.to_string(),
                    filter,
                    since_sequence: since,
                    sender,
                    end: Arc::clone(&end),
                    cursor: Arc::new(AtomicU64::new(0)),
                },
            );
            since
        };

        info!(
            "[{}] change capture subscription registered on `{}` for session {} (since sequence {})",
            id, catalog, session_id, since_sequence
        );
        Ok(ChangeCaptureStream::new(
            id,
            session_id,
            since_sequence,
            receiver,
            end,
            Arc::downgrade(self),
        ))
    }

    /// Delivers the mutations of one committed transaction.
    ///
    /// Must be called in commit order per catalog (the transaction coordinator calls it while
    /// holding the catalog commit lock).
    pub async fn publish(
        &self,
        catalog: &str,
        sequence: u64,
        mutations: &[Mutation],
    ) -> PublishReport {
        let targets: Vec<Target> = {
            let mut state = self.lock_state();
            let last = state.last_published.entry(catalog.to_string()).or_insert(0);
            if sequence > *last {
                *last = sequence;
            }
            state
                .subscriptions
                .values()
                .filter(|s| s.catalog == catalog && s.since_sequence <= sequence)
                .filter(|s| mutations.iter().any(|m| s.filter.matches(m)))
                .map(|s| Target {
                    id: s.id,
                    filter: s.filter.clone(),
                    sender: s.sender.clone(),
                    cursor: Arc::clone(&s.cursor),
                })
                .collect()
        };

        let mut report = PublishReport {
            matched_subscriptions: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            trace!("No subscriber matched sequence {} of `{}`", sequence, catalog);
            return report;
        }

        let deliveries = targets.into_iter().map(|target| async move {
            let outcome = self.deliver(&target, catalog, sequence, mutations).await;
            (target.id, outcome)
        });

        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                DeliveryOutcome::Delivered(n) => report.delivered_events += n,
                DeliveryOutcome::Evicted => {
                    warn!(
                        "[{}] subscriber did not drain its queue within {:?}, evicting",
                        id, self.slow_consumer_timeout
                    );
                    self.remove(id, SubscriptionEnd::Evicted);
                    report.evicted.push(id);
                }
                DeliveryOutcome::Closed => {
                    debug!("[{}] subscriber stream already closed", id);
                    self.remove(id, SubscriptionEnd::Unsubscribed);
                }
            }
        }

        debug!(
            "Published sequence {} of `{}`: {} subscriber(s), {} event(s), {} evicted",
            sequence,
            catalog,
            report.matched_subscriptions,
            report.delivered_events,
            report.evicted.len()
        );
        report
    }

    async fn deliver(
        &self,
        target: &Target,
        catalog: &str,
        sequence: u64,
        mutations: &[Mutation],
    ) -> DeliveryOutcome {
        let mut delivered = 0;
        for (index, mutation) in mutations.iter().enumerate() {
            if !target.filter.matches(mutation) {
                continue;
            }
            let event = ChangeCaptureEvent {
                subscription_id: target.id,
                catalog: catalog.to_string(),
                sequence,
                index: index as u32,
                entity_type: mutation.entity_type.clone(),
                primary_key: mutation.primary_key,
                classifier: mutation.classifier,
                operation: mutation.operation,
                body: match target.filter.content {
                    CaptureContent::Body => mutation.body.clone(),
                    CaptureContent::Header => None,
                },
            };
            match target
                .sender
                .send_timeout(event, self.slow_consumer_timeout)
                .await
            {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => return DeliveryOutcome::Evicted,
                Err(SendTimeoutError::Closed(_)) => return DeliveryOutcome::Closed,
            }
        }
        if delivered > 0 {
            target.cursor.store(sequence, Ordering::Release);
            trace!("[{}] delivered {} event(s) of sequence {}", target.id, delivered, sequence);
        }
        DeliveryOutcome::Delivered(delivered)
    }

    fn remove(&self, id: Uuid, reason: SubscriptionEnd) -> bool {
        let entry = self.lock_state().subscriptions.remove(&id);
        match entry {
            Some(entry) => {
                entry.end.set(reason);
                info!("[{}] change capture subscription ended: {:?}", id, reason);
                true
            }
            None => false,
        }
    }

    /// Ends a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.remove(id, SubscriptionEnd::Unsubscribed)
    }

    /// Ends a subscription on behalf of its owning session.
    pub fn unsubscribe_owned(&self, session_id: Uuid, id: Uuid) -> Result<bool, CaptureError> {
        {
            let state = self.lock_state();
            match state.subscriptions.get(&id) {
                Some(entry) if entry.session_id != session_id => {
                    return Err(CaptureError::SubscriptionNotFound(id));
                }
                Some(_) => {}
                None => return Ok(false),
            }
        }
        Ok(self.unsubscribe(id))
    }

    fn remove_where<F>(&self, predicate: F, reason: SubscriptionEnd) -> usize
    where
        F: Fn(&SubscriptionEntry) -> bool,
    {
        let removed: Vec<SubscriptionEntry> = {
            let mut state = self.lock_state();
            let ids: Vec<Uuid> = state
                .subscriptions
                .values()
                .filter(|s| predicate(s))
                .map(|s| s.id)
                .collect();
            ids.iter()
                .filter_map(|id| state.subscriptions.remove(id))
                .collect()
        };
        for entry in &removed {
            entry.end.set(reason);
            debug!("[{}] change capture subscription ended: {:?}", entry.id, reason);
        }
        removed.len()
    }

    /// Drops every subscription owned by a terminated session.
    pub fn release_session(&self, session_id: Uuid) -> usize {
        self.remove_where(|s| s.session_id == session_id, SubscriptionEnd::SessionTerminated)
    }

    /// Drops every subscription on a deleted, renamed or replaced catalog.
    pub fn release_catalog(&self, catalog: &str) -> usize {
        let removed = self.remove_where(|s| s.catalog == catalog, SubscriptionEnd::CatalogRemoved);
        self.lock_state().last_published.remove(catalog);
        removed
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().subscriptions.len()
    }

    pub fn subscriptions_for_catalog(&self, catalog: &str) -> Vec<SubscriptionInfo> {
        let state = self.lock_state();
        let mut infos: Vec<SubscriptionInfo> = state
            .subscriptions
            .values()
            .filter(|s| s.catalog == catalog)
            .map(|s| SubscriptionInfo {
                id: s.id,
                session_id: s.session_id,
                catalog: s.catalog.clone(),
                since_sequence: s.since_sequence,
                last_delivered_sequence: s.last_delivered(),
            })
            .collect();
        infos.sort_by_key(|i| i.since_sequence);
        infos
    }
}
