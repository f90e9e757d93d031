use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::debug;
use tokio::sync::mpsc::{Receiver, Sender};
use uuid::Uuid;

use super::broker::ChangeCaptureBroker;
use super::filter::ChangeCaptureFilter;
use super::types::{ChangeCaptureEvent, SubscriptionEnd};
use crate::error_handling::types::CaptureError;

/// End reason shared between the broker-side entry and the receiving stream.
///
/// The first recorded reason wins; later attempts are ignored.
#[derive(Debug, Default)]
pub(crate) struct EndSignal(Mutex<Option<SubscriptionEnd>>);

impl EndSignal {
    pub(crate) fn set(&self, reason: SubscriptionEnd) -> bool {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
            true
        } else {
            false
        }
    }

    pub(crate) fn get(&self) -> Option<SubscriptionEnd> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Broker-side state of one subscription.
pub(crate) struct SubscriptionEntry {
    pub(crate) id: Uuid,
    pub(crate) session_id: Uuid,
    pub(crate) catalog: String,
    pub(crate) filter: ChangeCaptureFilter,
    /// First sequence number this subscription may observe.
    pub(crate) since_sequence: u64,
    pub(crate) sender: Sender<ChangeCaptureEvent>,
    pub(crate) end: Arc<EndSignal>,
    /// Last delivered sequence; `0` while nothing was delivered yet.
    pub(crate) cursor: Arc<AtomicU64>,
}

impl SubscriptionEntry {
    pub(crate) fn last_delivered(&self) -> Option<u64> {
        match self.cursor.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }
}

/// Receiving end of a change capture subscription.
///
/// The stream yields events in commit order. It ends with `None` after a regular
/// unsubscription, or with one terminal error when the broker evicted the subscriber or its
/// session went away. Dropping the stream unsubscribes, so a client aborting the RPC releases
/// the queue on every exit path.
pub struct ChangeCaptureStream {
    id: Uuid,
    session_id: Uuid,
    since_sequence: u64,
    receiver: Receiver<ChangeCaptureEvent>,
    end: Arc<EndSignal>,
    broker: Weak<ChangeCaptureBroker>,
    finished: bool,
}

impl ChangeCaptureStream {
    pub(crate) fn new(
        id: Uuid,
        session_id: Uuid,
        since_sequence: u64,
        receiver: Receiver<ChangeCaptureEvent>,
        end: Arc<EndSignal>,
        broker: Weak<ChangeCaptureBroker>,
    ) -> Self {
        Self {
            id,
            session_id,
            since_sequence,
            receiver,
            end,
            broker,
            finished: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Sequence number from which mutations are delivered.
    pub fn since_sequence(&self) -> u64 {
        self.since_sequence
    }

    /// Waits for the next event.
    pub async fn next(&mut self) -> Option<Result<ChangeCaptureEvent, CaptureError>> {
        if self.finished {
            return None;
        }
        match self.receiver.recv().await {
            Some(event) => Some(Ok(event)),
            None => {
                self.finished = true;
                self.terminal_error().map(Err)
            }
        }
    }

    /// Returns an already queued event without waiting.
    pub fn try_next(&mut self) -> Option<ChangeCaptureEvent> {
        self.receiver.try_recv().ok()
    }

    fn terminal_error(&self) -> Option<CaptureError> {
        match self.end.get() {
            Some(SubscriptionEnd::Unsubscribed) | None => None,
            Some(SubscriptionEnd::Evicted) => Some(CaptureError::Evicted(self.id)),
            Some(SubscriptionEnd::SessionTerminated) | Some(SubscriptionEnd::CatalogRemoved) => {
                Some(CaptureError::Cancelled(self.id))
            }
        }
    }

    pub fn end_reason(&self) -> Option<SubscriptionEnd> {
        self.end.get()
    }
}

impl Drop for ChangeCaptureStream {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            if broker.unsubscribe(self.id) {
                debug!("[{}] subscription released by dropped stream", self.id);
            }
        }
    }
}
