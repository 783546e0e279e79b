//! Change publisher
//!
//! ```text
//! write_cas / delete_cas (entry lock held)
//!   └─> publish() -> queue.send(Dispatch::Event)      [never blocks]
//! watch_list (bucket commit gate held exclusively)
//!   └─> enqueue() -> queue.send(Dispatch::Register)
//!                          ↓
//! run(): queue.recv() -> lookup in DashMap -> try_send(per-subscriber channel)
//! ```
//!
//! The queue is unbounded so writers never wait on delivery and nothing is
//! dropped between commit and dispatch. Backpressure lives only in the
//! bounded per-subscriber channels: a full channel closes that subscriber
//! with [`CloseReason::Lagged`] instead of skipping events silently.

use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::subscription::Subscriber;
use super::subscription::SubscriptionId;
use crate::metrics::ACTIVE_SUBSCRIPTIONS;
use crate::metrics::CLOSED_SUBSCRIPTIONS;
use crate::metrics::DELIVERED_EVENTS;
use crate::ChangeEvent;
use crate::CloseReason;
use crate::ResourceId;
use crate::ResourceType;
use crate::Result;
use crate::StoreError;
use crate::StoreKey;
use crate::Tenancy;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Bucket key of the subscriber index. Name prefixes are checked per
/// subscriber inside the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct WatchKey {
    pub(crate) resource_type: ResourceType,
    pub(crate) tenancy: Tenancy,
}

impl WatchKey {
    pub(crate) fn of(id: &ResourceId) -> Self {
        Self {
            resource_type: id.resource_type.clone(),
            tenancy: id.tenancy.clone(),
        }
    }

    pub(crate) fn of_key(key: &StoreKey) -> Self {
        Self {
            resource_type: key.resource_type.clone(),
            tenancy: key.tenancy.clone(),
        }
    }
}

pub(crate) enum Dispatch {
    Event(ChangeEvent),
    Register(Subscriber),
}

pub(crate) struct Publisher {
    queue_tx: mpsc::UnboundedSender<Dispatch>,

    /// Taken by the first `run`
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Dispatch>>>,

    /// Subscribers grouped by (type, tenancy)
    subscribers: DashMap<WatchKey, Vec<Subscriber>>,

    state: AtomicU8,
}

impl std::fmt::Debug for Publisher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.subscriber_count())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub(crate) fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            subscribers: DashMap::new(),
            state: AtomicU8::new(IDLE),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    /// Queues a committed change. Must be called while the writer still
    /// holds the key's entry lock so queue order matches commit order.
    pub(crate) fn publish(
        &self,
        event: ChangeEvent,
    ) {
        if self.is_stopped() {
            return;
        }
        // Only fails once the dispatch loop has closed the queue
        let _ = self.queue_tx.send(Dispatch::Event(event));
    }

    /// Queues a subscriber behind every event published so far.
    pub(crate) fn enqueue(
        &self,
        subscriber: Subscriber,
    ) -> Result<()> {
        if self.is_stopped() {
            return Err(StoreError::SubscriptionClosed(CloseReason::Shutdown).into());
        }
        self.queue_tx
            .send(Dispatch::Register(subscriber))
            .map_err(|_| StoreError::SubscriptionClosed(CloseReason::Shutdown).into())
    }

    /// Removes one subscriber, recording why. Empty buckets are dropped in
    /// the same atomic step so a concurrent attach cannot be lost.
    pub(crate) fn unregister(
        &self,
        key: &WatchKey,
        id: SubscriptionId,
        reason: CloseReason,
    ) {
        self.subscribers.remove_if_mut(key, |_key, bucket| {
            if let Some(pos) = bucket.iter().position(|s| s.id == id) {
                let subscriber = bucket.swap_remove(pos);
                Self::release(subscriber, reason);
            }
            bucket.is_empty()
        });
    }

    /// Drives dispatch until `shutdown` is cancelled.
    ///
    /// On exit every attached subscriber, and every registration still
    /// queued, is closed with [`CloseReason::Shutdown`].
    pub(crate) async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut queue = self.queue_rx.lock().take().ok_or(StoreError::DispatcherAlreadyRunning)?;
        self.state.store(RUNNING, Ordering::Release);
        info!("Change publisher started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Change publisher received shutdown signal");
                    break;
                }
                next = queue.recv() => match next {
                    Some(Dispatch::Event(event)) => self.dispatch(event),
                    Some(Dispatch::Register(subscriber)) => self.attach(subscriber),
                    None => break,
                },
            }
        }

        self.state.store(STOPPED, Ordering::Release);
        queue.close();
        let mut abandoned = 0usize;
        while let Ok(pending) = queue.try_recv() {
            match pending {
                Dispatch::Register(subscriber) => {
                    subscriber.state.close(CloseReason::Shutdown);
                }
                Dispatch::Event(_) => abandoned += 1,
            }
        }
        self.close_all(CloseReason::Shutdown);

        info!(abandoned_events = abandoned, "Change publisher stopped");
        Ok(())
    }

    fn attach(
        &self,
        subscriber: Subscriber,
    ) {
        let key = subscriber.key.clone();
        let mut bucket = self.subscribers.entry(key.clone()).or_default();

        // Checked under the bucket lock: the release task either already ran
        // (we skip) or will find the subscriber once we let go.
        if subscriber.token.is_cancelled() {
            subscriber.state.close(CloseReason::Cancelled);
            drop(bucket);
            self.subscribers.remove_if(&key, |_, bucket| bucket.is_empty());
            return;
        }

        trace!(
            subscription_id = subscriber.id,
            resource_type = %key.resource_type,
            tenancy = %key.tenancy,
            name_prefix = %subscriber.name_prefix,
            "Subscriber attached"
        );
        bucket.push(subscriber);
        ACTIVE_SUBSCRIPTIONS.inc();
    }

    fn dispatch(
        &self,
        event: ChangeEvent,
    ) {
        let key = WatchKey::of(&event.resource.id);

        // Clone the senders out so no index lock is held while sending
        let targets: Vec<_> = match self.subscribers.get(&key) {
            Some(bucket) => bucket
                .iter()
                .filter(|s| event.resource.id.name.starts_with(&s.name_prefix))
                .map(|s| (s.id, s.sender.clone(), s.token.clone()))
                .collect(),
            None => return,
        };

        trace!(
            name = %event.resource.id.name,
            operation = ?event.operation,
            subscribers = targets.len(),
            "Dispatching event"
        );

        for (id, sender, token) in targets {
            match sender.try_send(event.clone()) {
                Ok(()) => DELIVERED_EVENTS.inc(),
                // The consumer already left; its release task has not run yet
                Err(TrySendError::Full(_)) if token.is_cancelled() => {
                    self.unregister(&key, id, CloseReason::Cancelled);
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscription_id = id, "Subscriber buffer full, closing as lagged");
                    self.unregister(&key, id, CloseReason::Lagged);
                }
                Err(TrySendError::Closed(_)) => {
                    self.unregister(&key, id, CloseReason::Cancelled);
                }
            }
        }
    }

    fn close_all(
        &self,
        reason: CloseReason,
    ) {
        self.subscribers.retain(|_key, bucket| {
            for subscriber in bucket.drain(..) {
                Self::release(subscriber, reason);
            }
            false
        });
    }

    fn release(
        subscriber: Subscriber,
        reason: CloseReason,
    ) {
        // Record the reason before the sender is dropped so the consumer
        // sees it when its channel reports closed.
        subscriber.state.close(reason);
        ACTIVE_SUBSCRIPTIONS.dec();
        CLOSED_SUBSCRIPTIONS.with_label_values(&[reason.as_str()]).inc();
        debug!(subscription_id = subscriber.id, %reason, "Subscriber released");
    }

    #[cfg(test)]
    pub(crate) fn queue_taken(&self) -> bool {
        self.queue_rx.lock().is_none()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.iter().map(|bucket| bucket.len()).sum()
    }

    pub(crate) fn watched_key_count(&self) -> usize {
        self.subscribers.len()
    }
}
