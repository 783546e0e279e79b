//! Watch subscriptions
//!
//! A [`Subscription`] is the consumer half of one registration. The
//! publisher keeps the matching [`Subscriber`] (the sending half) in its
//! index until the subscription is cancelled, dropped, falls behind, or the
//! dispatch loop stops.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::publisher::WatchKey;
use crate::ChangeEvent;
use crate::CloseReason;
use crate::Result;
use crate::StoreError;
use crate::WatchFilter;

pub type SubscriptionId = u64;

/// Close reason shared between the publisher and the consumer. The first
/// reason recorded wins.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionState {
    closed: Mutex<Option<CloseReason>>,
}

impl SubscriptionState {
    pub(crate) fn close(
        &self,
        reason: CloseReason,
    ) -> bool {
        let mut closed = self.closed.lock();
        if closed.is_some() {
            return false;
        }
        *closed = Some(reason);
        true
    }

    pub(crate) fn reason(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }
}

/// Publisher-side registration record.
#[derive(Debug)]
pub(crate) struct Subscriber {
    pub(crate) id: SubscriptionId,
    pub(crate) key: WatchKey,
    pub(crate) name_prefix: String,
    pub(crate) sender: mpsc::Sender<ChangeEvent>,
    pub(crate) state: Arc<SubscriptionState>,
    pub(crate) token: CancellationToken,
}

/// Handle for a registered watch
///
/// Events arrive in commit order per key. The subscription is released when
/// its token (a child of the caller's) is cancelled or the handle is dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    filter: WatchFilter,
    receiver: mpsc::Receiver<ChangeEvent>,
    state: Arc<SubscriptionState>,
    token: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        filter: WatchFilter,
        receiver: mpsc::Receiver<ChangeEvent>,
        state: Arc<SubscriptionState>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            filter,
            receiver,
            state,
            token,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn filter(&self) -> &WatchFilter {
        &self.filter
    }

    /// Waits for the next event.
    ///
    /// - `Ok(Some(event))`: next event in order
    /// - `Ok(None)`: the subscription was cancelled; nothing more is yielded
    ///   once cancellation is observed, even if events were buffered
    /// - `Err(SubscriptionClosed(Lagged | Shutdown))`: the publisher tore the
    ///   channel down after everything buffered was consumed
    pub async fn recv(&mut self) -> Result<Option<ChangeEvent>> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Ok(None),
            event = self.receiver.recv() => match event {
                Some(event) => Ok(Some(event)),
                None => self.closed(),
            },
        }
    }

    /// Cancels this subscription only; the caller's token is untouched.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.reason()
    }

    fn closed(&self) -> Result<Option<ChangeEvent>> {
        match self.state.reason() {
            Some(reason @ (CloseReason::Lagged | CloseReason::Shutdown)) => {
                Err(StoreError::SubscriptionClosed(reason).into())
            }
            Some(CloseReason::Cancelled) | None => Ok(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // wakes the release task spawned at registration
        self.token.cancel();
    }
}
