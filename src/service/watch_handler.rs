//! Watch stream handler
//!
//! ```text
//! Backend -> Subscription.recv() -> WatchStreamHandler -> response channel -> client stream
//! ```
//!
//! One handler owns one subscription. Dropping the handler (on any exit path)
//! drops the subscription, which releases it from the publisher.

use tokio::sync::mpsc;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::WatchListResponse;
use crate::StoreError;
use crate::Subscription;
use crate::SubscriptionId;
use crate::WatchFilter;

pub struct WatchStreamHandler {
    subscription: Subscription,
}

impl WatchStreamHandler {
    pub fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    pub fn filter(&self) -> &WatchFilter {
        self.subscription.filter()
    }

    /// Forwards events until the client goes away or the subscription ends.
    ///
    /// Client disconnect, cancellation and a closed subscription all end the
    /// stream without a trailing error. Any other failure is sent as the final
    /// item.
    pub async fn run(
        mut self,
        response_sender: mpsc::Sender<Result<WatchListResponse, Status>>,
    ) {
        let subscription_id = self.subscription.id();
        info!(
            subscription_id,
            resource_type = %self.subscription.filter().resource_type,
            tenancy = %self.subscription.filter().tenancy,
            "Watch stream started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = response_sender.closed() => {
                    info!(subscription_id, "Watch stream client disconnected");
                    return;
                }
                next = self.subscription.recv() => next,
            };

            match next {
                Ok(Some(event)) => {
                    trace!(
                        subscription_id,
                        name = %event.resource.id.name,
                        operation = ?event.operation,
                        "Forwarding watch event"
                    );
                    if response_sender.send(Ok(event.into())).await.is_err() {
                        info!(subscription_id, "Watch stream client disconnected");
                        return;
                    }
                }
                Ok(None) => {
                    info!(subscription_id, "Watch stream ended (cancelled)");
                    return;
                }
                Err(e) => {
                    if let Some(StoreError::SubscriptionClosed(reason)) = e.as_store() {
                        info!(subscription_id, %reason, "Watch stream ended (subscription closed)");
                        return;
                    }
                    debug!(subscription_id, error = %e, "Watch stream failed");
                    let _ = response_sender.send(Err(e.into())).await;
                    return;
                }
            }
        }
    }
}
