use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::storage::inmem::SubscriptionState;
use crate::ChangeEvent;
use crate::InMemBackend;
use crate::Registration;
use crate::Registry;
use crate::Resource;
use crate::ResourceId;
use crate::ResourceType;
use crate::Result;
use crate::Subscription;
use crate::Tenancy;
use crate::WatchConfig;
use crate::WatchFilter;

pub(crate) const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn artist_type() -> ResourceType {
    ResourceType::new("demo", "v2", "Artist")
}

pub(crate) fn album_type() -> ResourceType {
    ResourceType::new("demo", "v2", "Album")
}

/// Never registered by [`test_registry`]
pub(crate) fn concert_type() -> ResourceType {
    ResourceType::new("demo", "v2", "Concert")
}

pub(crate) fn local_tenancy() -> Tenancy {
    Tenancy::new("default", "default", "")
}

pub(crate) fn test_registry() -> Arc<Registry> {
    let registry = Registry::new();
    registry.register(Registration::new(artist_type())).unwrap();
    registry.register(Registration::new(album_type())).unwrap();
    Arc::new(registry)
}

pub(crate) fn artist(name: &str) -> Resource {
    Resource::new(ResourceId::new(name, artist_type(), local_tenancy())).with_data(format!("artist {name}"))
}

pub(crate) fn artist_filter(name_prefix: &str) -> WatchFilter {
    WatchFilter::new(artist_type(), local_tenancy(), name_prefix)
}

pub(crate) fn test_backend(subscription_buffer_size: usize) -> InMemBackend {
    InMemBackend::new(
        test_registry(),
        WatchConfig {
            subscription_buffer_size,
            ..Default::default()
        },
    )
}

/// Backend with its dispatch loop already spawned.
pub(crate) fn running_backend(
    subscription_buffer_size: usize
) -> (InMemBackend, CancellationToken, JoinHandle<Result<()>>) {
    let backend = test_backend(subscription_buffer_size);
    let shutdown = CancellationToken::new();
    let handle = {
        let backend = backend.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { backend.run(shutdown).await })
    };
    (backend, shutdown, handle)
}

pub(crate) async fn must_recv(subscription: &mut Subscription) -> ChangeEvent {
    timeout(RECV_TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription failed")
        .expect("subscription ended")
}

/// Polls `condition` until it holds or the receive timeout elapses.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    timeout(RECV_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A subscription fed by a hand-held sender, for tests that mock the backend.
pub(crate) fn detached_subscription(
    filter: WatchFilter,
    capacity: usize,
) -> (Subscription, mpsc::Sender<ChangeEvent>, Arc<SubscriptionState>) {
    let (sender, receiver) = mpsc::channel(capacity);
    let state = Arc::new(SubscriptionState::default());
    let subscription = Subscription::new(0, filter, receiver, state.clone(), CancellationToken::new());
    (subscription, sender, state)
}
