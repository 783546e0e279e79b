//! In-memory backend
//!
//! Committed resources live in a [`DashMap`] keyed by [`StoreKey`]; the
//! entry lock of a key covers read-check-commit-publish, so writes to one key
//! are serialized while distinct keys proceed in parallel.
//!
//! Every (type, tenancy) bucket has its own commit gate. Writers hold the
//! shared side of their bucket's gate; `watch_list` takes the gate of the
//! filter's bucket exclusively while it snapshots matching resources and
//! queues its registration. Registration is therefore atomic with respect to
//! the commit order of the only bucket it can receive events from: every
//! write either lands in the snapshot or is delivered live, never both and
//! never neither. Writers in other buckets are never held up.
//!
//! A sorted name index per bucket keeps snapshots and listings from
//! scanning the whole table.

mod publisher;
mod subscription;

pub(crate) use publisher::WatchKey;
pub(crate) use subscription::SubscriptionState;
pub use subscription::Subscription;
pub use subscription::SubscriptionId;


use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nanoid::nanoid;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tracing::debug;
use tracing::trace;

use self::publisher::Publisher;
use self::subscription::Subscriber;
use super::Backend;
use crate::metrics::CAS_CONFLICTS;
use crate::metrics::COMMITTED_WRITES;
use crate::ChangeEvent;
use crate::CloseReason;
use crate::Error;
use crate::Registry;
use crate::Resource;
use crate::ResourceId;
use crate::Result;
use crate::StoreError;
use crate::StoreKey;
use crate::WatchConfig;
use crate::WatchFilter;

/// Cheap to clone; clones share one table and one publisher.
#[derive(Debug, Clone)]
pub struct InMemBackend {
    inner: Arc<BackendInner>,
}

#[derive(Debug)]
struct BackendInner {
    registry: Arc<Registry>,
    table: DashMap<StoreKey, Resource>,

    /// Names of live resources per bucket. Updated under the key's entry lock
    names: DashMap<WatchKey, BTreeSet<String>>,

    /// Per bucket: shared by writers, exclusive for watch registration
    commit_gates: DashMap<WatchKey, Arc<RwLock<()>>>,

    /// Last version handed out; the first commit gets "1"
    last_version: AtomicU64,
    last_subscription_id: AtomicU64,

    publisher: Publisher,
    config: WatchConfig,
}

impl InMemBackend {
    pub fn new(
        registry: Arc<Registry>,
        config: WatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                registry,
                table: DashMap::new(),
                names: DashMap::new(),
                commit_gates: DashMap::new(),
                last_version: AtomicU64::new(0),
                last_subscription_id: AtomicU64::new(0),
                publisher: Publisher::new(),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Runs the change publisher until `shutdown` is cancelled.
    ///
    /// May only be called once per backend. Writes keep working before, during
    /// and after the loop; events are queued until it starts.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.inner.publisher.run(shutdown).await
    }

    /// True while a `run` loop owns the publisher.
    pub fn is_running(&self) -> bool {
        self.inner.publisher.is_running()
    }

    /// Subscriptions currently attached to the publisher.
    pub fn subscription_count(&self) -> usize {
        self.inner.publisher.subscriber_count()
    }

    /// Distinct (type, tenancy) pairs with at least one subscriber.
    pub fn watched_key_count(&self) -> usize {
        self.inner.publisher.watched_key_count()
    }

    /// Number of live resources across every type and tenancy.
    pub fn len(&self) -> usize {
        self.inner.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.is_empty()
    }

    fn next_version(&self) -> String {
        (self.inner.last_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn commit_gate(
        &self,
        key: &WatchKey,
    ) -> Arc<RwLock<()>> {
        if let Some(gate) = self.inner.commit_gates.get(key) {
            return gate.clone();
        }
        self.inner.commit_gates.entry(key.clone()).or_default().clone()
    }

    /// Resources matching `filter`, ordered by name. Only the filter's bucket
    /// is visited.
    fn snapshot(
        &self,
        filter: &WatchFilter,
    ) -> Vec<Resource> {
        let bucket = WatchKey {
            resource_type: filter.resource_type.clone(),
            tenancy: filter.tenancy.clone(),
        };
        // Copied out so the index shard is not held while the table is read
        let names: Vec<String> = match self.inner.names.get(&bucket) {
            Some(names) => names
                .range::<str, _>((Bound::Included(filter.name_prefix.as_str()), Bound::Unbounded))
                .take_while(|name| name.starts_with(&filter.name_prefix))
                .cloned()
                .collect(),
            None => return Vec::new(),
        };

        names
            .into_iter()
            .filter_map(|name| {
                let key = StoreKey {
                    resource_type: bucket.resource_type.clone(),
                    tenancy: bucket.tenancy.clone(),
                    name,
                };
                self.inner.table.get(&key).map(|entry| entry.value().clone())
            })
            .collect()
    }

    fn index_insert(
        &self,
        key: &StoreKey,
    ) {
        self.inner
            .names
            .entry(WatchKey::of_key(key))
            .or_default()
            .insert(key.name.clone());
    }

    fn index_remove(
        &self,
        key: &StoreKey,
    ) {
        self.inner.names.remove_if_mut(&WatchKey::of_key(key), |_, names| {
            names.remove(&key.name);
            names.is_empty()
        });
    }

    fn conflict(
        key: StoreKey,
        expected: &str,
        actual: Option<String>,
    ) -> Error {
        CAS_CONFLICTS.inc();
        debug!(%key, expected, ?actual, "CAS conflict");
        StoreError::CasConflict {
            key,
            expected: expected.to_string(),
            actual,
        }
        .into()
    }

    fn spawn_release(
        inner: Weak<BackendInner>,
        key: WatchKey,
        id: SubscriptionId,
        token: CancellationToken,
    ) {
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(inner) = inner.upgrade() {
                inner.publisher.unregister(&key, id, CloseReason::Cancelled);
            }
        });
    }
}

#[async_trait]
impl Backend for InMemBackend {
    fn read(
        &self,
        id: &ResourceId,
    ) -> Result<Option<Resource>> {
        self.inner.registry.require(&id.resource_type)?;

        let found = self.inner.table.get(&id.key()).map(|entry| entry.value().clone());
        Ok(found.filter(|resource| id.uid.is_empty() || resource.id.uid == id.uid))
    }

    fn write_cas(
        &self,
        mut resource: Resource,
        expected_version: &str,
    ) -> Result<Resource> {
        self.inner.registry.require(&resource.id.resource_type)?;
        if resource.id.name.is_empty() {
            return Err(StoreError::InvalidResource("resource name must not be empty".into()).into());
        }

        let gate = self.commit_gate(&WatchKey::of(&resource.id));
        let _gate = gate.read();
        match self.inner.table.entry(resource.id.key()) {
            Entry::Occupied(mut slot) => {
                let stored = slot.get();
                if stored.version != expected_version {
                    return Err(Self::conflict(
                        slot.key().clone(),
                        expected_version,
                        Some(stored.version.clone()),
                    ));
                }
                if resource.id.uid.is_empty() {
                    resource.id.uid = stored.id.uid.clone();
                }
                resource.version = self.next_version();

                slot.insert(resource.clone());
                self.inner.publisher.publish(ChangeEvent::upsert(resource.clone()));
                trace!(key = %slot.key(), version = %resource.version, "Resource updated");
            }
            Entry::Vacant(slot) => {
                if !expected_version.is_empty() {
                    return Err(Self::conflict(slot.key().clone(), expected_version, None));
                }
                if resource.id.uid.is_empty() {
                    resource.id.uid = nanoid!();
                }
                resource.version = self.next_version();

                let committed = slot.insert(resource.clone());
                self.index_insert(committed.key());
                self.inner.publisher.publish(ChangeEvent::upsert(resource.clone()));
                trace!(key = %committed.key(), version = %resource.version, "Resource created");
            }
        }

        COMMITTED_WRITES.with_label_values(&["upsert"]).inc();
        Ok(resource)
    }

    fn delete_cas(
        &self,
        id: &ResourceId,
        expected_version: &str,
    ) -> Result<()> {
        self.inner.registry.require(&id.resource_type)?;

        let gate = self.commit_gate(&WatchKey::of(id));
        let _gate = gate.read();
        match self.inner.table.entry(id.key()) {
            Entry::Vacant(slot) => {
                trace!(key = %slot.key(), "Delete of missing resource ignored");
                Ok(())
            }
            Entry::Occupied(slot) => {
                let stored = slot.get();
                if !id.uid.is_empty() && stored.id.uid != id.uid {
                    trace!(key = %slot.key(), "Delete of replaced resource ignored");
                    return Ok(());
                }
                if stored.version != expected_version {
                    return Err(Self::conflict(
                        slot.key().clone(),
                        expected_version,
                        Some(stored.version.clone()),
                    ));
                }

                self.inner.publisher.publish(ChangeEvent::delete(stored.clone()));
                // Still under the entry lock so a racing create of the same
                // name cannot have its index entry removed
                self.index_remove(slot.key());
                let (key, _) = slot.remove_entry();
                trace!(%key, "Resource deleted");

                COMMITTED_WRITES.with_label_values(&["delete"]).inc();
                Ok(())
            }
        }
    }

    fn list(
        &self,
        filter: &WatchFilter,
    ) -> Result<Vec<Resource>> {
        self.inner.registry.require(&filter.resource_type)?;
        Ok(self.snapshot(filter))
    }

    async fn watch_list(
        &self,
        filter: WatchFilter,
        cancel: CancellationToken,
    ) -> Result<Subscription> {
        self.inner.registry.require(&filter.resource_type)?;
        if self.inner.publisher.is_stopped() {
            return Err(StoreError::SubscriptionClosed(CloseReason::Shutdown).into());
        }

        let id = self.inner.last_subscription_id.fetch_add(1, Ordering::Relaxed) + 1;
        let key = WatchKey {
            resource_type: filter.resource_type.clone(),
            tenancy: filter.tenancy.clone(),
        };
        let token = cancel.child_token();
        let state = Arc::new(SubscriptionState::default());

        let receiver = {
            let gate = self.commit_gate(&key);
            let _gate = gate.write();

            let current = self.snapshot(&filter);
            let capacity = self.inner.config.subscription_buffer_size.max(1) + current.len();
            let (sender, receiver) = mpsc::channel(capacity);
            for resource in current {
                sender
                    .try_send(ChangeEvent::upsert(resource))
                    .map_err(|e| Error::Fatal(format!("snapshot exceeded subscription capacity: {e}")))?;
            }

            self.inner.publisher.enqueue(Subscriber {
                id,
                key: key.clone(),
                name_prefix: filter.name_prefix.clone(),
                sender,
                state: state.clone(),
                token: token.clone(),
            })?;
            receiver
        };

        Self::spawn_release(Arc::downgrade(&self.inner), key, id, token.clone());

        debug!(
            subscription_id = id,
            resource_type = %filter.resource_type,
            tenancy = %filter.tenancy,
            name_prefix = %filter.name_prefix,
            "Subscription registered"
        );
        Ok(Subscription::new(id, filter, receiver, state, token))
    }
}
