//! Backend
//!
//! The resource table and everything attached to it:
//! - CAS-checked writes and deletes keyed by (Type, Tenancy, Name)
//! - Point reads and filtered listings
//! - Watch subscriptions fed by the change publisher
//!
//! [`Backend`] is the seam the service layer is written against;
//! [`InMemBackend`] is the only implementation.

pub mod inmem;

pub use inmem::InMemBackend;
pub use inmem::Subscription;
pub use inmem::SubscriptionId;

#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;

use crate::Resource;
use crate::ResourceId;
use crate::Result;
use crate::WatchFilter;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Latest committed value for the id's key.
    ///
    /// A non-empty `id.uid` that differs from the stored uid reads as absent.
    fn read(
        &self,
        id: &ResourceId,
    ) -> Result<Option<Resource>>;

    /// Commits `resource` when `expected_version` equals the stored version,
    /// or is empty and nothing is stored. Returns the committed copy.
    fn write_cas(
        &self,
        resource: Resource,
        expected_version: &str,
    ) -> Result<Resource>;

    /// Removes the resource when `expected_version` matches.
    ///
    /// Deleting a missing key, or a key now held by a different uid, is a
    /// no-op.
    fn delete_cas(
        &self,
        id: &ResourceId,
        expected_version: &str,
    ) -> Result<()>;

    /// Resources currently matching `filter`, ordered by name.
    fn list(
        &self,
        filter: &WatchFilter,
    ) -> Result<Vec<Resource>>;

    /// Registers a subscription bound to `cancel`.
    async fn watch_list(
        &self,
        filter: WatchFilter,
        cancel: CancellationToken,
    ) -> Result<Subscription>;
}
