//! Tenancy-scoped, versioned resource store.
//!
//! Resources are addressed by (type, tenancy, name) and written with
//! compare-and-swap on an opaque version. Every accepted write or delete is
//! published to live watch subscriptions filtered by type, tenancy and name
//! prefix, in commit order.
//!
//! ```text
//! ResourceService ─┬─> Registry (is this type known?)
//!                  └─> Backend ──> table (CAS per key)
//!                                └> Publisher ──> Subscription ──> WatchStreamHandler ──> client
//! ```

mod config;
mod errors;
pub mod metrics;
mod registry;
mod resource;
mod server;
mod service;
pub mod storage;
pub mod utils;

pub use config::*;
pub use errors::*;
pub use registry::*;
pub use resource::*;
pub use server::*;
pub use service::*;
pub use storage::*;
pub use utils::retry::write_with_retry;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
