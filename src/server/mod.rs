//! Process assembly: settings, registry, backend and service wired together.

mod builder;
#[allow(clippy::module_inception)]
mod server;

pub use builder::*;
pub use server::*;
