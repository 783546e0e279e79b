//! Resource Store Error Hierarchy
//!
//! Errors are layered the same way everywhere in the crate: store-level
//! failures callers are expected to branch on live in [`StoreError`],
//! infrastructure failures of the hosting process live in [`SystemError`],
//! and both roll up into the crate-wide [`Error`].

use std::fmt;

use config::ConfigError;
use tokio::task::JoinError;

use crate::ResourceType;
use crate::StoreKey;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failures reported by the registry, the backend or a subscription
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Infrastructure-level failures of the hosting process
    #[error(transparent)]
    System(#[from] SystemError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Only CAS conflicts may succeed when retried after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(StoreError::CasConflict { .. }))
    }

    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Why a subscription stopped receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The consumer fell behind and its delivery buffer overflowed
    Lagged,
    /// The backend dispatch loop was stopped
    Shutdown,
    /// The owning context was cancelled or the handle dropped
    Cancelled,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Lagged => "lagged",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Request referenced a type the registry does not know about
    #[error("resource type {0} not registered")]
    TypeNotRegistered(ResourceType),

    #[error("resource type {0} already registered")]
    TypeAlreadyRegistered(ResourceType),

    /// The caller's expected version did not match the stored one
    #[error(
        "CAS operation failed because the given version doesn't match what is stored \
         (key: {key}, expected: {expected:?}, current: {actual:?})"
    )]
    CasConflict {
        key: StoreKey,
        expected: String,
        actual: Option<String>,
    },

    /// Delivery channel was torn down
    #[error("subscription closed: {0}")]
    SubscriptionClosed(CloseReason),

    #[error("dispatch loop already started for this backend")]
    DispatcherAlreadyRunning,

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// Caller-side retry loop gave up
    #[error("CAS write still conflicting after {attempts} attempts")]
    RetryExhausted { attempts: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("{0}")]
    SignalSendFailed(String),

    #[error("Server failed to start: {0}")]
    ServerStartFailed(String),
}

// ============== Conversion Implementations ============== //
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(e))
    }
}
