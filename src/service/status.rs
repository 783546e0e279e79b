//! Store errors in tonic's code space
//!
//! | error                          | code              |
//! |--------------------------------|-------------------|
//! | TypeNotRegistered              | INVALID_ARGUMENT  |
//! | InvalidResource                | INVALID_ARGUMENT  |
//! | CasConflict                    | ABORTED           |
//! | SubscriptionClosed             | UNAVAILABLE       |
//! | NotFound                       | NOT_FOUND         |
//! | anything else                  | INTERNAL          |
//!
//! Messages are the error's `Display` output, unchanged.

use tonic::Code;
use tonic::Status;

use crate::Error;
use crate::StoreError;

impl From<StoreError> for Status {
    fn from(e: StoreError) -> Self {
        let code = match &e {
            StoreError::TypeNotRegistered(_) | StoreError::InvalidResource(_) => Code::InvalidArgument,
            StoreError::CasConflict { .. } => Code::Aborted,
            StoreError::SubscriptionClosed(_) => Code::Unavailable,
            StoreError::NotFound(_) => Code::NotFound,
            StoreError::TypeAlreadyRegistered(_)
            | StoreError::DispatcherAlreadyRunning
            | StoreError::RetryExhausted { .. } => Code::Internal,
        };
        Status::new(code, e.to_string())
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        match e {
            Error::Store(e) => e.into(),
            other => Status::new(Code::Internal, other.to_string()),
        }
    }
}
