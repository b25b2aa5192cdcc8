use thiserror::Error;

use crate::db::DatabaseError;
use crate::job::JobState;

/// Errors from job store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No job with fingerprint '{0}'")]
    NotFound(String),

    /// The compare-and-swap precondition did not hold. Nothing was written.
    #[error("Stale state: expected '{expected}', found '{actual}'")]
    StaleState { expected: JobState, actual: JobState },

    #[error("Transition '{from}' -> '{to}' is not allowed")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// The backing database failed. Fatal for a batch run.
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] DatabaseError),
}

impl StoreError {
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::StaleState { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
