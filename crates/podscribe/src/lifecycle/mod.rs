//! Batch runs over the job store: submission, polling and export.
//!
//! Each run processes its job set with a bounded worker pool. Per-job
//! failures are recorded on the job and never abort the run; a store failure
//! stops new work, lets in-flight jobs finish and fails the whole run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::store::StoreError;

pub mod export;
pub mod policy;
pub mod poll;
pub mod submit;

pub use export::{export_transcripts, ExportFilter, ExportSummary};
pub use policy::PollPolicy;
pub use poll::{PollOptions, PollSummary, PollingEngine};
pub use submit::{Candidate, SubmissionOrchestrator, SubmitSummary};

#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The store failed mid-run. Work already committed stays committed.
    #[error("Store unavailable, run aborted: {0}")]
    StoreUnavailable(String),

    #[error("No job with fingerprint '{0}'")]
    JobNotFound(String),
}

impl LifecycleError {
    pub(crate) fn store(err: StoreError) -> Self {
        LifecycleError::StoreUnavailable(err.to_string())
    }
}

/// Cooperative shutdown shared between a run and a signal handler.
///
/// Checked before each job starts; a job already talking to the remote
/// service finishes its current step.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    shutdown: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Per-run abort latch, raised by the first job that sees the store fail.
#[derive(Debug, Default)]
pub(crate) struct AbortLatch {
    raised: AtomicBool,
    reason: std::sync::Mutex<Option<String>>,
}

impl AbortLatch {
    pub(crate) fn raise(&self, err: &StoreError) {
        if let Ok(mut reason) = self.reason.lock() {
            reason.get_or_insert_with(|| err.to_string());
        }
        self.raised.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// The run's final verdict once all in-flight jobs have drained.
    pub(crate) fn into_result(self) -> Result<(), LifecycleError> {
        if !self.raised.into_inner() {
            return Ok(());
        }
        let reason = self
            .reason
            .into_inner()
            .ok()
            .flatten()
            .unwrap_or_else(|| "store failure".to_string());
        Err(LifecycleError::StoreUnavailable(reason))
    }
}

/// Short fingerprint prefix for logs and remote display names.
pub(crate) fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
