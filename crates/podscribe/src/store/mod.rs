//! Durable job store.
//!
//! The store is the only serialization point of the lifecycle: creation is
//! insert-if-absent keyed by fingerprint, and every later change is a
//! compare-and-swap on the job's state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::job::{Job, JobDraft, JobState};
use crate::normalize::Transcript;

pub mod error;
pub mod sqlite;

pub use error::StoreError;
pub use sqlite::SqliteJobStore;

/// Fields written alongside a state transition.
///
/// Unset fields keep their stored value, with these exceptions:
/// `attempts` resets to 0 when the state changes, `next_poll_at` is always
/// replaced, and a transition to `Succeeded` clears `last_error`.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    /// Required on `New -> Submitted`, rejected everywhere else.
    pub remote_job_id: Option<String>,
    pub attempts: Option<u32>,
    pub last_error: Option<String>,
    pub next_poll_at: Option<DateTime<Utc>>,
    /// Required on `-> Succeeded`, rejected everywhere else.
    pub transcript: Option<Transcript>,
}

impl JobUpdate {
    pub fn submitted(remote_job_id: impl Into<String>) -> Self {
        Self {
            remote_job_id: Some(remote_job_id.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn succeeded(transcript: Transcript) -> Self {
        Self {
            transcript: Some(transcript),
            ..Default::default()
        }
    }
}

/// Filter for operator listings.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub state: Option<JobState>,
    pub channel: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Oldest `updated_at` first instead of newest `created_at` first.
    pub oldest_first: bool,
}

/// Job counts per state for one channel.
pub type StateCounts = BTreeMap<JobState, u64>;

/// Reference under which a succeeded job's transcript is stored.
pub fn result_ref_for(fingerprint: &str) -> String {
    format!("transcript://{}", fingerprint)
}

/// Persistent, transactional job storage.
///
/// Every method either fully commits or leaves the store untouched.
pub trait JobStore: Send + Sync {
    /// Inserts a `New` job unless one with the same fingerprint exists.
    /// Returns the stored record and whether this call created it.
    fn create_if_absent(&self, draft: &JobDraft) -> Result<(Job, bool), StoreError>;

    /// Moves a job from `expected` to `new`, applying `update`, only if its
    /// stored state is still `expected`. Returns the updated record.
    fn transition(
        &self,
        fingerprint: &str,
        expected: JobState,
        new: JobState,
        update: JobUpdate,
    ) -> Result<Job, StoreError>;

    /// Jobs in `state`, oldest `updated_at` first.
    fn list_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, StoreError>;

    fn get(&self, fingerprint: &str) -> Result<Job, StoreError>;

    /// Filtered listing. Returns the page and the total match count.
    fn query(&self, query: &JobQuery) -> Result<(Vec<Job>, u64), StoreError>;

    /// Job counts per channel and state.
    fn stats(&self) -> Result<BTreeMap<String, StateCounts>, StoreError>;

    /// The stored transcript of a succeeded job.
    fn transcript(&self, fingerprint: &str) -> Result<Option<Transcript>, StoreError>;
}
