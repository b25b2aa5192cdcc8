//! Clients for the remote batch transcription service.

use async_trait::async_trait;
use serde_json::Value;

pub mod azure;
pub mod error;

pub use azure::AzureBatchClient;
pub use error::RemoteError;

/// A request to transcribe one audio file.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub audio_locator: &'a str,
    /// A language code, or `"auto"` for automatic identification.
    pub language: &'a str,
    /// Human-readable label shown in the remote service's job list.
    pub display_name: &'a str,
}

/// Remote job state as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Queued or running.
    Running,
    Succeeded,
    Failed(String),
}

#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Creates a remote job and returns its identifier.
    async fn submit(&self, submission: Submission<'_>) -> Result<String, RemoteError>;
}

#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn status(&self, remote_job_id: &str) -> Result<RemoteStatus, RemoteError>;
}

#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Downloads the raw result document of a succeeded job.
    async fn fetch_result(&self, remote_job_id: &str) -> Result<Value, RemoteError>;

    /// Releases the remote job once it is terminal locally. Best effort.
    async fn discard(&self, _remote_job_id: &str) -> Result<(), RemoteError> {
        Ok(())
    }
}
