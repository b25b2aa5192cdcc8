use thiserror::Error;

/// Errors from the remote batch transcription service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The service refused to create a job.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// Timeouts, connection failures, throttling and server errors.
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// A non-success status that retrying will not fix.
    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Result retrieval failed: {0}")]
    Retrieval(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// Classifies an HTTP status code: throttling and server errors are
    /// transient, everything else is a rejection.
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 429 || status == 408 || (500..600).contains(&status) {
            RemoteError::Transient(format!("HTTP {}: {}", status, truncate(body)))
        } else {
            RemoteError::Rejected {
                status,
                body: truncate(body),
            }
        }
    }
}

/// Maximum length of a response body carried in an error, to keep logs and
/// `last_error` readable.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}
