use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A value read back from the jobs or transcripts table does not decode.
    #[error("Corrupt value in column '{column}': {reason}")]
    CorruptValue { column: String, reason: String },

    /// A JSON column (episode metadata, transcript segments) failed to encode.
    #[error("Cannot encode column '{column}': {source}")]
    Encode {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    pub(crate) fn encode(column: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| DatabaseError::Encode { column, source }
    }
}
