use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PodscribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    #[error("Malformed result: {0}")]
    Normalize(#[from] crate::normalize::NormalizeError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Feed error: {0}")]
    Feed(#[from] crate::feed::FeedError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::lifecycle::LifecycleError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid channel '{name}': {reason}")]
    InvalidChannel { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize transcript: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, PodscribeError>;
