pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod fingerprint;
pub mod job;
pub mod lifecycle;
pub mod logging;
pub mod normalize;
pub mod output;
pub mod remote;
pub mod sanitize;
pub mod secrets;
pub mod store;

pub use config::{load_config, ChannelConfig, Config, LifecycleConfig};
pub use db::Database;
pub use error::{ConfigError, PodscribeError, Result, WriterError};
pub use feed::{FeedEntry, FeedReader, FeedSource, RssFeedReader};
pub use fingerprint::fingerprint;
pub use job::{EpisodeMetadata, Job, JobDraft, JobState};
pub use lifecycle::{
    export_transcripts, Candidate, ExportFilter, LifecycleError, PollOptions, PollPolicy,
    PollingEngine, RunControl, SubmissionOrchestrator,
};
pub use logging::{init_logging, LogFormat};
pub use normalize::{normalize, Segment, Transcript};
pub use output::{FileTranscriptWriter, TranscriptWriter};
pub use remote::{AzureBatchClient, RemoteError, RemoteStatus};
pub use secrets::{resolve_secret, SecretError};
pub use store::{JobStore, SqliteJobStore, StoreError};
