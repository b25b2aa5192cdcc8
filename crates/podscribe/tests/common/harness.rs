//! Isolated environment for lifecycle runs.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use podscribe::db::Database;
use podscribe::job::Job;
use podscribe::lifecycle::{
    Candidate, PollOptions, PollPolicy, PollSummary, PollingEngine, SubmissionOrchestrator,
    SubmitSummary,
};
use podscribe::store::{JobStore, SqliteJobStore};

use super::fakes::{RecordingWriter, ScriptedRemote};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub store: Arc<SqliteJobStore>,
    pub remote: Arc<ScriptedRemote>,
    pub writer: Arc<RecordingWriter>,
    pub policy: PollPolicy,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("podscribe.db");
        let output_dir = temp_dir.path().join("output");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        let db = Database::open(&db_path).expect("Failed to open test database");

        Self {
            temp_dir,
            db_path,
            output_dir,
            store: Arc::new(SqliteJobStore::new(db)),
            remote: Arc::new(ScriptedRemote::new()),
            writer: Arc::new(RecordingWriter::new()),
            policy: PollPolicy {
                max_attempts: 5,
                backoff_base_secs: 60,
                backoff_max_secs: 600,
            },
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Opens a second store on the same database file, as a restarted
    /// process would.
    pub fn reopen_store(&self) -> SqliteJobStore {
        SqliteJobStore::new(Database::open(&self.db_path).expect("Failed to reopen database"))
    }

    pub fn orchestrator(&self) -> SubmissionOrchestrator {
        self.orchestrator_with(self.store.clone())
    }

    pub fn orchestrator_with(&self, store: Arc<dyn JobStore>) -> SubmissionOrchestrator {
        SubmissionOrchestrator::new(store, self.remote.clone())
    }

    pub fn engine(&self) -> PollingEngine {
        self.engine_with(self.store.clone())
    }

    pub fn engine_with(&self, store: Arc<dyn JobStore>) -> PollingEngine {
        PollingEngine::new(
            store,
            self.remote.clone(),
            self.remote.clone(),
            self.writer.clone(),
        )
        .with_policy(self.policy)
    }

    pub async fn submit(&self, candidates: Vec<Candidate>) -> SubmitSummary {
        self.orchestrator()
            .run(candidates)
            .await
            .expect("Submission run failed")
    }

    /// Polls every pending job, ignoring backoff.
    pub async fn poll_now(&self) -> PollSummary {
        self.engine()
            .run(&PollOptions {
                channel: None,
                force: true,
            })
            .await
            .expect("Poll run failed")
    }

    pub fn job(&self, fingerprint: &str) -> Job {
        self.store.get(fingerprint).expect("Job not found")
    }
}
