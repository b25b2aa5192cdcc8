//! In-process stand-ins for the remote service, the writer and the store.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use podscribe::db::DatabaseError;
use podscribe::error::WriterError;
use podscribe::job::{EpisodeMetadata, Job, JobDraft, JobState};
use podscribe::normalize::Transcript;
use podscribe::remote::{
    RemoteError, RemoteStatus, RetrievalClient, StatusClient, Submission, SubmissionClient,
};
use podscribe::store::{JobQuery, JobStore, JobUpdate, StateCounts, StoreError};

/// Fake batch service. Remote ids are handed out as `R1`, `R2`, ...
///
/// Status answers are scripted per remote id and consumed in order; an
/// unscripted job reports `Running`.
#[derive(Default)]
pub struct ScriptedRemote {
    next_id: AtomicUsize,
    submit_error: Mutex<Option<RemoteError>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<RemoteStatus, RemoteError>>>>,
    results: Mutex<HashMap<String, Result<Value, RemoteError>>>,
    pub submissions: Mutex<Vec<(String, String)>>,
    pub status_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub discarded: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    /// Makes every following submission fail with `error`.
    pub fn reject_submissions(&self, error: RemoteError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn script_status(&self, remote_id: &str, answers: Vec<Result<RemoteStatus, RemoteError>>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(remote_id.to_string())
            .or_default()
            .extend(answers);
    }

    /// The job reports success from now on and serves `payload`.
    pub fn complete(&self, remote_id: &str, payload: Value) {
        self.script_status(remote_id, vec![Ok(RemoteStatus::Succeeded); 8]);
        self.results
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), Ok(payload));
    }

    pub fn set_result(&self, remote_id: &str, result: Result<Value, RemoteError>) {
        self.results
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), result);
    }
}

#[async_trait]
impl SubmissionClient for ScriptedRemote {
    async fn submit(&self, submission: Submission<'_>) -> Result<String, RemoteError> {
        if let Some(error) = self.submit_error.lock().unwrap().clone() {
            return Err(error);
        }
        let id = format!("R{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.submissions
            .lock()
            .unwrap()
            .push((id.clone(), submission.audio_locator.to_string()));
        Ok(id)
    }
}

#[async_trait]
impl StatusClient for ScriptedRemote {
    async fn status(&self, remote_job_id: &str) -> Result<RemoteStatus, RemoteError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.get_mut(remote_job_id).and_then(|q| q.pop_front()) {
            Some(answer) => answer,
            None => Ok(RemoteStatus::Running),
        }
    }
}

#[async_trait]
impl RetrievalClient for ScriptedRemote {
    async fn fetch_result(&self, remote_job_id: &str) -> Result<Value, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .get(remote_job_id)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::Retrieval("no result".to_string())))
    }

    async fn discard(&self, remote_job_id: &str) -> Result<(), RemoteError> {
        self.discarded
            .lock()
            .unwrap()
            .push(remote_job_id.to_string());
        Ok(())
    }
}

/// Counts calls in progress and remembers the highest count seen.
#[derive(Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// `ScriptedRemote` whose submit and status calls take `delay`, with gauges
/// for how many of them overlap.
pub struct SlowRemote {
    pub inner: ScriptedRemote,
    delay: Duration,
    pub overall: InFlightGauge,
    per_channel: Mutex<HashMap<String, Arc<InFlightGauge>>>,
}

impl SlowRemote {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: ScriptedRemote::new(),
            delay,
            overall: InFlightGauge::default(),
            per_channel: Mutex::new(HashMap::new()),
        }
    }

    /// Peak overlapping submissions for a channel slug.
    pub fn channel_peak(&self, channel_slug: &str) -> usize {
        self.per_channel
            .lock()
            .unwrap()
            .get(channel_slug)
            .map_or(0, |gauge| gauge.peak())
    }

    fn channel_gauge(&self, display_name: &str) -> Arc<InFlightGauge> {
        // Display names look like `podscribe-<channel slug>-<fingerprint>`.
        let slug = display_name
            .strip_prefix("podscribe-")
            .and_then(|rest| rest.rsplit_once('-'))
            .map_or(display_name, |(slug, _)| slug);
        self.per_channel
            .lock()
            .unwrap()
            .entry(slug.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl SubmissionClient for SlowRemote {
    async fn submit(&self, submission: Submission<'_>) -> Result<String, RemoteError> {
        let channel = self.channel_gauge(submission.display_name);
        self.overall.enter();
        channel.enter();
        tokio::time::sleep(self.delay).await;
        let result = self.inner.submit(submission).await;
        channel.leave();
        self.overall.leave();
        result
    }
}

#[async_trait]
impl StatusClient for SlowRemote {
    async fn status(&self, remote_job_id: &str) -> Result<RemoteStatus, RemoteError> {
        self.overall.enter();
        tokio::time::sleep(self.delay).await;
        let result = self.inner.status(remote_job_id).await;
        self.overall.leave();
        result
    }
}

#[async_trait]
impl RetrievalClient for SlowRemote {
    async fn fetch_result(&self, remote_job_id: &str) -> Result<Value, RemoteError> {
        self.inner.fetch_result(remote_job_id).await
    }

    async fn discard(&self, remote_job_id: &str) -> Result<(), RemoteError> {
        self.inner.discard(remote_job_id).await
    }
}

/// Writer that keeps every transcript it is handed.
#[derive(Default)]
pub struct RecordingWriter {
    pub writes: Mutex<Vec<(String, EpisodeMetadata, Transcript)>>,
    failing: AtomicBool,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn titles(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, episode, _)| episode.title.clone())
            .collect()
    }
}

impl podscribe::output::TranscriptWriter for RecordingWriter {
    fn write(
        &self,
        channel: &str,
        episode: &EpisodeMetadata,
        transcript: &Transcript,
    ) -> Result<(), WriterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WriterError::WriteFile {
                path: "unwritable".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.writes.lock().unwrap().push((
            channel.to_string(),
            episode.clone(),
            transcript.clone(),
        ));
        Ok(())
    }
}

/// Store wrapper that can be told to fail like a lost database.
pub struct FaultyStore {
    inner: Arc<dyn JobStore>,
    fail_everything: AtomicBool,
    fail_transition_to: Mutex<Option<JobState>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn JobStore>) -> Self {
        Self {
            inner,
            fail_everything: AtomicBool::new(false),
            fail_transition_to: Mutex::new(None),
        }
    }

    pub fn fail_everything(&self) {
        self.fail_everything.store(true, Ordering::SeqCst);
    }

    /// The next transition into `state` fails without committing.
    pub fn fail_next_transition_to(&self, state: JobState) {
        *self.fail_transition_to.lock().unwrap() = Some(state);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_everything.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

fn unavailable() -> StoreError {
    StoreError::Unavailable(DatabaseError::LockPoisoned)
}

impl JobStore for FaultyStore {
    fn create_if_absent(&self, draft: &JobDraft) -> Result<(Job, bool), StoreError> {
        self.check()?;
        self.inner.create_if_absent(draft)
    }

    fn transition(
        &self,
        fingerprint: &str,
        expected: JobState,
        new: JobState,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        self.check()?;
        {
            let mut armed = self.fail_transition_to.lock().unwrap();
            if *armed == Some(new) {
                *armed = None;
                return Err(unavailable());
            }
        }
        self.inner.transition(fingerprint, expected, new, update)
    }

    fn list_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.check()?;
        self.inner.list_by_state(state, limit)
    }

    fn get(&self, fingerprint: &str) -> Result<Job, StoreError> {
        self.check()?;
        self.inner.get(fingerprint)
    }

    fn query(&self, query: &JobQuery) -> Result<(Vec<Job>, u64), StoreError> {
        self.check()?;
        self.inner.query(query)
    }

    fn stats(&self) -> Result<BTreeMap<String, StateCounts>, StoreError> {
        self.check()?;
        self.inner.stats()
    }

    fn transcript(&self, fingerprint: &str) -> Result<Option<Transcript>, StoreError> {
        self.check()?;
        self.inner.transcript(fingerprint)
    }
}
