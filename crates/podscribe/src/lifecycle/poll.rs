use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::job::{Job, JobState};
use crate::normalize;
use crate::output::TranscriptWriter;
use crate::remote::{RemoteError, RemoteStatus, RetrievalClient, StatusClient};
use crate::store::{JobQuery, JobStore, JobUpdate, StoreError};

use super::{short_fingerprint, AbortLatch, LifecycleError, PollPolicy, RunControl};

/// Error recorded when a job keeps running past the attempt ceiling.
pub const MAX_ATTEMPTS_EXCEEDED: &str = "max attempts exceeded";

/// Selection of jobs for one poll run.
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Only poll jobs of this channel.
    pub channel: Option<String>,
    /// Poll jobs even if their backoff has not elapsed.
    pub force: bool,
}

/// Counters for one poll run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Pending jobs loaded from the store.
    pub pending: usize,
    /// Jobs whose remote status was queried.
    pub polled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub still_running: usize,
    /// Jobs skipped because their next poll is not due yet.
    pub deferred: usize,
    pub transient_errors: usize,
    /// Succeeded jobs whose output could not be written.
    pub write_failures: usize,
    /// Jobs another run moved first.
    pub already_done: usize,
    /// Jobs whose poll result could not be recorded.
    pub errors: usize,
    pub interrupted: usize,
}

enum Outcome {
    Succeeded { written: bool },
    Failed,
    StillRunning,
    Transient,
    Deferred,
    AlreadyDone,
    Errored,
    Interrupted,
    Aborted,
}

impl Outcome {
    fn polled(&self) -> bool {
        matches!(
            self,
            Outcome::Succeeded { .. }
                | Outcome::Failed
                | Outcome::StillRunning
                | Outcome::Transient
        )
    }
}

/// Queries the remote service for every pending job and drives each one
/// towards a terminal state.
pub struct PollingEngine {
    store: Arc<dyn JobStore>,
    status: Arc<dyn StatusClient>,
    retrieval: Arc<dyn RetrievalClient>,
    writer: Arc<dyn TranscriptWriter>,
    policy: PollPolicy,
    concurrency: usize,
    batch_limit: usize,
    control: RunControl,
}

impl PollingEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        status: Arc<dyn StatusClient>,
        retrieval: Arc<dyn RetrievalClient>,
        writer: Arc<dyn TranscriptWriter>,
    ) -> Self {
        Self {
            store,
            status,
            retrieval,
            writer,
            policy: PollPolicy::default(),
            concurrency: 4,
            batch_limit: 200,
            control: RunControl::default(),
        }
    }

    pub fn with_config(self, config: &LifecycleConfig) -> Self {
        self.with_policy(PollPolicy::from_config(config))
            .with_concurrency(config.poll_concurrency)
            .with_batch_limit(config.poll_batch_limit)
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    /// Runs one poll batch over `Submitted` and `Polling` jobs, oldest first.
    pub async fn run(&self, options: &PollOptions) -> Result<PollSummary, LifecycleError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "poll_run",
            run_id = %run_id,
            channel = options.channel.as_deref().unwrap_or("*"),
        );

        async move {
            let jobs = self.pending_jobs(options.channel.as_deref())?;
            let mut summary = PollSummary {
                pending: jobs.len(),
                ..Default::default()
            };
            info!(
                pending = summary.pending,
                force = options.force,
                "Starting poll run"
            );

            let latch = AbortLatch::default();
            let now = Utc::now();

            let outcomes: Vec<Outcome> = stream::iter(jobs)
                .map(|job| self.poll_one(job, now, options.force, &latch))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                if outcome.polled() {
                    summary.polled += 1;
                }
                match outcome {
                    Outcome::Succeeded { written } => {
                        summary.succeeded += 1;
                        if !written {
                            summary.write_failures += 1;
                        }
                    }
                    Outcome::Failed => summary.failed += 1,
                    Outcome::StillRunning => summary.still_running += 1,
                    Outcome::Transient => summary.transient_errors += 1,
                    Outcome::Deferred => summary.deferred += 1,
                    Outcome::AlreadyDone => summary.already_done += 1,
                    Outcome::Errored => summary.errors += 1,
                    Outcome::Interrupted => summary.interrupted += 1,
                    Outcome::Aborted => {}
                }
            }

            latch.into_result()?;

            info!(
                polled = summary.polled,
                succeeded = summary.succeeded,
                failed = summary.failed,
                still_running = summary.still_running,
                deferred = summary.deferred,
                transient_errors = summary.transient_errors,
                write_failures = summary.write_failures,
                "Poll run completed"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Non-terminal jobs ordered by `updated_at`, capped at the batch limit.
    fn pending_jobs(&self, channel: Option<&str>) -> Result<Vec<Job>, LifecycleError> {
        let mut jobs = Vec::new();
        for state in [JobState::Submitted, JobState::Polling] {
            let batch = match channel {
                Some(channel) => {
                    let query = JobQuery {
                        state: Some(state),
                        channel: Some(channel.to_string()),
                        limit: Some(self.batch_limit as u64),
                        offset: None,
                        oldest_first: true,
                    };
                    self.store.query(&query).map(|(jobs, _)| jobs)
                }
                None => self.store.list_by_state(state, self.batch_limit),
            };
            jobs.extend(batch.map_err(LifecycleError::store)?);
        }

        jobs.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        jobs.truncate(self.batch_limit);
        Ok(jobs)
    }

    async fn poll_one(
        &self,
        job: Job,
        now: DateTime<Utc>,
        force: bool,
        latch: &AbortLatch,
    ) -> Outcome {
        if self.control.is_shutdown_requested() || latch.is_raised() {
            return Outcome::Interrupted;
        }
        if !force && !job.is_due(now) {
            debug!(
                fingerprint = short_fingerprint(&job.fingerprint),
                next_poll_at = ?job.next_poll_at,
                "Not due yet"
            );
            return Outcome::Deferred;
        }

        let span = info_span!(
            "poll_job",
            channel = %job.channel,
            fingerprint = short_fingerprint(&job.fingerprint),
        );
        self.drive(job, latch).instrument(span).await
    }

    async fn drive(&self, job: Job, latch: &AbortLatch) -> Outcome {
        let Some(remote_job_id) = job.remote_job_id.clone() else {
            error!(state = %job.state, "Pending job has no remote job id");
            return Outcome::Errored;
        };

        let job = if job.state == JobState::Submitted {
            match self.store.transition(
                &job.fingerprint,
                JobState::Submitted,
                JobState::Polling,
                JobUpdate::default(),
            ) {
                Ok(job) => job,
                Err(e) => return self.store_failure(e, latch),
            }
        } else {
            job
        };

        let outcome = match self.status.status(&remote_job_id).await {
            Ok(RemoteStatus::Running) => {
                debug!(attempts = job.attempts, "Remote job still running");
                self.record_attempt(&job, None, latch)
            }
            Ok(RemoteStatus::Succeeded) => self.complete(&job, &remote_job_id, latch).await,
            Ok(RemoteStatus::Failed(message)) => {
                warn!(error = %message, "Remote job failed");
                self.fail(&job, message, latch)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Transient error while polling");
                self.record_attempt(&job, Some(&e), latch)
            }
            Err(e) => {
                warn!(error = %e, "Status query failed");
                self.fail(&job, e.to_string(), latch)
            }
        };

        if matches!(outcome, Outcome::Succeeded { .. } | Outcome::Failed) {
            if let Err(e) = self.retrieval.discard(&remote_job_id).await {
                warn!(error = %e, "Failed to release remote job");
            }
        }
        outcome
    }

    /// Fetches, normalizes and commits a finished transcript, then hands it
    /// to the writer. Only the run that wins the transition writes.
    async fn complete(&self, job: &Job, remote_job_id: &str, latch: &AbortLatch) -> Outcome {
        let raw = match self.retrieval.fetch_result(remote_job_id).await {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Transient error while fetching result");
                return self.record_attempt(job, Some(&e), latch);
            }
            Err(e) => {
                warn!(error = %e, "Result retrieval failed");
                return self.fail(job, e.to_string(), latch);
            }
        };

        let transcript = match normalize::normalize(&raw) {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(error = %e, "Malformed result");
                return self.fail(job, format!("malformed result: {}", e), latch);
            }
        };

        let committed = self.store.transition(
            &job.fingerprint,
            JobState::Polling,
            JobState::Succeeded,
            JobUpdate::succeeded(transcript.clone()),
        );
        let job = match committed {
            Ok(job) => job,
            Err(e) => return self.store_failure(e, latch),
        };
        info!(
            segments = transcript.len(),
            title = %job.short_title(),
            "Transcription succeeded"
        );

        let written = match self.writer.write(&job.channel, &job.metadata, &transcript) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    error = %e,
                    "Failed to write transcript, recover with export"
                );
                false
            }
        };
        Outcome::Succeeded { written }
    }

    /// Records one more poll of a job that is not terminal yet, or fails it
    /// once the ceiling is passed.
    fn record_attempt(&self, job: &Job, error: Option<&RemoteError>, latch: &AbortLatch) -> Outcome {
        let attempts = job.attempts.saturating_add(1);
        if self.policy.exceeds_ceiling(attempts) {
            warn!(attempts = job.attempts, "Giving up on job");
            return self.fail(job, MAX_ATTEMPTS_EXCEEDED.to_string(), latch);
        }

        let update = JobUpdate {
            attempts: Some(attempts),
            last_error: error.map(|e| e.to_string()),
            next_poll_at: Some(self.policy.next_poll_at(Utc::now(), attempts)),
            ..Default::default()
        };
        match self
            .store
            .transition(&job.fingerprint, JobState::Polling, JobState::Polling, update)
        {
            Ok(_) if error.is_some() => Outcome::Transient,
            Ok(_) => Outcome::StillRunning,
            Err(e) => self.store_failure(e, latch),
        }
    }

    fn fail(&self, job: &Job, message: String, latch: &AbortLatch) -> Outcome {
        match self.store.transition(
            &job.fingerprint,
            JobState::Polling,
            JobState::Failed,
            JobUpdate::failed(message),
        ) {
            Ok(_) => Outcome::Failed,
            Err(e) => self.store_failure(e, latch),
        }
    }

    fn store_failure(&self, err: StoreError, latch: &AbortLatch) -> Outcome {
        if err.is_stale() {
            debug!(error = %err, "Job already moved by another run");
            return Outcome::AlreadyDone;
        }
        if err.is_unavailable() {
            error!(error = %err, "Store failure, aborting run");
            latch.raise(&err);
            return Outcome::Aborted;
        }
        error!(error = %err, "Could not record poll result");
        Outcome::Errored
    }
}
