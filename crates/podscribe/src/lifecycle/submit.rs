use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::feed::FeedEntry;
use crate::job::{Job, JobDraft, JobState};
use crate::remote::{RemoteError, Submission, SubmissionClient};
use crate::sanitize;
use crate::store::{JobStore, JobUpdate, StoreError};

use super::{short_fingerprint, AbortLatch, LifecycleError, RunControl};

/// One episode offered for transcription.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: FeedEntry,
    /// Language code or `"auto"`.
    pub language: String,
}

impl Candidate {
    pub fn new(entry: FeedEntry, language: impl Into<String>) -> Self {
        Self {
            entry,
            language: language.into(),
        }
    }
}

/// Counters for one submission run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    pub candidates: usize,
    /// New job records inserted by this run.
    pub created: usize,
    /// Candidates whose fingerprint was already known.
    pub duplicates: usize,
    pub submitted: usize,
    /// Created jobs the remote service refused (`New -> Failed`).
    pub failed: usize,
    /// Candidates the store could not record, plus created jobs whose
    /// follow-up transition failed (left in `new`).
    pub errors: usize,
    /// Candidates skipped because the run was stopped.
    pub interrupted: usize,
}

enum Outcome {
    Submitted,
    Rejected,
    Duplicate,
    Orphaned,
    Errored,
    Interrupted,
    Aborted,
}

/// Creates job records for candidates and submits new ones to the remote
/// service.
pub struct SubmissionOrchestrator {
    store: Arc<dyn JobStore>,
    client: Arc<dyn SubmissionClient>,
    concurrency: usize,
    per_channel: Option<usize>,
    control: RunControl,
}

impl SubmissionOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, client: Arc<dyn SubmissionClient>) -> Self {
        Self {
            store,
            client,
            concurrency: 4,
            per_channel: None,
            control: RunControl::default(),
        }
    }

    pub fn from_config(
        store: Arc<dyn JobStore>,
        client: Arc<dyn SubmissionClient>,
        config: &LifecycleConfig,
    ) -> Self {
        Self::new(store, client)
            .with_concurrency(config.submit_concurrency)
            .with_per_channel_limit(config.per_channel_concurrency)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_per_channel_limit(mut self, limit: Option<usize>) -> Self {
        self.per_channel = limit.map(|n| n.max(1));
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    /// Runs one submission batch.
    ///
    /// Returns `StoreUnavailable` if the store failed; jobs committed before
    /// the failure keep their state.
    pub async fn run(&self, candidates: Vec<Candidate>) -> Result<SubmitSummary, LifecycleError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("submit_run", run_id = %run_id);

        async move {
            let mut summary = SubmitSummary {
                candidates: candidates.len(),
                ..Default::default()
            };
            info!(
                candidates = summary.candidates,
                concurrency = self.concurrency,
                "Starting submission run"
            );

            let limits = self.channel_limits(&candidates);
            let latch = AbortLatch::default();

            let outcomes: Vec<Outcome> = stream::iter(candidates)
                .map(|candidate| self.submit_one(candidate, &latch, &limits))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Outcome::Submitted => {
                        summary.created += 1;
                        summary.submitted += 1;
                    }
                    Outcome::Rejected => {
                        summary.created += 1;
                        summary.failed += 1;
                    }
                    Outcome::Orphaned => {
                        summary.created += 1;
                        summary.errors += 1;
                    }
                    Outcome::Errored => summary.errors += 1,
                    Outcome::Duplicate => summary.duplicates += 1,
                    Outcome::Interrupted => summary.interrupted += 1,
                    Outcome::Aborted => {}
                }
            }

            latch.into_result()?;

            info!(
                created = summary.created,
                duplicates = summary.duplicates,
                submitted = summary.submitted,
                failed = summary.failed,
                interrupted = summary.interrupted,
                "Submission run completed"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    fn channel_limits(&self, candidates: &[Candidate]) -> HashMap<String, Arc<Semaphore>> {
        let Some(limit) = self.per_channel else {
            return HashMap::new();
        };
        candidates
            .iter()
            .map(|c| (c.entry.channel.clone(), Arc::new(Semaphore::new(limit))))
            .collect()
    }

    async fn submit_one(
        &self,
        candidate: Candidate,
        latch: &AbortLatch,
        limits: &HashMap<String, Arc<Semaphore>>,
    ) -> Outcome {
        if self.stopped(latch) {
            return Outcome::Interrupted;
        }

        let draft = JobDraft::from_entry(&candidate.entry, &candidate.language);
        let span = info_span!(
            "submit_job",
            channel = %draft.channel,
            fingerprint = short_fingerprint(&draft.fingerprint),
        );

        async move {
            let _permit = match limits.get(&draft.channel) {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };
            if self.stopped(latch) {
                return Outcome::Interrupted;
            }

            let job = match self.store.create_if_absent(&draft) {
                Ok((job, true)) => job,
                Ok((job, false)) => {
                    debug!(state = %job.state, "Episode already known, skipping");
                    return Outcome::Duplicate;
                }
                Err(e) => return Self::store_failure(e, latch, false),
            };

            let display_name = display_name(&job);
            let submission = Submission {
                audio_locator: &job.audio_locator,
                language: &job.language,
                display_name: &display_name,
            };
            debug!(
                audio = %sanitize::redact_url(&job.audio_locator),
                language = %job.language,
                "Submitting episode"
            );

            let result = self.client.submit(submission).await.and_then(|id| {
                if id.trim().is_empty() {
                    Err(RemoteError::InvalidResponse(
                        "empty remote job id".to_string(),
                    ))
                } else {
                    Ok(id)
                }
            });

            match result {
                Ok(remote_job_id) => {
                    match self.store.transition(
                        &job.fingerprint,
                        JobState::New,
                        JobState::Submitted,
                        JobUpdate::submitted(remote_job_id.clone()),
                    ) {
                        Ok(_) => {
                            info!(
                                remote_job_id = %remote_job_id,
                                title = %job.short_title(),
                                "Episode submitted"
                            );
                            Outcome::Submitted
                        }
                        Err(e) => Self::store_failure(e, latch, true),
                    }
                }
                Err(e) => {
                    warn!(error = %e, title = %job.short_title(), "Submission failed");
                    match self.store.transition(
                        &job.fingerprint,
                        JobState::New,
                        JobState::Failed,
                        JobUpdate::failed(e.to_string()),
                    ) {
                        Ok(_) => Outcome::Rejected,
                        Err(e) => Self::store_failure(e, latch, true),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    fn stopped(&self, latch: &AbortLatch) -> bool {
        self.control.is_shutdown_requested() || latch.is_raised()
    }

    fn store_failure(err: StoreError, latch: &AbortLatch, created: bool) -> Outcome {
        if err.is_unavailable() {
            error!(error = %err, "Store failure, aborting run");
            latch.raise(&err);
            Outcome::Aborted
        } else if created {
            error!(error = %err, "Could not record submission result, job left in 'new'");
            Outcome::Orphaned
        } else {
            error!(error = %err, "Could not create job record");
            Outcome::Errored
        }
    }
}

/// Label for the remote job list, e.g. `podscribe-mychannel-0123456789ab`.
fn display_name(job: &Job) -> String {
    format!(
        "podscribe-{}-{}",
        sanitize::slugify(&job.channel, 50),
        short_fingerprint(&job.fingerprint)
    )
}
