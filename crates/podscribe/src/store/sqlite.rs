//! SQLite-backed [`JobStore`].

use std::collections::BTreeMap;

use chrono::Utc;

use super::{result_ref_for, JobQuery, JobStore, JobUpdate, StateCounts, StoreError};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{Database, DatabaseError};
use crate::job::{Job, JobDraft, JobState};
use crate::normalize::{Segment, Transcript};

/// Outcome of the read-check-write step of a transition.
enum Cas {
    Updated(Job),
    NotFound,
    Stale(JobState),
}

/// Job store over the shared [`Database`] handle.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Checks that `update` carries exactly the fields the transition needs.
fn validate_update(
    expected: JobState,
    new: JobState,
    update: &JobUpdate,
) -> Result<(), StoreError> {
    if !expected.can_transition_to(new) {
        return Err(StoreError::InvalidTransition {
            from: expected,
            to: new,
        });
    }

    let submitting = expected == JobState::New && new == JobState::Submitted;
    match (&update.remote_job_id, submitting) {
        (Some(id), true) if id.trim().is_empty() => {
            return Err(StoreError::InvalidUpdate(
                "remote_job_id must not be empty".to_string(),
            ))
        }
        (None, true) => {
            return Err(StoreError::InvalidUpdate(
                "remote_job_id is required on submission".to_string(),
            ))
        }
        (Some(_), false) => {
            return Err(StoreError::InvalidUpdate(
                "remote_job_id can only be set on submission".to_string(),
            ))
        }
        _ => {}
    }

    match (&update.transcript, new == JobState::Succeeded) {
        (None, true) => Err(StoreError::InvalidUpdate(
            "a transcript is required to succeed".to_string(),
        )),
        (Some(_), false) => Err(StoreError::InvalidUpdate(
            "a transcript can only be stored on success".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Applies `update` to `current`, producing the record to store.
fn apply_update(current: &Job, new: JobState, update: &JobUpdate) -> Job {
    let now = Utc::now().max(current.updated_at);
    let state_changed = current.state != new;

    let mut next = current.clone();
    next.state = new;
    next.updated_at = now;
    next.attempts = match update.attempts {
        Some(attempts) => attempts,
        None if state_changed => 0,
        None => current.attempts,
    };

    if let Some(ref id) = update.remote_job_id {
        next.remote_job_id = Some(id.clone());
    }

    if new == JobState::Succeeded {
        next.last_error = None;
        next.result_ref = Some(result_ref_for(&current.fingerprint));
    } else if let Some(ref error) = update.last_error {
        next.last_error = Some(error.clone());
    }

    next.next_poll_at = if new.is_terminal() {
        None
    } else {
        update.next_poll_at
    };

    next
}

fn parse_state(value: &str) -> Result<JobState, DatabaseError> {
    value
        .parse::<JobState>()
        .map_err(|reason| DatabaseError::CorruptValue {
            column: "state".to_string(),
            reason,
        })
}

impl JobStore for SqliteJobStore {
    fn create_if_absent(&self, draft: &JobDraft) -> Result<(Job, bool), StoreError> {
        let now = Utc::now();
        let job = Job {
            fingerprint: draft.fingerprint.clone(),
            channel: draft.channel.clone(),
            episode_id: draft.episode_id.clone(),
            audio_locator: draft.audio_locator.clone(),
            language: draft.language.clone(),
            metadata: draft.metadata.clone(),
            remote_job_id: None,
            state: JobState::New,
            attempts: 0,
            last_error: None,
            result_ref: None,
            next_poll_at: None,
            created_at: now,
            updated_at: now,
        };
        let row = JobRow::from_job(&job)?;

        let (stored, created) = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let created = job_repo::insert_if_absent(&tx, &row)?;
            let stored = job_repo::find_by_fingerprint(&tx, &row.fingerprint)?.ok_or_else(|| {
                DatabaseError::CorruptValue {
                    column: "fingerprint".to_string(),
                    reason: format!("'{}' vanished after insert", row.fingerprint),
                }
            })?;
            tx.commit()?;
            Ok((stored, created))
        })?;

        if created {
            log::debug!("Created job {} ({})", job.fingerprint, job.channel);
        }

        Ok((Job::try_from(stored)?, created))
    }

    fn transition(
        &self,
        fingerprint: &str,
        expected: JobState,
        new: JobState,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        validate_update(expected, new, &update)?;

        let outcome = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let row = match job_repo::find_by_fingerprint(&tx, fingerprint)? {
                Some(row) => row,
                None => return Ok(Cas::NotFound),
            };
            let actual = parse_state(&row.state)?;
            if actual != expected {
                return Ok(Cas::Stale(actual));
            }

            let current = Job::try_from(row)?;
            let next = apply_update(&current, new, &update);
            let next_row = JobRow::from_job(&next)?;

            if !job_repo::update_if_state(&tx, &next_row, expected.as_str())? {
                let actual = job_repo::find_by_fingerprint(&tx, fingerprint)?
                    .map(|r| parse_state(&r.state))
                    .transpose()?;
                return Ok(actual.map(Cas::Stale).unwrap_or(Cas::NotFound));
            }

            if let Some(ref transcript) = update.transcript {
                let segments = serde_json::to_string(&transcript.segments)
                    .map_err(DatabaseError::encode("segments"))?;
                job_repo::insert_transcript(&tx, fingerprint, &segments, &next_row.updated_at)?;
            }

            tx.commit()?;
            Ok(Cas::Updated(Job::try_from(next_row)?))
        })?;

        match outcome {
            Cas::Updated(job) => {
                log::debug!(
                    "Job {}: {} -> {} (attempts {})",
                    fingerprint,
                    expected,
                    new,
                    job.attempts
                );
                Ok(job)
            }
            Cas::NotFound => Err(StoreError::NotFound(fingerprint.to_string())),
            Cas::Stale(actual) => Err(StoreError::StaleState { expected, actual }),
        }
    }

    fn list_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, StoreError> {
        let rows = self
            .db
            .with_conn(|conn| job_repo::list_by_state(conn, state.as_str(), limit as u64))?;
        let jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn get(&self, fingerprint: &str) -> Result<Job, StoreError> {
        let row = self
            .db
            .with_conn(|conn| job_repo::find_by_fingerprint(conn, fingerprint))?
            .ok_or_else(|| StoreError::NotFound(fingerprint.to_string()))?;
        Ok(Job::try_from(row)?)
    }

    fn query(&self, query: &JobQuery) -> Result<(Vec<Job>, u64), StoreError> {
        let filter = JobFilter {
            state: query.state.map(|s| s.as_str().to_string()),
            channel: query.channel.clone(),
            limit: query.limit,
            offset: query.offset,
            oldest_first: query.oldest_first,
        };
        let (rows, total) = self.db.with_conn(|conn| job_repo::query(conn, &filter))?;
        let jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    fn stats(&self) -> Result<BTreeMap<String, StateCounts>, StoreError> {
        let rows = self
            .db
            .with_conn(job_repo::count_by_channel_and_state)?;

        let mut stats: BTreeMap<String, StateCounts> = BTreeMap::new();
        for (channel, state, count) in rows {
            let state = parse_state(&state)?;
            stats.entry(channel).or_default().insert(state, count);
        }
        Ok(stats)
    }

    fn transcript(&self, fingerprint: &str) -> Result<Option<Transcript>, StoreError> {
        let stored = self
            .db
            .with_conn(|conn| job_repo::find_transcript(conn, fingerprint))?;

        let Some(raw) = stored else {
            return Ok(None);
        };
        let segments: Vec<Segment> =
            serde_json::from_str(&raw).map_err(|e| DatabaseError::CorruptValue {
                column: "segments".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(Transcript { segments }))
    }
}
