//! The job record tracked through the transcription lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::FeedEntry;
use crate::fingerprint::fingerprint;

/// Lifecycle state of a job.
///
/// `New → Submitted → Polling → Succeeded | Failed`, plus `New → Failed`
/// when the remote service refuses the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Submitted,
    Polling,
    Succeeded,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::New,
        JobState::Submitted,
        JobState::Polling,
        JobState::Succeeded,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Submitted => "submitted",
            JobState::Polling => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    /// Terminal records are never mutated by the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether the pipeline may move a record from `self` to `next`.
    ///
    /// Self-transitions on `Submitted` and `Polling` are allowed: they record
    /// a poll attempt without changing the state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (New, Submitted)
                | (New, Failed)
                | (Submitted, Submitted)
                | (Submitted, Polling)
                | (Polling, Polling)
                | (Polling, Succeeded)
                | (Polling, Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(JobState::New),
            "submitted" => Ok(JobState::Submitted),
            "polling" => Ok(JobState::Polling),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Descriptive episode data carried alongside a job for the writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub title: String,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    /// Raw duration as published by the feed (seconds or `HH:MM:SS`).
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Everything needed to create a job record.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDraft {
    pub fingerprint: String,
    pub channel: String,
    pub episode_id: String,
    pub audio_locator: String,
    pub language: String,
    pub metadata: EpisodeMetadata,
}

impl JobDraft {
    /// Builds a draft from a feed entry. The fingerprint is computed here and
    /// never again for the lifetime of the record.
    pub fn from_entry(entry: &FeedEntry, language: &str) -> Self {
        Self {
            fingerprint: fingerprint(&entry.channel, &entry.guid_or_url),
            channel: entry.channel.clone(),
            episode_id: entry.guid_or_url.clone(),
            audio_locator: entry.audio_locator.clone(),
            language: normalize_language(language),
            metadata: entry.metadata.clone(),
        }
    }
}

/// `""` and any casing of `auto` mean automatic language identification.
fn normalize_language(language: &str) -> String {
    let trimmed = language.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
        "auto".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub fingerprint: String,
    pub channel: String,
    pub episode_id: String,
    pub audio_locator: String,
    pub language: String,
    pub metadata: EpisodeMetadata,
    pub remote_job_id: Option<String>,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub result_ref: Option<String>,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether a poll run should look at this job at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_poll_at.map(|at| at <= now).unwrap_or(true)
    }

    /// Short display title for logs.
    pub fn short_title(&self) -> String {
        let title = if self.metadata.title.is_empty() {
            self.episode_id.as_str()
        } else {
            self.metadata.title.as_str()
        };
        title.chars().take(40).collect()
    }
}
