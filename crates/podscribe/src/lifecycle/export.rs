use log::{error, info, warn};

use crate::job::{Job, JobState};
use crate::output::TranscriptWriter;
use crate::store::{JobQuery, JobStore, StoreError};

use super::LifecycleError;

const PAGE_SIZE: u64 = 100;

/// Which succeeded jobs to re-emit.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub channel: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub exported: usize,
    /// Matching jobs that are not `Succeeded`.
    pub skipped: usize,
    /// Succeeded jobs without a stored transcript.
    pub missing: usize,
    pub failed: usize,
}

/// Hands the stored transcripts of succeeded jobs to `writer` again.
///
/// Used to recover output after a writer failure. Repeated exports replace
/// earlier files.
pub fn export_transcripts(
    store: &dyn JobStore,
    writer: &dyn TranscriptWriter,
    filter: &ExportFilter,
) -> Result<ExportSummary, LifecycleError> {
    let mut summary = ExportSummary::default();

    if let Some(fingerprint) = &filter.fingerprint {
        let job = match store.get(fingerprint) {
            Ok(job) => job,
            Err(StoreError::NotFound(fingerprint)) => {
                return Err(LifecycleError::JobNotFound(fingerprint))
            }
            Err(e) => return Err(LifecycleError::store(e)),
        };
        let channel_matches = filter
            .channel
            .as_deref()
            .map_or(true, |channel| channel == job.channel);
        if job.state != JobState::Succeeded || !channel_matches {
            warn!(
                "Job {} is '{}' in channel '{}', not exporting",
                job.fingerprint, job.state, job.channel
            );
            summary.skipped += 1;
        } else {
            export_one(store, writer, &job, &mut summary)?;
        }
        return Ok(summary);
    }

    let mut offset = 0;
    loop {
        let query = JobQuery {
            state: Some(JobState::Succeeded),
            channel: filter.channel.clone(),
            limit: Some(PAGE_SIZE),
            offset: Some(offset),
            oldest_first: true,
        };
        let (jobs, total) = store.query(&query).map_err(LifecycleError::store)?;
        if jobs.is_empty() {
            break;
        }
        offset += jobs.len() as u64;
        for job in &jobs {
            export_one(store, writer, job, &mut summary)?;
        }
        if offset >= total {
            break;
        }
    }

    info!(
        "Export finished: {} exported, {} missing, {} failed",
        summary.exported, summary.missing, summary.failed
    );
    Ok(summary)
}

fn export_one(
    store: &dyn JobStore,
    writer: &dyn TranscriptWriter,
    job: &Job,
    summary: &mut ExportSummary,
) -> Result<(), LifecycleError> {
    let transcript = match store.transcript(&job.fingerprint) {
        Ok(Some(transcript)) => transcript,
        Ok(None) => {
            warn!("No stored transcript for succeeded job {}", job.fingerprint);
            summary.missing += 1;
            return Ok(());
        }
        Err(e @ StoreError::Unavailable(_)) => return Err(LifecycleError::store(e)),
        Err(e) => {
            error!("Failed to load transcript for {}: {}", job.fingerprint, e);
            summary.failed += 1;
            return Ok(());
        }
    };

    match writer.write(&job.channel, &job.metadata, &transcript) {
        Ok(()) => summary.exported += 1,
        Err(e) => {
            error!("Failed to export {}: {}", job.fingerprint, e);
            summary.failed += 1;
        }
    }
    Ok(())
}
