//! Job repository: row-level operations on the `jobs` and `transcripts` tables.
//!
//! Functions take a `&Connection` so callers can compose several of them
//! inside one transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, DatabaseError};
use crate::job::{EpisodeMetadata, Job, JobState};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub fingerprint: String,
    pub channel: String,
    pub episode_id: String,
    pub audio_locator: String,
    pub language: String,
    pub metadata: String,
    pub remote_job_id: Option<String>,
    pub state: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub result_ref: Option<String>,
    pub next_poll_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            fingerprint: row.get("fingerprint")?,
            channel: row.get("channel")?,
            episode_id: row.get("episode_id")?,
            audio_locator: row.get("audio_locator")?,
            language: row.get("language")?,
            metadata: row.get("metadata")?,
            remote_job_id: row.get("remote_job_id")?,
            state: row.get("state")?,
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
            result_ref: row.get("result_ref")?,
            next_poll_at: row.get("next_poll_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Encodes a domain job for storage.
    pub fn from_job(job: &Job) -> Result<Self, DatabaseError> {
        let metadata =
            serde_json::to_string(&job.metadata).map_err(DatabaseError::encode("metadata"))?;

        Ok(Self {
            fingerprint: job.fingerprint.clone(),
            channel: job.channel.clone(),
            episode_id: job.episode_id.clone(),
            audio_locator: job.audio_locator.clone(),
            language: job.language.clone(),
            metadata,
            remote_job_id: job.remote_job_id.clone(),
            state: job.state.as_str().to_string(),
            attempts: i64::from(job.attempts),
            last_error: job.last_error.clone(),
            result_ref: job.result_ref.clone(),
            next_poll_at: job.next_poll_at.as_ref().map(format_timestamp),
            created_at: format_timestamp(&job.created_at),
            updated_at: format_timestamp(&job.updated_at),
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<JobState>()
            .map_err(|reason| DatabaseError::CorruptValue {
                column: "state".to_string(),
                reason,
            })?;
        let attempts = u32::try_from(row.attempts).map_err(|e| DatabaseError::CorruptValue {
            column: "attempts".to_string(),
            reason: e.to_string(),
        })?;
        let metadata: EpisodeMetadata =
            serde_json::from_str(&row.metadata).map_err(|e| DatabaseError::CorruptValue {
                column: "metadata".to_string(),
                reason: e.to_string(),
            })?;
        let next_poll_at = row
            .next_poll_at
            .as_deref()
            .map(|v| parse_timestamp("next_poll_at", v))
            .transpose()?;

        Ok(Job {
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
            fingerprint: row.fingerprint,
            channel: row.channel,
            episode_id: row.episode_id,
            audio_locator: row.audio_locator,
            language: row.language,
            metadata,
            remote_job_id: row.remote_job_id,
            state,
            attempts,
            last_error: row.last_error,
            result_ref: row.result_ref,
            next_poll_at,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<String>,
    pub channel: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Order by `updated_at` ascending instead of `created_at` descending.
    pub oldest_first: bool,
}

/// Inserts a job row unless one with the same fingerprint exists.
///
/// Returns `true` if this call inserted the row.
pub fn insert_if_absent(conn: &Connection, job: &JobRow) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT INTO jobs (fingerprint, channel, episode_id, audio_locator, language, metadata,
         remote_job_id, state, attempts, last_error, result_ref, next_poll_at, created_at,
         updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT (fingerprint) DO NOTHING",
        params![
            job.fingerprint,
            job.channel,
            job.episode_id,
            job.audio_locator,
            job.language,
            job.metadata,
            job.remote_job_id,
            job.state,
            job.attempts,
            job.last_error,
            job.result_ref,
            job.next_poll_at,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(inserted == 1)
}

/// Overwrites the mutable columns of a job, but only if its stored state is
/// still `expected_state`.
///
/// Returns `true` if a row was updated.
pub fn update_if_state(
    conn: &Connection,
    job: &JobRow,
    expected_state: &str,
) -> Result<bool, DatabaseError> {
    let updated = conn.execute(
        "UPDATE jobs SET remote_job_id=?2, state=?3, attempts=?4, last_error=?5,
         result_ref=?6, next_poll_at=?7, updated_at=?8
         WHERE fingerprint=?1 AND state=?9",
        params![
            job.fingerprint,
            job.remote_job_id,
            job.state,
            job.attempts,
            job.last_error,
            job.result_ref,
            job.next_poll_at,
            job.updated_at,
            expected_state,
        ],
    )?;
    Ok(updated == 1)
}

/// Finds a job by its fingerprint.
pub fn find_by_fingerprint(
    conn: &Connection,
    fingerprint: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE fingerprint = ?1",
            params![fingerprint],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists jobs in one state, oldest `updated_at` first.
pub fn list_by_state(
    conn: &Connection,
    state: &str,
    limit: u64,
) -> Result<Vec<JobRow>, DatabaseError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs WHERE state = ?1
         ORDER BY updated_at ASC, fingerprint ASC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![state, limit], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(conn: &Connection, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref state) = filter.state {
        conditions.push(format!("state = ?{}", param_values.len() + 1));
        param_values.push(Box::new(state.clone()));
    }
    if let Some(ref channel) = filter.channel {
        conditions.push(format!("channel = ?{}", param_values.len() + 1));
        param_values.push(Box::new(channel.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100).min(i64::MAX as u64) as i64;
    let offset = filter.offset.unwrap_or(0).min(i64::MAX as u64) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let order = if filter.oldest_first {
        "updated_at ASC, fingerprint ASC"
    } else {
        "created_at DESC, fingerprint ASC"
    };
    let query_sql = format!(
        "SELECT * FROM jobs {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
        where_clause,
        order,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows: Vec<JobRow> = stmt
        .query_map(params_ref.as_slice(), JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// Counts jobs grouped by (channel, state), ordered by channel then state.
pub fn count_by_channel_and_state(
    conn: &Connection,
) -> Result<Vec<(String, String, u64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT channel, state, COUNT(*) FROM jobs
         GROUP BY channel, state ORDER BY channel, state",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stores the serialized segments of a finished job.
pub fn insert_transcript(
    conn: &Connection,
    fingerprint: &str,
    segments: &str,
    created_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO transcripts (fingerprint, segments, created_at) VALUES (?1, ?2, ?3)",
        params![fingerprint, segments, created_at],
    )?;
    Ok(())
}

/// Returns the serialized segments of a finished job.
pub fn find_transcript(
    conn: &Connection,
    fingerprint: &str,
) -> Result<Option<String>, DatabaseError> {
    let segments = conn
        .query_row(
            "SELECT segments FROM transcripts WHERE fingerprint = ?1",
            params![fingerprint],
            |r| r.get(0),
        )
        .optional()?;
    Ok(segments)
}
