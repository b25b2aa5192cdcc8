//! `podscribe` command line.
//!
//! Each invocation is one short batch run over the job database; cron drives
//! repeated runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use podscribe::config::{default_config_path, load_config, Config};
use podscribe::db::Database;
use podscribe::feed::{FeedReader, FeedSource, RssFeedReader};
use podscribe::job::{Job, JobState};
use podscribe::lifecycle::{
    export_transcripts, Candidate, ExportFilter, PollOptions, PollingEngine, RunControl,
    SubmissionOrchestrator,
};
use podscribe::logging::{init_logging, LogFormat};
use podscribe::output::FileTranscriptWriter;
use podscribe::remote::azure::{AzureBatchClient, AzureClientOptions};
use podscribe::secrets::resolve_secret;
use podscribe::store::{JobQuery, JobStore, SqliteJobStore};

const REGION_ENV_VAR: &str = "AZURE_SPEECH_REGION";

/// A feed given on the command line contributes only its newest episode
/// unless asked otherwise.
const SINGLE_FEED_EPISODES: usize = 1;

#[derive(Parser, Debug)]
#[command(name = "podscribe", version)]
#[command(about = "Submit podcast episodes for batch transcription and collect the results")]
struct Cli {
    /// Config file (default: ~/.podscribe/channels.yaml)
    #[arg(long, global = true, env = "PODSCRIBE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Job database, overrides `database_path` from the config
    #[arg(long, global = true, env = "PODSCRIBE_DB", value_name = "FILE")]
    db: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true, env = "PODSCRIBE_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read feeds and submit new episodes
    Submit {
        /// RSS feed URL; submits every configured channel when omitted
        url: Option<String>,

        /// Channel name for the URL (default: derived from the feed title)
        #[arg(long)]
        name: Option<String>,

        /// Language code for the URL, or "auto"
        #[arg(long, default_value = "auto")]
        lang: String,

        /// Episodes to consider from the URL, newest first
        #[arg(long, requires = "url", default_value_t = SINGLE_FEED_EPISODES)]
        max_episodes: usize,

        /// Only submit this configured channel
        #[arg(long, conflicts_with = "url")]
        channel: Option<String>,
    },

    /// Poll pending jobs and collect finished transcripts
    Poll {
        /// Only poll jobs of this channel
        #[arg(long)]
        channel: Option<String>,

        /// Ignore backoff schedules
        #[arg(long)]
        force: bool,
    },

    /// List jobs, newest first
    List {
        #[arg(long)]
        state: Option<JobState>,

        #[arg(long)]
        channel: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: u64,

        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// Job counts per channel and state
    Stats,

    /// Show one job
    Show { fingerprint: String },

    /// Write stored transcripts of succeeded jobs again
    Export {
        #[arg(long)]
        channel: Option<String>,

        #[arg(long)]
        fingerprint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format).context("Failed to initialize logging")?;

    let config = load_settings(cli.config.as_deref())?;
    let store = Arc::new(open_store(&config, cli.db.as_deref())?);

    let control = RunControl::new();
    let handler = control.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, finishing in-flight jobs");
        handler.request_shutdown();
    })
    .context("Failed to install Ctrl-C handler")?;

    match cli.command {
        Command::Submit {
            url,
            name,
            lang,
            max_episodes,
            channel,
        } => {
            let sources = match url {
                Some(url) => vec![single_feed_source(url, name, lang, max_episodes)],
                None => configured_sources(&config, channel.as_deref())?,
            };
            submit(&config, store, sources, control).await
        }
        Command::Poll { channel, force } => {
            poll(&config, store, PollOptions { channel, force }, control).await
        }
        Command::List {
            state,
            channel,
            limit,
            offset,
        } => list(
            store.as_ref(),
            &JobQuery {
                state,
                channel,
                limit: Some(limit),
                offset: Some(offset),
                oldest_first: false,
            },
        ),
        Command::Stats => stats(store.as_ref()),
        Command::Show { fingerprint } => show(store.as_ref(), &fingerprint),
        Command::Export {
            channel,
            fingerprint,
        } => {
            let writer = FileTranscriptWriter::new(config.resolve_output_directory());
            let summary = export_transcripts(
                store.as_ref(),
                &writer,
                &ExportFilter {
                    channel,
                    fingerprint,
                },
            )?;
            println!(
                "Exported {} transcript(s), {} skipped, {} missing, {} failed",
                summary.exported, summary.skipped, summary.missing, summary.failed
            );
            Ok(())
        }
    }
}

/// Loads the config file. A missing default file means defaults.
fn load_settings(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    match default_config_path() {
        Some(path) if path.exists() => load_config(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        _ => {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn open_store(config: &Config, db_override: Option<&Path>) -> Result<SqliteJobStore> {
    let path = db_override
        .map(Path::to_path_buf)
        .or_else(|| config.resolve_database_path())
        .context("Could not determine database location, pass --db")?;
    let db = Database::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(SqliteJobStore::new(db))
}

fn azure_client(config: &Config) -> Result<AzureBatchClient> {
    let region = std::env::var(REGION_ENV_VAR)
        .ok()
        .filter(|r| !r.trim().is_empty())
        .or_else(|| config.azure.region.clone())
        .with_context(|| format!("No Azure region configured (azure.region or {})", REGION_ENV_VAR))?;
    let key = resolve_secret(
        config.azure.key.as_deref(),
        config.azure.key_file.as_deref(),
        Some(&config.azure.key_env_var),
    )
    .context("Azure speech key not available")?;
    let options = AzureClientOptions::from_config(&config.azure, &config.lifecycle);
    Ok(AzureBatchClient::new(&region, key, options)?)
}

fn single_feed_source(
    url: String,
    name: Option<String>,
    lang: String,
    max_episodes: usize,
) -> (FeedSource, String) {
    let source = FeedSource {
        url,
        channel: name,
        max_episodes,
    };
    (source, lang)
}

fn configured_sources(config: &Config, only: Option<&str>) -> Result<Vec<(FeedSource, String)>> {
    if let Some(name) = only {
        if config.channel(name).is_none() {
            bail!("Channel '{}' is not configured", name);
        }
    }
    let sources: Vec<_> = config
        .channels
        .iter()
        .filter(|c| only.map_or(true, |name| c.name == name))
        .map(|c| {
            (
                FeedSource {
                    url: c.url.clone(),
                    channel: Some(c.name.clone()),
                    max_episodes: c.max_episodes,
                },
                c.language.clone(),
            )
        })
        .collect();
    if sources.is_empty() {
        bail!("No feed URL given and no channels configured");
    }
    Ok(sources)
}

async fn submit(
    config: &Config,
    store: Arc<SqliteJobStore>,
    sources: Vec<(FeedSource, String)>,
    control: RunControl,
) -> Result<()> {
    let client = Arc::new(azure_client(config)?);
    let reader = RssFeedReader::new()?;

    let mut candidates = Vec::new();
    for (source, language) in sources {
        match reader.read(&source).await {
            Ok(feed) => {
                info!(
                    channel = %feed.channel,
                    episodes = feed.entries.len(),
                    "Feed read"
                );
                candidates.extend(
                    feed.entries
                        .into_iter()
                        .map(|entry| Candidate::new(entry, language.clone())),
                );
            }
            Err(e) => warn!(error = %e, "Skipping feed"),
        }
    }

    let orchestrator = SubmissionOrchestrator::from_config(store, client, &config.lifecycle)
        .with_control(control);
    let summary = orchestrator.run(candidates).await?;

    println!(
        "{} candidate(s): {} new, {} already known, {} submitted, {} failed, {} errors, {} interrupted",
        summary.candidates,
        summary.created,
        summary.duplicates,
        summary.submitted,
        summary.failed,
        summary.errors,
        summary.interrupted
    );
    Ok(())
}

async fn poll(
    config: &Config,
    store: Arc<SqliteJobStore>,
    options: PollOptions,
    control: RunControl,
) -> Result<()> {
    let client = Arc::new(azure_client(config)?);
    let writer = Arc::new(FileTranscriptWriter::new(config.resolve_output_directory()));

    let engine = PollingEngine::new(store, client.clone(), client, writer)
        .with_config(&config.lifecycle)
        .with_control(control);
    let summary = engine.run(&options).await?;

    println!(
        "{} pending: {} polled, {} succeeded, {} failed, {} running, {} deferred, {} transient errors",
        summary.pending,
        summary.polled,
        summary.succeeded,
        summary.failed,
        summary.still_running,
        summary.deferred,
        summary.transient_errors
    );
    if summary.write_failures > 0 {
        println!(
            "{} transcript(s) could not be written, run `podscribe export` to retry",
            summary.write_failures
        );
    }
    Ok(())
}

fn list(store: &dyn JobStore, query: &JobQuery) -> Result<()> {
    let (jobs, total) = store.query(query)?;
    for job in &jobs {
        println!(
            "{:<12}  {:<9}  {:<20}  {:>3}  {}  {}",
            &job.fingerprint[..job.fingerprint.len().min(12)],
            job.state,
            job.channel,
            job.attempts,
            job.updated_at.format("%Y-%m-%d %H:%M"),
            job.short_title()
        );
    }
    println!("Showing {} of {} job(s)", jobs.len(), total);
    Ok(())
}

fn stats(store: &dyn JobStore) -> Result<()> {
    let stats = store.stats()?;
    if stats.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    for (channel, counts) in &stats {
        let line: Vec<String> = JobState::ALL
            .iter()
            .filter_map(|state| counts.get(state).map(|n| format!("{}={}", state, n)))
            .collect();
        println!("{:<24} {}", channel, line.join(" "));
    }
    Ok(())
}

fn show(store: &dyn JobStore, fingerprint: &str) -> Result<()> {
    let job = store.get(fingerprint)?;
    print_job(&job);
    if job.state == JobState::Succeeded {
        if let Some(transcript) = store.transcript(&job.fingerprint)? {
            println!(
                "transcript:    {} segment(s), {:.1}s",
                transcript.len(),
                transcript.duration()
            );
        }
    }
    Ok(())
}

fn print_job(job: &Job) {
    println!("fingerprint:   {}", job.fingerprint);
    println!("channel:       {}", job.channel);
    println!("title:         {}", job.metadata.title);
    println!("episode:       {}", job.episode_id);
    println!("language:      {}", job.language);
    println!("state:         {}", job.state);
    println!("attempts:      {}", job.attempts);
    println!(
        "remote job:    {}",
        job.remote_job_id.as_deref().unwrap_or("-")
    );
    println!("result:        {}", job.result_ref.as_deref().unwrap_or("-"));
    println!("last error:    {}", job.last_error.as_deref().unwrap_or("-"));
    if let Some(at) = job.next_poll_at {
        println!("next poll:     {}", at.to_rfc3339());
    }
    println!("created:       {}", job.created_at.to_rfc3339());
    println!("updated:       {}", job.updated_at.to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_args(args: &[&str]) -> (FeedSource, String) {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Submit {
                url: Some(url),
                name,
                lang,
                max_episodes,
                ..
            } => single_feed_source(url, name, lang, max_episodes),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_single_feed_takes_newest_episode_by_default() {
        let (source, lang) = submit_args(&["podscribe", "submit", "https://example.com/feed.xml"]);
        assert_eq!(source.max_episodes, 1);
        assert_eq!(source.url, "https://example.com/feed.xml");
        assert!(source.channel.is_none());
        assert_eq!(lang, "auto");
    }

    #[test]
    fn test_single_feed_episode_count_can_be_raised() {
        let (source, lang) = submit_args(&[
            "podscribe",
            "submit",
            "https://example.com/feed.xml",
            "--max-episodes",
            "5",
            "--name",
            "news",
            "--lang",
            "de-DE",
        ]);
        assert_eq!(source.max_episodes, 5);
        assert_eq!(source.channel.as_deref(), Some("news"));
        assert_eq!(lang, "de-DE");
    }

    #[test]
    fn test_max_episodes_requires_url() {
        assert!(Cli::try_parse_from(["podscribe", "submit", "--max-episodes", "3"]).is_err());
    }
}
