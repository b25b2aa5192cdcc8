use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;

use super::{format_clock, format_duration, TranscriptWriter};
use crate::error::WriterError;
use crate::job::EpisodeMetadata;
use crate::normalize::Transcript;
use crate::sanitize;

/// Writes `<output>/<channel>/<YYYY-MM-DD>/<title>.md` and `.json`.
pub struct FileTranscriptWriter {
    output_directory: PathBuf,
}

impl FileTranscriptWriter {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Path of the output files without extension.
    pub fn output_stem(&self, channel: &str, episode: &EpisodeMetadata) -> PathBuf {
        let date = episode
            .published
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d")
            .to_string();
        self.output_directory
            .join(sanitize::sanitize_filename(channel))
            .join(date)
            .join(sanitize::sanitize_filename(&episode.title))
    }
}

impl TranscriptWriter for FileTranscriptWriter {
    fn write(
        &self,
        channel: &str,
        episode: &EpisodeMetadata,
        transcript: &Transcript,
    ) -> Result<(), WriterError> {
        let stem = self.output_stem(channel, episode);
        if let Some(dir) = stem.parent() {
            std::fs::create_dir_all(dir).map_err(|e| WriterError::CreateDirectory {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        let markdown = render_markdown(channel, episode, transcript);
        let document = render_json(channel, episode, transcript)?;

        let md_path = with_suffix(&stem, "md");
        write_atomic(&md_path, markdown.as_bytes())?;
        write_atomic(&with_suffix(&stem, "json"), document.as_bytes())?;

        log::info!("Wrote transcript {}", md_path.display());
        Ok(())
    }
}

/// Appends an extension without touching dots already in the title.
fn with_suffix(stem: &Path, extension: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Writes to a sibling temp file, then renames over the target.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), WriterError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    std::fs::write(&tmp, content).map_err(|e| WriterError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(WriterError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

fn render_markdown(channel: &str, episode: &EpisodeMetadata, transcript: &Transcript) -> String {
    let date = episode
        .published
        .map(|p| p.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let duration = episode
        .duration
        .as_deref()
        .map(format_duration)
        .unwrap_or_else(|| "Unknown".to_string());

    let body = transcript
        .segments
        .iter()
        .map(|segment| match segment.speaker {
            Some(speaker) => format!(
                "[{}] **Speaker {}**: {}",
                format_clock(segment.start),
                speaker,
                segment.text
            ),
            None => format!("[{}] {}", format_clock(segment.start), segment.text),
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "# {}\n\n- Published: {}\n- Duration: {}\n- Channel: {}\n\n## Transcript\n\n{}\n",
        episode.title, date, duration, channel, body
    )
}

fn render_json(
    channel: &str,
    episode: &EpisodeMetadata,
    transcript: &Transcript,
) -> Result<String, WriterError> {
    let segments: Vec<_> = transcript
        .segments
        .iter()
        .map(|segment| {
            json!({
                "time": format_clock(segment.start),
                "start": segment.start,
                "end": segment.end,
                "speaker": segment.speaker,
                "text": segment.text,
            })
        })
        .collect();

    let document = json!({
        "title": episode.title,
        "published": episode.published.map(|p| p.to_rfc3339()),
        "duration": episode.duration.as_deref().map(format_duration),
        "channel": channel,
        "transcript": segments,
        "processed_at": Utc::now().to_rfc3339(),
    });

    serde_json::to_string_pretty(&document).map_err(|e| WriterError::Serialize(e.to_string()))
}
