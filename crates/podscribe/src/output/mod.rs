//! Delivery of finished transcripts.

use crate::error::WriterError;
use crate::job::EpisodeMetadata;
use crate::normalize::Transcript;

pub mod files;

pub use files::FileTranscriptWriter;

/// Receives each transcript once its job has succeeded.
///
/// Repeated writes of the same episode replace earlier output.
pub trait TranscriptWriter: Send + Sync {
    fn write(
        &self,
        channel: &str,
        episode: &EpisodeMetadata,
        transcript: &Transcript,
    ) -> Result<(), WriterError>;
}

/// Formats an offset in seconds as `HH:MM:SS`, truncating fractions.
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Formats a feed-provided duration. Plain second counts become
/// `HH:MM:SS` (or `MM:SS` under an hour); anything else is kept as is.
pub fn format_duration(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return "Unknown".to_string();
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }
    let Ok(seconds) = raw.parse::<u64>() else {
        return raw.to_string();
    };

    let (hours, minutes, secs) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "00:00:00");
        assert_eq!(format_clock(5.9), "00:00:05");
        assert_eq!(format_clock(3723.4), "01:02:03");
        assert_eq!(format_clock(-1.0), "00:00:00");
        assert_eq!(format_clock(f64::NAN), "00:00:00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration("3600"), "01:00:00");
        assert_eq!(format_duration("125"), "02:05");
        assert_eq!(format_duration("45:30"), "45:30");
        assert_eq!(format_duration(""), "Unknown");
        assert_eq!(format_duration(" 59 "), "00:59");
    }
}
