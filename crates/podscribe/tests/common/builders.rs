//! Builders for feed entries, candidates and result payloads.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use podscribe::feed::FeedEntry;
use podscribe::fingerprint::fingerprint;
use podscribe::job::EpisodeMetadata;
use podscribe::lifecycle::Candidate;

pub struct EntryBuilder {
    channel: String,
    guid: String,
    audio: Option<String>,
    title: Option<String>,
    language: String,
}

impl EntryBuilder {
    pub fn new(guid: &str) -> Self {
        Self {
            channel: "daily-news".to_string(),
            guid: guid.to_string(),
            audio: None,
            title: None,
            language: "auto".to_string(),
        }
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    pub fn audio(mut self, url: &str) -> Self {
        self.audio = Some(url.to_string());
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.channel, &self.guid)
    }

    pub fn entry(&self) -> FeedEntry {
        FeedEntry {
            guid_or_url: self.guid.clone(),
            channel: self.channel.clone(),
            audio_locator: self
                .audio
                .clone()
                .unwrap_or_else(|| format!("https://cdn.example.com/{}.mp3", self.guid)),
            metadata: EpisodeMetadata {
                title: self
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("Episode {}", self.guid)),
                published: Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).single(),
                duration: Some("1834".to_string()),
                description: None,
            },
        }
    }

    pub fn candidate(&self) -> Candidate {
        Candidate::new(self.entry(), self.language.clone())
    }
}

/// `[start, end, text]` triples.
pub fn triples_payload(segments: &[(f64, f64, &str)]) -> Value {
    Value::Array(
        segments
            .iter()
            .map(|(start, end, text)| json!([start, end, text]))
            .collect(),
    )
}

/// A minimal batch speech result document.
pub fn azure_payload(phrases: &[(&str, &str, &str)]) -> Value {
    let phrases: Vec<Value> = phrases
        .iter()
        .map(|(offset, duration, text)| {
            json!({
                "offset": offset,
                "duration": duration,
                "nBest": [{ "display": text }],
            })
        })
        .collect();
    json!({ "recognizedPhrases": phrases })
}
