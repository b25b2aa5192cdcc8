//! RSS 2.0 (and Atom-style) podcast feed reader.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;

use super::{Feed, FeedEntry, FeedError, FeedReader, FeedSource};
use crate::job::EpisodeMetadata;
use crate::sanitize;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum length of a channel name derived from a feed title.
const CHANNEL_NAME_MAX_LEN: usize = 50;

/// Fetches feeds over HTTP.
pub struct RssFeedReader {
    client: Client,
}

impl RssFeedReader {
    pub fn new() -> Result<Self, FeedError> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeouts(connect: Duration, request: Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .build()
            .map_err(|e| FeedError::Fetch {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedReader for RssFeedReader {
    async fn read(&self, source: &FeedSource) -> Result<Feed, FeedError> {
        let url = sanitize::redact_url(&source.url);
        log::info!("Fetching feed {}", url);

        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| FeedError::Fetch {
                url: url.clone(),
                reason: e.without_url().to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FeedError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FeedError::Fetch {
            url: url.clone(),
            reason: e.without_url().to_string(),
        })?;

        let feed = parse_feed(&body, source)?;
        log::info!(
            "Feed {} ({}): {} episode(s) with audio",
            url,
            feed.channel,
            feed.entries.len()
        );
        Ok(feed)
    }
}

/// Item elements whose text we keep.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    ChannelTitle,
    Title,
    Guid,
    Link,
    Published,
    Duration,
    Description,
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: Option<String>,
    guid: Option<String>,
    link: Option<String>,
    published: Option<String>,
    duration: Option<String>,
    description: Option<String>,
    audio_link: Option<String>,
    audio_enclosure: Option<String>,
}

impl ItemBuilder {
    fn set(&mut self, field: Field, value: String) {
        if value.is_empty() {
            return;
        }
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Guid => &mut self.guid,
            Field::Link => &mut self.link,
            Field::Published => &mut self.published,
            Field::Duration => &mut self.duration,
            Field::Description => &mut self.description,
            Field::ChannelTitle => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Records an `<enclosure>` or `<link>` element that points at audio.
    fn add_audio(&mut self, element: &[u8], e: &BytesStart<'_>) -> Result<(), FeedError> {
        let mut url = None;
        let mut is_audio = false;

        for attr in e.attributes() {
            let attr = attr.map_err(|e| FeedError::Parse(e.to_string()))?;
            let raw = String::from_utf8_lossy(&attr.value);
            let value = quick_xml::escape::unescape(&raw)
                .map_err(|e| FeedError::Parse(e.to_string()))?
                .into_owned();
            match attr.key.local_name().as_ref() {
                b"url" | b"href" => url = Some(value),
                b"type" => is_audio = value.trim().to_ascii_lowercase().starts_with("audio/"),
                _ => {}
            }
        }

        let Some(url) = url.filter(|u| !u.trim().is_empty()).filter(|_| is_audio) else {
            return Ok(());
        };
        let slot = if element == b"link" {
            &mut self.audio_link
        } else {
            &mut self.audio_enclosure
        };
        if slot.is_none() {
            *slot = Some(url.trim().to_string());
        }
        Ok(())
    }

    /// Builds an entry. Items without audio are dropped.
    fn finish(self, channel: &str) -> Option<FeedEntry> {
        let audio = self.audio_link.or(self.audio_enclosure)?;
        let guid_or_url = self
            .guid
            .or(self.link)
            .unwrap_or_else(|| audio.clone());
        let published = self
            .published
            .as_deref()
            .and_then(|p| DateTime::parse_from_rfc2822(p).ok())
            .map(|p| p.with_timezone(&Utc));

        Some(FeedEntry {
            guid_or_url,
            channel: channel.to_string(),
            audio_locator: audio,
            metadata: EpisodeMetadata {
                title: self.title.unwrap_or_else(|| "Untitled".to_string()),
                published,
                duration: self.duration,
                description: self.description,
            },
        })
    }
}

fn item_field(name: &[u8]) -> Option<Field> {
    match name {
        b"title" => Some(Field::Title),
        b"guid" | b"id" => Some(Field::Guid),
        b"pubDate" | b"published" => Some(Field::Published),
        b"duration" => Some(Field::Duration),
        b"description" | b"summary" => Some(Field::Description),
        _ => None,
    }
}

/// Parses a feed document. At most `source.max_episodes` items are
/// considered, in document order.
pub fn parse_feed(xml: &str, source: &FeedSource) -> Result<Feed, FeedError> {
    let mut reader = Reader::from_str(xml);

    let mut channel_title: Option<String> = None;
    let mut items: Vec<ItemBuilder> = Vec::new();
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();
    let mut in_image = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let local_name = e.local_name();
                let name = local_name.as_ref();
                let in_item = current.is_some();
                match name {
                    b"item" | b"entry" => {
                        if items.len() >= source.max_episodes {
                            break;
                        }
                        current = Some(ItemBuilder::default());
                    }
                    b"image" if !in_item => in_image = true,
                    b"title" if !in_item => {
                        if !in_image && channel_title.is_none() {
                            field = Some(Field::ChannelTitle);
                        }
                    }
                    b"enclosure" | b"link" => {
                        if let Some(item) = current.as_mut() {
                            item.add_audio(name, e)?;
                            if name == b"link" {
                                field = Some(Field::Link);
                            }
                        }
                    }
                    _ if in_item => field = item_field(name),
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Empty(ref e)) => {
                let local_name = e.local_name();
                let name = local_name.as_ref();
                if let Some(item) = current.as_mut() {
                    if name == b"enclosure" || name == b"link" {
                        item.add_audio(name, e)?;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let decoded = e.xml_content().map_err(|e| FeedError::Parse(e.to_string()))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if field.is_some() {
                    if let Some(ch) = e
                        .resolve_char_ref()
                        .map_err(|e| FeedError::Parse(e.to_string()))?
                    {
                        text.push(ch);
                    } else {
                        let entity = e.decode().map_err(|e| FeedError::Parse(e.to_string()))?;
                        if let Some(resolved) = resolve_predefined_entity(&entity) {
                            text.push_str(resolved);
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local_name = e.local_name();
                match local_name.as_ref() {
                    b"item" | b"entry" => {
                        if let Some(item) = current.take() {
                            items.push(item);
                        }
                    }
                    b"image" => in_image = false,
                    _ => {}
                }
                if let Some(done) = field.take() {
                    let value = text.trim().to_string();
                    match (done, current.as_mut()) {
                        (Field::ChannelTitle, _) if !value.is_empty() => {
                            channel_title = Some(value)
                        }
                        (other, Some(item)) => item.set(other, value),
                        _ => {}
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FeedError::Parse(format!(
                    "XML error at position {}: {}",
                    reader.error_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if channel_title.is_none() && items.is_empty() && !xml.contains("<rss") && !xml.contains("<feed") {
        return Err(FeedError::Parse("document is not an RSS or Atom feed".to_string()));
    }

    let channel = source
        .channel
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| channel_name_from_title(channel_title.as_deref()));

    let entries = items
        .into_iter()
        .filter_map(|item| item.finish(&channel))
        .collect();

    Ok(Feed {
        channel,
        title: channel_title,
        entries,
    })
}

/// Derives a channel name from a feed title: a lowercase slug of at most
/// 50 characters, or `"unknown"`.
pub fn channel_name_from_title(title: Option<&str>) -> String {
    title
        .map(|t| sanitize::slugify(t, CHANNEL_NAME_MAX_LEN))
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
