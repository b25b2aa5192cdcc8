//! Normalization of the batch speech service's native result document.
//!
//! ```json
//! {"recognizedPhrases": [
//!   {"offset": "PT1.2S", "duration": "PT3S", "offsetInTicks": 12000000,
//!    "speaker": 1, "nBest": [{"display": "Hello there."}]}
//! ]}
//! ```

use serde_json::{Map, Value};

use super::duration::{parse_iso8601, ticks_to_seconds};
use super::{json_kind, speaker_id, NormalizeError, Segment};

/// Extracts segments from `recognizedPhrases`.
///
/// Phrases from different audio channels are interleaved in the document,
/// so the result is stably ordered by start offset. Phrases whose best
/// hypothesis is empty are dropped.
pub fn normalize_phrases(raw: &Value) -> Result<Vec<Segment>, NormalizeError> {
    let phrases = raw
        .get("recognizedPhrases")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            NormalizeError::UnrecognizedShape("'recognizedPhrases' is not an array".to_string())
        })?;

    let mut segments = Vec::with_capacity(phrases.len());

    for (index, phrase) in phrases.iter().enumerate() {
        let phrase = phrase
            .as_object()
            .ok_or_else(|| NormalizeError::InvalidField {
                index,
                field: "phrase",
                reason: format!("expected object, got {}", json_kind(phrase)),
            })?;

        let start = offset(index, phrase, "offset", "offsetInTicks")?;
        let length = offset(index, phrase, "duration", "durationInTicks")?;
        let text = best_display(index, phrase)?;
        let speaker = match phrase.get("speaker") {
            None | Some(Value::Null) => None,
            Some(value) => Some(speaker_id(index, value)?),
        };

        if text.is_empty() {
            continue;
        }

        segments.push(Segment {
            start,
            end: start + length,
            text,
            speaker,
        });
    }

    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    Ok(segments)
}

/// Reads a time value, preferring the ISO 8601 string over the tick count.
fn offset(
    index: usize,
    phrase: &Map<String, Value>,
    iso_field: &'static str,
    ticks_field: &'static str,
) -> Result<f64, NormalizeError> {
    if let Some(value) = phrase.get(iso_field) {
        let text = value.as_str().ok_or_else(|| NormalizeError::InvalidField {
            index,
            field: iso_field,
            reason: format!("expected string, got {}", json_kind(value)),
        })?;
        return parse_iso8601(text).ok_or_else(|| NormalizeError::InvalidField {
            index,
            field: iso_field,
            reason: format!("'{}' is not an ISO 8601 duration", text),
        });
    }

    if let Some(value) = phrase.get(ticks_field) {
        let ticks = value.as_u64().ok_or_else(|| NormalizeError::InvalidField {
            index,
            field: ticks_field,
            reason: format!("expected non-negative integer, got {}", value),
        })?;
        return Ok(ticks_to_seconds(ticks));
    }

    Err(NormalizeError::MissingField {
        index,
        field: iso_field,
    })
}

fn best_display(index: usize, phrase: &Map<String, Value>) -> Result<String, NormalizeError> {
    let best = phrase
        .get("nBest")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .ok_or(NormalizeError::MissingField {
            index,
            field: "nBest",
        })?;

    let display = best.get("display").ok_or(NormalizeError::MissingField {
        index,
        field: "display",
    })?;

    display
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| NormalizeError::InvalidField {
            index,
            field: "display",
            reason: format!("expected string, got {}", json_kind(display)),
        })
}

#[cfg(test)]
mod tests {
    use super::super::normalize;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phrases_become_segments() {
        let raw = json!({
            "recognizedPhrases": [
                {"offset": "PT0S", "duration": "PT5.2S", "nBest": [{"display": "hello"}]},
                {"offset": "PT6S", "duration": "PT1S", "speaker": 2,
                 "nBest": [{"display": "world"}, {"display": "word"}]}
            ]
        });

        let transcript = normalize(&raw).unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.segments[0].text, "hello");
        assert!((transcript.segments[0].end - 5.2).abs() < 1e-9);
        assert_eq!(transcript.segments[1].text, "world");
        assert_eq!(transcript.segments[1].speaker, Some(2));
    }

    #[test]
    fn test_ticks_fallback() {
        let raw = json!({
            "recognizedPhrases": [
                {"offsetInTicks": 10000000u64, "durationInTicks": 5000000u64,
                 "nBest": [{"display": "tick"}]}
            ]
        });
        let transcript = normalize(&raw).unwrap();
        assert!((transcript.segments[0].start - 1.0).abs() < 1e-9);
        assert!((transcript.segments[0].end - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_interleaved_channels_are_ordered() {
        let raw = json!({
            "recognizedPhrases": [
                {"channel": 0, "offset": "PT10S", "duration": "PT1S", "nBest": [{"display": "b"}]},
                {"channel": 1, "offset": "PT2S", "duration": "PT1S", "nBest": [{"display": "a"}]}
            ]
        });
        let transcript = normalize(&raw).unwrap();
        assert_eq!(transcript.segments[0].text, "a");
        assert_eq!(transcript.segments[1].text, "b");
    }

    #[test]
    fn test_empty_display_is_dropped() {
        let raw = json!({
            "recognizedPhrases": [
                {"offset": "PT0S", "duration": "PT1S", "nBest": [{"display": ""}]},
                {"offset": "PT1S", "duration": "PT1S", "nBest": [{"display": "kept"}]}
            ]
        });
        let transcript = normalize(&raw).unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.segments[0].text, "kept");
    }

    #[test]
    fn test_missing_offset_is_malformed() {
        let raw = json!({
            "recognizedPhrases": [{"duration": "PT1S", "nBest": [{"display": "x"}]}]
        });
        assert_eq!(
            normalize(&raw).unwrap_err(),
            NormalizeError::MissingField {
                index: 0,
                field: "offset"
            }
        );
    }

    #[test]
    fn test_missing_nbest_is_malformed() {
        let raw = json!({
            "recognizedPhrases": [{"offset": "PT0S", "duration": "PT1S", "nBest": []}]
        });
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::MissingField { field: "nBest", .. }
        ));
    }

    #[test]
    fn test_bad_duration_is_malformed() {
        let raw = json!({
            "recognizedPhrases": [{"offset": "soon", "duration": "PT1S", "nBest": [{"display": "x"}]}]
        });
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::InvalidField { field: "offset", .. }
        ));
    }

    #[test]
    fn test_overflowing_offset_is_malformed() {
        let huge = format!("P1{}D", "0".repeat(307));
        let raw = json!({
            "recognizedPhrases": [{"offset": huge, "duration": "PT1S", "nBest": [{"display": "x"}]}]
        });
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::InvalidField { field: "offset", .. }
        ));
    }

    #[test]
    fn test_offset_plus_duration_overflow_is_malformed() {
        let near_max = format!("P15{}D", "0".repeat(302));
        let raw = json!({
            "recognizedPhrases": [{"offset": near_max, "duration": near_max, "nBest": [{"display": "x"}]}]
        });
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::InvalidField { field: "end", .. }
        ));
    }

    #[test]
    fn test_no_phrases_is_empty() {
        let raw = json!({"recognizedPhrases": []});
        assert_eq!(normalize(&raw).unwrap_err(), NormalizeError::Empty);
    }
}
