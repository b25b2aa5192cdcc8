//! Conversion of raw remote result payloads into the canonical transcript.
//!
//! Two payload shapes are understood:
//!
//! - the batch speech service's native document (`recognizedPhrases`),
//!   handled in [`azure`];
//! - a generic segment list: `[{"start", "end", "text"}]` objects or
//!   `[start, end, text]` triples, optionally wrapped in `{"segments": [...]}`.
//!
//! Anything else is rejected. Raw payloads never leave this module.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod azure;
pub mod duration;

/// A timed piece of transcribed speech. Offsets are seconds from the start
/// of the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
}

/// A normalized transcript: segments ordered by non-decreasing `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<Segment>,
}

impl Transcript {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// End offset of the last segment, in seconds.
    pub fn duration(&self) -> f64 {
        self.segments.iter().map(|s| s.end).fold(0.0, f64::max)
    }
}

/// The payload cannot be turned into a well-formed transcript.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Unrecognized result shape: {0}")]
    UnrecognizedShape(String),

    #[error("Segment {index}: missing field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Segment {index}: invalid '{field}': {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("Segment {index} starts at {start}s, before the previous segment at {previous}s")]
    OutOfOrder {
        index: usize,
        start: f64,
        previous: f64,
    },

    #[error("Segment {index} ends at {end}s, before it starts at {start}s")]
    EndBeforeStart { index: usize, start: f64, end: f64 },

    #[error("Result contains no transcribed segments")]
    Empty,
}

/// Normalizes a raw result payload.
pub fn normalize(raw: &Value) -> Result<Transcript, NormalizeError> {
    let segments = match raw {
        Value::Object(map) if map.contains_key("recognizedPhrases") => {
            azure::normalize_phrases(raw)?
        }
        Value::Object(map) => match map.get("segments") {
            Some(Value::Array(items)) => generic_segments(items)?,
            Some(_) => {
                return Err(NormalizeError::UnrecognizedShape(
                    "'segments' is not an array".to_string(),
                ))
            }
            None => {
                return Err(NormalizeError::UnrecognizedShape(
                    "object without 'recognizedPhrases' or 'segments'".to_string(),
                ))
            }
        },
        Value::Array(items) => generic_segments(items)?,
        other => {
            return Err(NormalizeError::UnrecognizedShape(format!(
                "expected object or array, got {}",
                json_kind(other)
            )))
        }
    };

    validate(&segments)?;

    Ok(Transcript { segments })
}

/// Checks the ordering and timing invariants of a segment list.
pub fn validate(segments: &[Segment]) -> Result<(), NormalizeError> {
    if segments.is_empty() {
        return Err(NormalizeError::Empty);
    }

    let mut previous: Option<f64> = None;
    for (index, segment) in segments.iter().enumerate() {
        for (field, value) in [("start", segment.start), ("end", segment.end)] {
            if !value.is_finite() {
                return Err(NormalizeError::InvalidField {
                    index,
                    field,
                    reason: format!("{} is not a finite time", value),
                });
            }
        }
        if segment.end < segment.start {
            return Err(NormalizeError::EndBeforeStart {
                index,
                start: segment.start,
                end: segment.end,
            });
        }
        if let Some(prev) = previous {
            if segment.start < prev {
                return Err(NormalizeError::OutOfOrder {
                    index,
                    start: segment.start,
                    previous: prev,
                });
            }
        }
        previous = Some(segment.start);
    }

    Ok(())
}

fn generic_segments(items: &[Value]) -> Result<Vec<Segment>, NormalizeError> {
    let mut segments = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let (start, end, text, speaker) = match item {
            Value::Object(map) => {
                let start = map
                    .get("start")
                    .or_else(|| map.get("start_offset"))
                    .ok_or(NormalizeError::MissingField {
                        index,
                        field: "start",
                    })?;
                let end = map
                    .get("end")
                    .or_else(|| map.get("end_offset"))
                    .ok_or(NormalizeError::MissingField {
                        index,
                        field: "end",
                    })?;
                let text = map.get("text").ok_or(NormalizeError::MissingField {
                    index,
                    field: "text",
                })?;
                (start, end, text, map.get("speaker"))
            }
            Value::Array(parts) if parts.len() == 3 => (&parts[0], &parts[1], &parts[2], None),
            other => {
                return Err(NormalizeError::InvalidField {
                    index,
                    field: "segment",
                    reason: format!("expected object or 3-element array, got {}", json_kind(other)),
                })
            }
        };

        let start = seconds(index, "start", start)?;
        let end = seconds(index, "end", end)?;
        let text = text
            .as_str()
            .ok_or_else(|| NormalizeError::InvalidField {
                index,
                field: "text",
                reason: format!("expected string, got {}", json_kind(text)),
            })?
            .trim()
            .to_string();
        let speaker = match speaker {
            None | Some(Value::Null) => None,
            Some(value) => Some(speaker_id(index, value)?),
        };

        if text.is_empty() {
            continue;
        }

        segments.push(Segment {
            start,
            end,
            text,
            speaker,
        });
    }

    Ok(segments)
}

fn seconds(index: usize, field: &'static str, value: &Value) -> Result<f64, NormalizeError> {
    let secs = value.as_f64().ok_or_else(|| NormalizeError::InvalidField {
        index,
        field,
        reason: format!("expected number, got {}", json_kind(value)),
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(NormalizeError::InvalidField {
            index,
            field,
            reason: format!("{} is not a non-negative offset", secs),
        });
    }
    Ok(secs)
}

pub(crate) fn speaker_id(index: usize, value: &Value) -> Result<u32, NormalizeError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| NormalizeError::InvalidField {
            index,
            field: "speaker",
            reason: format!("expected small non-negative integer, got {}", value),
        })
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_generic_segment() {
        let raw = json!([{"start": 0.0, "end": 5.2, "text": "hello"}]);
        let transcript = normalize(&raw).unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.segments[0].start, 0.0);
        assert_eq!(transcript.segments[0].end, 5.2);
        assert_eq!(transcript.segments[0].text, "hello");
        assert_eq!(transcript.segments[0].speaker, None);
    }

    #[test]
    fn test_triples_and_wrapped_segments() {
        let raw = json!([[0.0, 1.5, "one"], [1.5, 3.0, "two"]]);
        assert_eq!(normalize(&raw).unwrap().len(), 2);

        let raw = json!({"segments": [{"start_offset": 2, "end_offset": 4, "text": "x", "speaker": 1}]});
        let transcript = normalize(&raw).unwrap();
        assert_eq!(transcript.segments[0].start, 2.0);
        assert_eq!(transcript.segments[0].speaker, Some(1));
    }

    #[test]
    fn test_equal_starts_are_allowed() {
        let raw = json!([
            {"start": 1.0, "end": 2.0, "text": "a"},
            {"start": 1.0, "end": 1.5, "text": "b"}
        ]);
        assert!(normalize(&raw).is_ok());
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let raw = json!([{"start": 0.0, "text": "hello"}]);
        assert_eq!(
            normalize(&raw).unwrap_err(),
            NormalizeError::MissingField {
                index: 0,
                field: "end"
            }
        );

        let raw = json!([{"start": 0.0, "end": 1.0}]);
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::MissingField { field: "text", .. }
        ));
    }

    #[test]
    fn test_out_of_order_is_malformed() {
        let raw = json!([
            {"start": 5.0, "end": 6.0, "text": "later"},
            {"start": 1.0, "end": 2.0, "text": "earlier"}
        ]);
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::OutOfOrder { index: 1, .. }
        ));
    }

    #[test]
    fn test_end_before_start_is_malformed() {
        let raw = json!([{"start": 3.0, "end": 2.0, "text": "x"}]);
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::EndBeforeStart { index: 0, .. }
        ));
    }

    #[test]
    fn test_invalid_values_are_malformed() {
        let raw = json!([{"start": "zero", "end": 1.0, "text": "x"}]);
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::InvalidField { field: "start", .. }
        ));

        let raw = json!([{"start": -1.0, "end": 1.0, "text": "x"}]);
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::InvalidField { field: "start", .. }
        ));

        let raw = json!([{"start": 0.0, "end": 1.0, "text": 42}]);
        assert!(matches!(
            normalize(&raw).unwrap_err(),
            NormalizeError::InvalidField { field: "text", .. }
        ));
    }

    #[test]
    fn test_non_finite_times_are_rejected() {
        let segments = vec![Segment {
            start: 1.0,
            end: f64::INFINITY,
            text: "x".to_string(),
            speaker: None,
        }];
        assert!(matches!(
            validate(&segments).unwrap_err(),
            NormalizeError::InvalidField { index: 0, field: "end", .. }
        ));
    }

    #[test]
    fn test_empty_results_are_malformed() {
        assert_eq!(normalize(&json!([])).unwrap_err(), NormalizeError::Empty);
        assert_eq!(
            normalize(&json!([{"start": 0, "end": 1, "text": "   "}])).unwrap_err(),
            NormalizeError::Empty
        );
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert!(matches!(
            normalize(&json!("text")).unwrap_err(),
            NormalizeError::UnrecognizedShape(_)
        ));
        assert!(matches!(
            normalize(&json!({"foo": 1})).unwrap_err(),
            NormalizeError::UnrecognizedShape(_)
        ));
        assert!(matches!(
            normalize(&json!({"segments": "nope"})).unwrap_err(),
            NormalizeError::UnrecognizedShape(_)
        ));
    }

    #[test]
    fn test_transcript_duration() {
        let raw = json!([[0.0, 1.5, "one"], [1.0, 9.25, "two"]]);
        assert_eq!(normalize(&raw).unwrap().duration(), 9.25);
    }
}
