//! Structured event schema for the stream and file pipelines' callback and
//! event-sink surface.
//!
//! Events are modeled as a sealed enum rather than untyped dicts, with
//! serialization to the dict form only at the external boundary
//! (`to_dict`/`normalize_to_event_dict`), matching how [`crate::vad::VadConfig`]
//! already draws that line.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, TranscriptionError};

/// Current wall-clock time as Unix seconds, for event `timestamp` fields.
pub(crate) fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// `phase` discriminant carried by `transcription` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionPhase {
    Interim,
    Final,
}

/// `status` discriminant carried by `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPhase {
    Processing,
    Ready,
    Idle,
}

/// `destination` carried by `subtitle` events: `obs`, `vrchat`, and
/// whatever else a caller integrates with — an open set, so this stays a
/// plain string rather than a closed enum.
pub type SubtitleDestination = String;

/// Sealed event variant set. Each variant carries exactly
/// its required fields as typed struct members plus an `metadata` bag for
/// the optional free-form payload every variant accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Transcription {
        text: String,
        source_id: String,
        is_final: bool,
        timestamp: f64,
        confidence: Option<f32>,
        language: Option<String>,
        phase: Option<TranscriptionPhase>,
        display_text: Option<String>,
        speech_probability: Option<f32>,
        audio_quality: Option<f32>,
        noise_level: Option<f32>,
        metadata: Option<Value>,
    },
    Status {
        status_code: String,
        message: String,
        timestamp: f64,
        source_id: String,
        phase: Option<StatusPhase>,
        metadata: Option<Value>,
    },
    Error {
        error_code: String,
        message: String,
        timestamp: f64,
        source_id: String,
        error_details: Option<Value>,
        metadata: Option<Value>,
    },
    TranslationRequest {
        text: String,
        source_id: String,
        source_language: String,
        target_language: String,
        timestamp: f64,
        metadata: Option<Value>,
    },
    TranslationResult {
        original_text: String,
        translated_text: String,
        source_id: String,
        source_language: String,
        target_language: String,
        timestamp: f64,
        confidence: Option<f32>,
        metadata: Option<Value>,
    },
    Subtitle {
        text: String,
        source_id: String,
        timestamp: f64,
        destination: SubtitleDestination,
        is_translated: Option<bool>,
        metadata: Option<Value>,
    },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Transcription { .. } => "transcription",
            Event::Status { .. } => "status",
            Event::Error { .. } => "error",
            Event::TranslationRequest { .. } => "translation-request",
            Event::TranslationResult { .. } => "translation-result",
            Event::Subtitle { .. } => "subtitle",
        }
    }

    /// Serializes to the dict form used at the external boundary.
    pub fn to_dict(&self) -> Value {
        let mut obj = match self {
            Event::Transcription {
                text,
                source_id,
                is_final,
                timestamp,
                confidence,
                language,
                phase,
                display_text,
                speech_probability,
                audio_quality,
                noise_level,
                metadata,
            } => json!({
                "text": text,
                "source_id": source_id,
                "is_final": is_final,
                "timestamp": timestamp,
                "confidence": confidence,
                "language": language,
                "phase": phase,
                "display_text": display_text,
                "speech_probability": speech_probability,
                "audio_quality": audio_quality,
                "noise_level": noise_level,
                "metadata": metadata,
            }),
            Event::Status {
                status_code,
                message,
                timestamp,
                source_id,
                phase,
                metadata,
            } => json!({
                "status_code": status_code,
                "message": message,
                "timestamp": timestamp,
                "source_id": source_id,
                "phase": phase,
                "metadata": metadata,
            }),
            Event::Error {
                error_code,
                message,
                timestamp,
                source_id,
                error_details,
                metadata,
            } => json!({
                "error_code": error_code,
                "message": message,
                "timestamp": timestamp,
                "source_id": source_id,
                "error_details": error_details,
                "metadata": metadata,
            }),
            Event::TranslationRequest {
                text,
                source_id,
                source_language,
                target_language,
                timestamp,
                metadata,
            } => json!({
                "text": text,
                "source_id": source_id,
                "source_language": source_language,
                "target_language": target_language,
                "timestamp": timestamp,
                "metadata": metadata,
            }),
            Event::TranslationResult {
                original_text,
                translated_text,
                source_id,
                source_language,
                target_language,
                timestamp,
                confidence,
                metadata,
            } => json!({
                "original_text": original_text,
                "translated_text": translated_text,
                "source_id": source_id,
                "source_language": source_language,
                "target_language": target_language,
                "timestamp": timestamp,
                "confidence": confidence,
                "metadata": metadata,
            }),
            Event::Subtitle {
                text,
                source_id,
                timestamp,
                destination,
                is_translated,
                metadata,
            } => json!({
                "text": text,
                "source_id": source_id,
                "timestamp": timestamp,
                "destination": destination,
                "is_translated": is_translated,
                "metadata": metadata,
            }),
        };
        obj["event_type"] = json!(self.event_type());
        strip_nulls(&mut obj);
        obj
    }
}

fn strip_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
    }
}

/// Required keys per event type, used by [`validate_event_dict`].
fn required_keys(event_type: &str) -> Result<&'static [&'static str]> {
    match event_type {
        "transcription" => Ok(&["text", "source_id", "is_final", "timestamp", "event_type"]),
        "status" => Ok(&["status_code", "message", "timestamp", "source_id", "event_type"]),
        "error" => Ok(&["error_code", "message", "timestamp", "source_id", "event_type"]),
        "translation-request" => Ok(&[
            "text",
            "source_id",
            "source_language",
            "target_language",
            "timestamp",
            "event_type",
        ]),
        "translation-result" => Ok(&[
            "original_text",
            "translated_text",
            "source_id",
            "source_language",
            "target_language",
            "timestamp",
            "event_type",
        ]),
        "subtitle" => Ok(&["text", "source_id", "timestamp", "destination", "event_type"]),
        other => Err(TranscriptionError::ConfigInvalid(format!(
            "unknown event_type '{other}'"
        ))),
    }
}

fn known_keys(event_type: &str) -> Result<Vec<&'static str>> {
    let mut keys = required_keys(event_type)?.to_vec();
    let optional: &[&str] = match event_type {
        "transcription" => &[
            "confidence",
            "language",
            "phase",
            "display_text",
            "speech_probability",
            "audio_quality",
            "noise_level",
            "metadata",
        ],
        "status" => &["phase", "metadata"],
        "error" => &["error_details", "metadata"],
        "translation-request" => &["metadata"],
        "translation-result" => &["confidence", "metadata"],
        "subtitle" => &["is_translated", "metadata"],
        _ => &[],
    };
    keys.extend_from_slice(optional);
    Ok(keys)
}

/// Validates a dict-form event against its schema: every required key must
/// be present, and every present key must be known; unknown keys are
/// rejected rather than silently ignored.
pub fn validate_event_dict(value: &Value) -> Result<()> {
    let obj = value.as_object().ok_or_else(|| {
        TranscriptionError::ConfigInvalid("event payload must be a JSON object".into())
    })?;

    let event_type = obj
        .get("event_type")
        .and_then(Value::as_str)
        .ok_or_else(|| TranscriptionError::ConfigInvalid("missing event_type".into()))?;

    let required = required_keys(event_type)?;
    for key in required {
        if !obj.contains_key(*key) {
            return Err(TranscriptionError::ConfigInvalid(format!(
                "event '{event_type}' missing required field '{key}'"
            )));
        }
    }

    let known = known_keys(event_type)?;
    for key in obj.keys() {
        if !known.contains(&key.as_str()) {
            return Err(TranscriptionError::ConfigInvalid(format!(
                "event '{event_type}' has unknown field '{key}'"
            )));
        }
    }

    Ok(())
}

/// Normalizes a legacy payload lacking `event_type` to a `transcription`
/// event, the assumed type for older callers that predate the schema.
pub fn normalize_to_event_dict(mut payload: Value) -> Value {
    if let Value::Object(ref mut map) = payload {
        if !map.contains_key("event_type") {
            map.insert("event_type".to_string(), json!("transcription"));
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_round_trips_through_dict() {
        let event = Event::Transcription {
            text: "hello".into(),
            source_id: "mic-0".into(),
            is_final: true,
            timestamp: 12.5,
            confidence: Some(0.9),
            language: Some("en".into()),
            phase: Some(TranscriptionPhase::Final),
            display_text: None,
            speech_probability: None,
            audio_quality: None,
            noise_level: None,
            metadata: None,
        };
        let dict = event.to_dict();
        assert_eq!(dict["event_type"], "transcription");
        validate_event_dict(&dict).unwrap();
    }

    #[test]
    fn rejects_unknown_field() {
        let dict = json!({
            "event_type": "status",
            "status_code": "ready",
            "message": "ok",
            "timestamp": 1.0,
            "source_id": "s",
            "not_a_real_field": 1
        });
        assert!(validate_event_dict(&dict).is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let dict = json!({
            "event_type": "error",
            "message": "boom",
            "timestamp": 1.0,
            "source_id": "s"
        });
        assert!(validate_event_dict(&dict).is_err());
    }

    #[test]
    fn legacy_payload_normalizes_to_transcription() {
        let legacy = json!({"text": "hi", "source_id": "s", "is_final": true, "timestamp": 1.0});
        let normalized = normalize_to_event_dict(legacy);
        assert_eq!(normalized["event_type"], "transcription");
        assert!(validate_event_dict(&normalized).is_ok());
    }
}
