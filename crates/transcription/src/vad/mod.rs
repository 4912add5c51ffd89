//! Voice activity detection: a pluggable probability backend plus the
//! re-framing/hysteresis/segment-extraction state machine that sits on top
//! of it.

pub mod energy;
pub mod lightweight;
pub mod state_machine;

#[cfg(feature = "onnx")]
pub mod neural;

pub use state_machine::VadStateMachine;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TranscriptionError};

/// A fixed-length slice of audio at the backend's required sample rate and
/// frame size (`VADFrame`). The state machine is responsible for
/// re-framing arbitrary input into these.
pub type VadFrame<'a> = &'a [f32];

/// Polymorphic VAD probability backend.
///
/// Implementations are owned exclusively by one [`VadStateMachine`]; they
/// are not safe to share across streams.
pub trait VadBackend: Send {
    /// Sample rate this backend's frames must be delivered at.
    fn required_sample_rate(&self) -> u32;

    /// Fixed frame length in samples (e.g. 160, 256, 320, 480, 512).
    fn frame_samples(&self) -> usize;

    /// Speech probability for one frame of exactly `frame_samples()` samples.
    fn predict(&mut self, frame: VadFrame<'_>) -> Result<f32>;

    /// Clears any internal recurrent state.
    fn reset(&mut self);
}

/// Hysteresis state machine states (`VADState`). Initial = `Silence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadState {
    #[default]
    Silence,
    PotentialSpeech,
    Speech,
    PotentialSilence,
}

/// Immutable VAD tuning (`VADConfig`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VadConfig {
    pub threshold: f32,
    pub neg_threshold: f32,
    pub min_speech_ms: u64,
    pub min_silence_ms: u64,
    pub speech_pad_ms: u64,
    pub max_speech_ms: u64,
    pub interim_min_duration_ms: u64,
    pub interim_interval_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        let threshold = 0.5;
        Self {
            threshold,
            neg_threshold: default_neg_threshold(threshold),
            min_speech_ms: 250,
            min_silence_ms: 100,
            speech_pad_ms: 100,
            max_speech_ms: 0,
            interim_min_duration_ms: 2000,
            interim_interval_ms: 1000,
        }
    }
}

/// `neg_threshold` default: `threshold - 0.15`, floored at `0.01`.
pub fn default_neg_threshold(threshold: f32) -> f32 {
    (threshold - 0.15).max(0.01)
}

impl VadConfig {
    /// A config with every field defaulted except `threshold`, whose
    /// `neg_threshold` is derived via [`default_neg_threshold`].
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            neg_threshold: default_neg_threshold(threshold),
            ..Self::default()
        }
    }

    /// Validates the core invariant:
    /// `0 < neg_threshold <= threshold <= 1`; all `*_ms` fields are allowed
    /// to be zero but never meaningfully negative (unsigned by type).
    pub fn validate(&self) -> Result<()> {
        if !(self.neg_threshold > 0.0
            && self.neg_threshold <= self.threshold
            && self.threshold <= 1.0)
        {
            return Err(TranscriptionError::ConfigInvalid(format!(
                "VADConfig requires 0 < neg_threshold ({}) <= threshold ({}) <= 1",
                self.neg_threshold, self.threshold
            )));
        }
        Ok(())
    }

    /// Round-trips through the dictionary representation used at the
    /// external-interface boundary.
    pub fn from_dict(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| TranscriptionError::ConfigInvalid(e.to_string()))
    }

    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("VadConfig always serializes")
    }
}

/// A segment of speech audio emitted by the state machine. Times are
/// cumulative seconds since the start of the logical stream.
#[derive(Debug, Clone)]
pub struct VadSegment {
    pub audio: Vec<f32>,
    pub start_time: f64,
    pub end_time: f64,
    pub is_final: bool,
}

/// Returns a `(backend, VadConfig)` pair tuned for `language_tag` by prior
/// benchmarking. `language_tag` should already be normalized
/// via [`crate::language::normalize_language_code`].
///
/// Presets favor the lightweight energy classifier for languages whose
/// phonation makes a stateless gate sufficient, and the neural backend
/// everywhere else. Unknown languages fail with `UnsupportedLanguage`;
/// callers may fall back to [`neural_default`].
pub fn preset_for_language(language_tag: &str) -> Result<(VadBackendKind, VadConfig)> {
    match language_tag {
        "en" | "de" | "fr" | "es" | "it" | "pt" | "nl" => {
            Ok((VadBackendKind::Neural, VadConfig::default()))
        }
        "zh" | "ja" | "ko" => Ok((
            VadBackendKind::Neural,
            VadConfig {
                // Tonal languages benefit from a slightly longer pre-pad so
                // the onset consonant isn't clipped.
                speech_pad_ms: 150,
                ..VadConfig::default()
            },
        )),
        "" => Ok((VadBackendKind::Neural, VadConfig::default())),
        other => Err(TranscriptionError::UnsupportedLanguage(other.to_string())),
    }
}

/// Which concrete [`VadBackend`] a preset selected. Kept as a tag rather
/// than constructing the backend directly so that presets remain pure data
/// (constructing the neural backend requires loading an ONNX model via the
/// `ResourceProvider`, which is the caller's job).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadBackendKind {
    Neural,
    EnergyClassifier,
    Lightweight,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        VadConfig::default().validate().unwrap();
    }

    #[test]
    fn neg_threshold_floors_at_point_zero_one() {
        assert_eq!(default_neg_threshold(0.05), 0.01);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let cfg = VadConfig {
            threshold: 0.3,
            neg_threshold: 0.5,
            ..VadConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn dict_round_trip() {
        let cfg = VadConfig::default();
        let dict = cfg.to_dict();
        let back = VadConfig::from_dict(&dict).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn unknown_language_is_unsupported() {
        assert!(preset_for_language("xx").is_err());
    }
}
