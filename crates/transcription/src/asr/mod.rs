//! ASR engine abstraction: a uniform audio contract over
//! heterogeneous backends (Whisper-family, transducer-family,
//! attention-encoder-decoder, instruction-tuned), language-code
//! normalization, and progress reporting during model load.

pub mod factory;

#[cfg(feature = "whisper")]
pub mod whisper;

#[cfg(feature = "onnx")]
pub mod transducer;

#[cfg(feature = "onnx")]
pub mod encoder_decoder;

#[cfg(feature = "remote")]
pub mod instruction_tuned;

pub use factory::{Device, EngineFactory};

use async_trait::async_trait;

use crate::error::Result;

/// `(percent, message)` progress callback invoked during `load_model()`.
pub type LoadProgress<'a> = dyn Fn(u8, &str) + Send + Sync + 'a;

/// Result of one `transcribe()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AsrResult {
    pub text: String,
    /// `1.0` when the backend does not produce a confidence score.
    pub confidence: f32,
}

/// Minimum audio duration a backend will attempt to transcribe; shorter
/// buffers short-circuit to `("", 1.0)`.
pub const MIN_TRANSCRIBE_DURATION_MS: u64 = 100;

/// Uniform contract over every concrete ASR backend.
///
/// Shared between the VAD-driven emit loop and, if configured, a
/// translator's own model; only one `transcribe()` call is in flight at a
/// time per engine instance.
#[async_trait]
pub trait AsrEngine: Send + Sync {
    /// Idempotent. Downloads/initializes weights via the `ResourceProvider`;
    /// may take tens of seconds. Fails with `ModelLoadFailed` on any
    /// initialization error.
    async fn load_model(&self, progress: Option<&LoadProgress<'_>>) -> Result<()>;

    /// Sample rate this backend expects `transcribe()` audio at.
    fn required_sample_rate(&self) -> u32;

    /// ISO-639-1 (or passthrough) language codes this backend supports.
    fn supported_languages(&self) -> Vec<String>;

    /// Transcribes a complete, already-segmented utterance. Resamples
    /// internally if `sample_rate != required_sample_rate()`. Audio
    /// shorter than [`MIN_TRANSCRIBE_DURATION_MS`] returns `("", 1.0)`.
    async fn transcribe(&self, audio: &[f32], sample_rate: u32) -> Result<AsrResult>;

    /// Idempotent release of accelerator memory.
    async fn cleanup(&self) -> Result<()>;

    /// Human-readable backend name, used in logs and the factory registry.
    fn name(&self) -> &str;
}

/// Returns `("", 1.0)` if `audio` (at `sample_rate`) is shorter than
/// [`MIN_TRANSCRIBE_DURATION_MS`]; otherwise `None`, meaning the caller
/// should proceed with real inference.
pub fn short_circuit_if_too_short(audio: &[f32], sample_rate: u32) -> Option<AsrResult> {
    let duration_ms = (audio.len() as f64 / sample_rate.max(1) as f64) * 1000.0;
    if duration_ms < MIN_TRANSCRIBE_DURATION_MS as f64 {
        Some(AsrResult {
            text: String::new(),
            confidence: 1.0,
        })
    } else {
        None
    }
}
