//! Real-time streaming transcription core.
//!
//! Three layers compose end to end:
//! - [`vad`]: turns raw audio chunks into speech/silence segments via a
//!   hysteresis state machine over a pluggable [`vad::VadBackend`].
//! - [`asr`]: a uniform async contract ([`asr::AsrEngine`]) over
//!   heterogeneous recognition backends, built through [`asr::EngineFactory`].
//! - [`stream`] and [`file_pipeline`]: the two consumers of the above —
//!   live microphone/network audio reordered into an ordered event stream,
//!   and deterministic offline file-to-subtitle transcription.

pub mod asr;
pub mod audio;
pub mod error;
pub mod events;
pub mod file_pipeline;
pub mod language;
pub mod resample;
pub mod resource_provider;
pub mod stream;
pub mod subtitle;
pub mod translator;
pub mod vad;

pub use asr::{AsrEngine, AsrResult, Device, EngineFactory};
pub use audio::{AudioChunk, AudioSource, DeviceInfo};
pub use error::{Result, TranscriptionError};
pub use events::Event;
pub use file_pipeline::{FileOutcome, FilePipeline, FileProcessingResult, FileSubtitleSegment};
pub use resource_provider::ResourceProvider;
pub use stream::{StreamTranscriber, StreamTranscriberConfig, TranscriptionResult};
pub use translator::Translator;
pub use vad::{VadBackend, VadConfig, VadSegment, VadStateMachine};
