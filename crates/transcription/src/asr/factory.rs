//! ASR engine factory: construct a concrete [`AsrEngine`] from a tagged
//! engine kind, a device preference, and per-backend overrides, merging
//! in registry defaults.
//!
//! `engine_type` is an explicit `EngineKind` enum matched over `dyn
//! AsrEngine` construction rather than a duck-typed string registry with
//! an `"auto"` fallback: picking an ASR *architecture* automatically has
//! no principled default the way picking a *device* does, so `device =
//! "auto"` (GPU-if-available, CPU-otherwise) is supported but
//! `engine_type = "auto"` is not.

use tracing::info;

use crate::asr::AsrEngine;
use crate::error::{Result, TranscriptionError};

/// Compute device preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// GPU if one is available to the active backend, else CPU.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl Device {
    pub fn from_str_opt(value: Option<&str>) -> Result<Self> {
        match value.unwrap_or("auto") {
            "auto" => Ok(Self::Auto),
            "gpu" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            other => Err(TranscriptionError::ConfigInvalid(format!(
                "unknown device '{other}', expected auto/gpu/cpu"
            ))),
        }
    }

    /// Resolves `Auto` against whatever accelerator support was compiled
    /// in. Without a concrete accelerator probe in this crate, `Auto`
    /// conservatively resolves to `Cpu` unless the caller already knows
    /// better (e.g. the ONNX backends query `ort`'s execution providers
    /// themselves and only consult this for a hint).
    pub fn resolve(self, gpu_available: bool) -> Device {
        match self {
            Device::Auto if gpu_available => Device::Gpu,
            Device::Auto => Device::Cpu,
            other => other,
        }
    }
}

/// Which concrete ASR architecture to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Whisper,
    Transducer,
    EncoderDecoder,
    InstructionTuned,
}

impl EngineKind {
    pub fn from_str(value: &str) -> Result<Self> {
        match value {
            "whisper" => Ok(Self::Whisper),
            "transducer" => Ok(Self::Transducer),
            "encoder_decoder" => Ok(Self::EncoderDecoder),
            "instruction_tuned" => Ok(Self::InstructionTuned),
            other => Err(TranscriptionError::ConfigInvalid(format!(
                "unknown engine_type '{other}'"
            ))),
        }
    }
}

/// Per-backend construction overrides. Unset fields fall back to each
/// backend's own registry defaults.
#[derive(Debug, Clone, Default)]
pub struct EngineOverrides {
    pub model_path: Option<String>,
    pub default_language: Option<String>,
    pub beam_size: Option<i32>,
    pub remote_endpoint: Option<String>,
}

/// Builds a concrete [`AsrEngine`] for a given [`EngineKind`] + [`Device`] +
/// [`EngineOverrides`], merging registry defaults with any overrides.
pub struct EngineFactory;

impl EngineFactory {
    pub fn build(
        kind: EngineKind,
        device: Device,
        overrides: EngineOverrides,
    ) -> Result<Box<dyn AsrEngine>> {
        info!(?kind, ?device, "Constructing ASR engine");
        match kind {
            #[cfg(feature = "whisper")]
            EngineKind::Whisper => {
                let params = crate::asr::whisper::WhisperParams {
                    model_path: overrides.model_path.ok_or_else(|| {
                        TranscriptionError::ConfigInvalid(
                            "whisper engine requires model_path".into(),
                        )
                    })?,
                    default_language: overrides.default_language,
                    beam_size: overrides.beam_size.unwrap_or(5),
                    patience: 1.0,
                };
                Ok(Box::new(crate::asr::whisper::WhisperEngine::new(params)))
            }
            #[cfg(not(feature = "whisper"))]
            EngineKind::Whisper => Err(TranscriptionError::ConfigInvalid(
                "whisper engine requires the 'whisper' feature".into(),
            )),

            #[cfg(feature = "onnx")]
            EngineKind::Transducer => {
                let model_path = overrides.model_path.ok_or_else(|| {
                    TranscriptionError::ConfigInvalid(
                        "transducer engine requires model_path".into(),
                    )
                })?;
                Ok(Box::new(crate::asr::transducer::TransducerEngine::new(
                    &model_path,
                    overrides.default_language,
                )?))
            }
            #[cfg(not(feature = "onnx"))]
            EngineKind::Transducer => Err(TranscriptionError::ConfigInvalid(
                "transducer engine requires the 'onnx' feature".into(),
            )),

            #[cfg(feature = "onnx")]
            EngineKind::EncoderDecoder => {
                let model_path = overrides.model_path.ok_or_else(|| {
                    TranscriptionError::ConfigInvalid(
                        "encoder_decoder engine requires model_path".into(),
                    )
                })?;
                Ok(Box::new(
                    crate::asr::encoder_decoder::EncoderDecoderEngine::new(
                        &model_path,
                        overrides.default_language,
                    )?,
                ))
            }
            #[cfg(not(feature = "onnx"))]
            EngineKind::EncoderDecoder => Err(TranscriptionError::ConfigInvalid(
                "encoder_decoder engine requires the 'onnx' feature".into(),
            )),

            #[cfg(feature = "remote")]
            EngineKind::InstructionTuned => {
                let endpoint = overrides.remote_endpoint.ok_or_else(|| {
                    TranscriptionError::ConfigInvalid(
                        "instruction_tuned engine requires remote_endpoint".into(),
                    )
                })?;
                Ok(Box::new(
                    crate::asr::instruction_tuned::InstructionTunedEngine::new(
                        endpoint,
                        overrides.default_language,
                    ),
                ))
            }
            #[cfg(not(feature = "remote"))]
            EngineKind::InstructionTuned => Err(TranscriptionError::ConfigInvalid(
                "instruction_tuned engine requires the 'remote' feature".into(),
            )),
        }
    }
}
