//! Transducer-family ASR engine: streaming-friendly RNN-T/
//! Conformer-Transducer architectures exported to a single ONNX graph.
//! Shares the `ort`/`ndarray` stack with [`crate::vad::neural`], just
//! applied to a whole-utterance encoder + joint-network forward pass
//! instead of one-frame-at-a-time VAD scoring.

use std::path::Path;

use ndarray::{Array1, Array2};
use ort::session::Session;
use ort::value::Value;
use tokio::sync::Mutex;
use tracing::info;

use async_trait::async_trait;

use crate::asr::{short_circuit_if_too_short, AsrEngine, AsrResult, LoadProgress};
use crate::error::{anyhow_compat::BoxError, Result, TranscriptionError};
use crate::resample::resample_sinc;

const REQUIRED_SAMPLE_RATE: u32 = 16000;

/// Loads the token vocabulary sidecar (`<model>.tokens`, one token per
/// line) the export pipeline writes next to the graph, mirroring how
/// these models are commonly packaged.
fn load_vocab(model_path: &str) -> Result<Vec<String>> {
    let vocab_path = format!("{model_path}.tokens");
    if !Path::new(&vocab_path).exists() {
        return Err(TranscriptionError::ModelLoadFailed {
            engine: "transducer".into(),
            source: BoxError::msg(format!("missing vocabulary file {vocab_path}")),
        });
    }
    let contents = std::fs::read_to_string(&vocab_path)?;
    Ok(contents.lines().map(|s| s.to_string()).collect())
}

pub struct TransducerEngine {
    model_path: String,
    default_language: Option<String>,
    session: Mutex<Option<Session>>,
    vocab: Mutex<Vec<String>>,
}

impl TransducerEngine {
    pub fn new(model_path: &str, default_language: Option<String>) -> Result<Self> {
        Ok(Self {
            model_path: model_path.to_string(),
            default_language,
            session: Mutex::new(None),
            vocab: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AsrEngine for TransducerEngine {
    async fn load_model(&self, progress: Option<&LoadProgress<'_>>) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        if let Some(cb) = progress {
            cb(0, "loading transducer model");
        }
        info!(model_path = %self.model_path, "Loading transducer model");

        let vocab = load_vocab(&self.model_path)?;
        let model_path = self.model_path.clone();
        let session = tokio::task::spawn_blocking(move || {
            Session::builder()
                .and_then(|b| b.commit_from_file(&model_path))
        })
        .await
        .map_err(|e| TranscriptionError::ModelLoadFailed {
            engine: "transducer".into(),
            source: BoxError::msg(e.to_string()),
        })?
        .map_err(|e| TranscriptionError::ModelLoadFailed {
            engine: "transducer".into(),
            source: BoxError::msg(e.to_string()),
        })?;

        *self.vocab.lock().await = vocab;
        *guard = Some(session);
        if let Some(cb) = progress {
            cb(100, "transducer model ready");
        }
        Ok(())
    }

    fn required_sample_rate(&self) -> u32 {
        REQUIRED_SAMPLE_RATE
    }

    fn supported_languages(&self) -> Vec<String> {
        self.default_language
            .clone()
            .map(|l| vec![l])
            .unwrap_or_else(|| vec!["en".to_string()])
    }

    async fn transcribe(&self, audio: &[f32], sample_rate: u32) -> Result<AsrResult> {
        if let Some(short) = short_circuit_if_too_short(audio, sample_rate) {
            return Ok(short);
        }
        let audio = if sample_rate != REQUIRED_SAMPLE_RATE {
            resample_sinc(audio, sample_rate, REQUIRED_SAMPLE_RATE)?
        } else {
            audio.to_vec()
        };

        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(TranscriptionError::EngineNotReady)?;

        let input: Array2<f32> = Array2::from_shape_vec((1, audio.len()), audio)
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
        let length: Array1<i64> = Array1::from_vec(vec![input.shape()[1] as i64]);

        let input_value = Value::from_array(input)
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
        let length_value = Value::from_array(length)
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;

        let outputs = session
            .run(ort::inputs!["audio" => input_value, "length" => length_value])
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;

        let (_, token_ids) = outputs["tokens"]
            .try_extract_tensor::<i64>()
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;

        let vocab = self.vocab.lock().await;
        let text = token_ids
            .iter()
            .filter_map(|&id| vocab.get(id as usize))
            .cloned()
            .collect::<Vec<_>>()
            .join("")
            .replace('\u{2581}', " ") // SentencePiece word-boundary marker
            .trim()
            .to_string();

        Ok(AsrResult {
            text,
            confidence: 1.0,
        })
    }

    async fn cleanup(&self) -> Result<()> {
        *self.session.lock().await = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "transducer"
    }
}
