//! Attention encoder-decoder ASR engine: a non-Whisper
//! Conformer/Transformer encoder paired with an autoregressive text
//! decoder, exported as two ONNX graphs that share one run loop. Differs
//! from [`crate::asr::transducer`] in decoding strategy: the joint
//! network there scores the whole sequence in one pass, while here the
//! decoder is stepped token-by-token against cached encoder output.

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
const MAX_NEW_TOKENS: usize = 448;
const BOS_TOKEN: i64 = 1;
const EOS_TOKEN: i64 = 2;

struct Sessions {
    encoder: Session,
    decoder: Session,
    vocab: Vec<String>,
}

pub struct EncoderDecoderEngine {
    model_path: String,
    default_language: Option<String>,
    sessions: Mutex<Option<Sessions>>,
}

impl EncoderDecoderEngine {
    pub fn new(model_path: &str, default_language: Option<String>) -> Result<Self> {
        Ok(Self {
            model_path: model_path.to_string(),
            default_language,
            sessions: Mutex::new(None),
        })
    }
}

#[async_trait]
impl AsrEngine for EncoderDecoderEngine {
    async fn load_model(&self, progress: Option<&LoadProgress<'_>>) -> Result<()> {
        let mut guard = self.sessions.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        if let Some(cb) = progress {
            cb(0, "loading encoder-decoder model");
        }
        info!(model_path = %self.model_path, "Loading encoder-decoder model");

        let encoder_path = format!("{}.encoder.onnx", self.model_path);
        let decoder_path = format!("{}.decoder.onnx", self.model_path);
        let vocab_path = format!("{}.tokens", self.model_path);

        if !std::path::Path::new(&vocab_path).exists() {
            return Err(TranscriptionError::ModelLoadFailed {
                engine: "encoder_decoder".into(),
                source: BoxError::msg(format!("missing vocabulary file {vocab_path}")),
            });
        }
        let vocab: Vec<String> = std::fs::read_to_string(&vocab_path)?
            .lines()
            .map(|s| s.to_string())
            .collect();

        let (encoder, decoder) = tokio::task::spawn_blocking(move || {
            let encoder = Session::builder().and_then(|b| b.commit_from_file(&encoder_path))?;
            let decoder = Session::builder().and_then(|b| b.commit_from_file(&decoder_path))?;
            Ok::<_, ort::Error>((encoder, decoder))
        })
        .await
        .map_err(|e| TranscriptionError::ModelLoadFailed {
            engine: "encoder_decoder".into(),
            source: BoxError::msg(e.to_string()),
        })?
        .map_err(|e| TranscriptionError::ModelLoadFailed {
            engine: "encoder_decoder".into(),
            source: BoxError::msg(e.to_string()),
        })?;

        *guard = Some(Sessions {
            encoder,
            decoder,
            vocab,
        });
        if let Some(cb) = progress {
            cb(100, "encoder-decoder model ready");
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

        let guard = self.sessions.lock().await;
        let sessions = guard.as_ref().ok_or(TranscriptionError::EngineNotReady)?;

        let input: Array2<f32> = Array2::from_shape_vec((1, audio.len()), audio)
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
        let input_value = Value::from_array(input)
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
        let encoder_out = sessions
            .encoder
            .run(ort::inputs!["audio" => input_value])
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
        let (shape, encoder_hidden) = encoder_out["hidden_states"]
            .try_extract_tensor::<f32>()
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
        let encoder_hidden = encoder_hidden.to_vec();
        let encoder_shape: Vec<i64> = shape.iter().map(|&d| d as i64).collect();

        let mut tokens = vec![BOS_TOKEN];
        for _ in 0..MAX_NEW_TOKENS {
            let hidden = Array2::from_shape_vec(
                (encoder_shape[1] as usize, encoder_shape[2] as usize),
                encoder_hidden.clone(),
            )
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
            let decoder_input: Array2<i64> =
                Array2::from_shape_vec((1, tokens.len()), tokens.clone())
                    .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;

            let hidden_value = Value::from_array(hidden)
                .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
            let tokens_value = Value::from_array(decoder_input)
                .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;

            let decoder_out = sessions
                .decoder
                .run(ort::inputs!["encoder_hidden" => hidden_value, "input_ids" => tokens_value])
                .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;

            let (logits_shape, logits) = decoder_out["logits"]
                .try_extract_tensor::<f32>()
                .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?;
            let vocab_size = *logits_shape.last().unwrap_or(&1) as usize;
            let last_step = &logits[logits.len() - vocab_size..];

            let next_token = last_step
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| idx as i64)
                .unwrap_or(EOS_TOKEN);

            if next_token == EOS_TOKEN {
                break;
            }
            tokens.push(next_token);
        }

        let text = tokens[1..]
            .iter()
            .filter_map(|&id| sessions.vocab.get(id as usize))
            .cloned()
            .collect::<Vec<_>>()
            .join("")
            .replace('\u{2581}', " ")
            .trim()
            .to_string();

        Ok(AsrResult {
            text,
            confidence: 1.0,
        })
    }

    async fn cleanup(&self) -> Result<()> {
        *self.sessions.lock().await = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "encoder_decoder"
    }
}
