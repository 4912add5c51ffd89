//! Instruction-tuned remote ASR engine: delegates recognition
//! to an out-of-process model server over gRPC. Grounded on
//! `roomler2-transcription`'s `asr::remote_nim::RemoteNimBackend`
//! (tonic + prost client, pcm16le wire encoding, language hint field);
//! the wire contract itself is this crate's own minimal
//! `proto/instruction_asr.proto` rather than a vendored copy of any
//! specific upstream inference server's schema.

use tokio::sync::Mutex;
use tonic::transport::Channel;
use tracing::info;

use async_trait::async_trait;

use crate::asr::{short_circuit_if_too_short, AsrEngine, AsrResult, LoadProgress};
use crate::error::{anyhow_compat::BoxError, Result, TranscriptionError};

const REQUIRED_SAMPLE_RATE: u32 = 16000;

pub mod pb {
    tonic::include_proto!("transcription.instruction_asr");
}

use pb::instruction_asr_client::InstructionAsrClient;
use pb::RecognizeRequest;

pub struct InstructionTunedEngine {
    endpoint: String,
    default_language: Option<String>,
    client: Mutex<Option<InstructionAsrClient<Channel>>>,
}

impl InstructionTunedEngine {
    pub fn new(endpoint: String, default_language: Option<String>) -> Self {
        Self {
            endpoint,
            default_language,
            client: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AsrEngine for InstructionTunedEngine {
    async fn load_model(&self, progress: Option<&LoadProgress<'_>>) -> Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        if let Some(cb) = progress {
            cb(0, "connecting to remote ASR server");
        }
        info!(endpoint = %self.endpoint, "Connecting to instruction-tuned ASR server");

        let client = InstructionAsrClient::connect(self.endpoint.clone())
            .await
            .map_err(|e| TranscriptionError::ModelLoadFailed {
                engine: "instruction_tuned".into(),
                source: BoxError::msg(e.to_string()),
            })?;

        *guard = Some(client);
        if let Some(cb) = progress {
            cb(100, "remote ASR server connected");
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

        let pcm16: Vec<u8> = audio
            .iter()
            .flat_map(|&s| {
                let clamped = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                clamped.to_le_bytes()
            })
            .collect();

        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(TranscriptionError::EngineNotReady)?;

        let request = tonic::Request::new(RecognizeRequest {
            audio_pcm16le: pcm16,
            sample_rate_hertz: sample_rate,
            language_hint: self.default_language.clone().unwrap_or_default(),
        });

        let response = client
            .recognize(request)
            .await
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(e.to_string())))?
            .into_inner();

        Ok(AsrResult {
            text: response.text,
            confidence: response.confidence as f32,
        })
    }

    async fn cleanup(&self) -> Result<()> {
        *self.client.lock().await = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "instruction_tuned"
    }
}
