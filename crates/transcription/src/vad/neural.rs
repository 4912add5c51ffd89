//! Neural VAD backend: a small recurrent ONNX model (Silero-style)
//! that scores one 32ms frame at a time and carries its hidden state across
//! calls, via the `ort`/`ndarray` ONNX Runtime stack.

use ndarray::{Array1, Array2, Array3};
use ort::session::Session;
use ort::value::Value;
use tracing::info;

use crate::error::{Result, TranscriptionError};
use crate::vad::{VadBackend, VadFrame};

const SAMPLE_RATE: u32 = 16000;
const FRAME_SAMPLES: usize = 512; // 32ms @ 16kHz
const STATE_SIZE: usize = 128;

/// Stateful neural VAD backend. One instance holds one model session and
/// one hidden-state tensor; it must not be shared across concurrent
/// streams.
pub struct NeuralVad {
    session: Session,
    state: Array3<f32>,
}

impl NeuralVad {
    pub fn new(model_path: &str) -> Result<Self> {
        info!(model_path, "Loading neural VAD model");
        let session = Session::builder()
            .map_err(|e| TranscriptionError::ModelLoadFailed {
                engine: "vad-neural".into(),
                source: crate::error::anyhow_compat::BoxError::msg(e.to_string()),
            })?
            .commit_from_file(model_path)
            .map_err(|e| TranscriptionError::ModelLoadFailed {
                engine: "vad-neural".into(),
                source: crate::error::anyhow_compat::BoxError::msg(e.to_string()),
            })?;

        Ok(Self {
            session,
            state: Array3::zeros((2, 1, STATE_SIZE)),
        })
    }
}

impl VadBackend for NeuralVad {
    fn required_sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn frame_samples(&self) -> usize {
        FRAME_SAMPLES
    }

    fn predict(&mut self, frame: VadFrame<'_>) -> Result<f32> {
        let input: Array2<f32> = Array2::from_shape_vec((1, frame.len()), frame.to_vec())
            .map_err(|e| TranscriptionError::ConfigInvalid(e.to_string()))?;
        let sr: Array1<i64> = Array1::from_vec(vec![SAMPLE_RATE as i64]);

        let input_value = Value::from_array(input)
            .map_err(|e| TranscriptionError::ConfigInvalid(e.to_string()))?;
        let sr_value =
            Value::from_array(sr).map_err(|e| TranscriptionError::ConfigInvalid(e.to_string()))?;
        let state_value = Value::from_array(self.state.clone())
            .map_err(|e| TranscriptionError::ConfigInvalid(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input" => input_value,
                "sr" => sr_value,
                "state" => state_value,
            ])
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(
                crate::error::anyhow_compat::BoxError::msg(e.to_string()),
            ))?;

        let prob = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(|e| TranscriptionError::SegmentTranscriptionFailed(
                crate::error::anyhow_compat::BoxError::msg(e.to_string()),
            ))?
            .1
            .first()
            .copied()
            .unwrap_or(0.0);

        if let Ok((_, new_state)) = outputs["stateN"].try_extract_tensor::<f32>() {
            if new_state.len() == self.state.len() {
                self.state = Array3::from_shape_vec((2, 1, STATE_SIZE), new_state.to_vec())
                    .unwrap_or_else(|_| self.state.clone());
            }
        }

        Ok(prob.clamp(0.0, 1.0))
    }

    fn reset(&mut self) {
        self.state = Array3::zeros((2, 1, STATE_SIZE));
    }
}
