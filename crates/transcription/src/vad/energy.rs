//! Stateless energy/voice-tone VAD backend.
//!
//! Mirrors the WebRTC-style VAD contract: fixed 10/20/30 ms frames at
//! 8/16/32/48 kHz and a coarse `aggressiveness` mode (0-3) that trades
//! false positives for false negatives. Returns a binary 1.0/0.0
//! probability rather than a continuous score, since the underlying
//! heuristic (short-term energy vs. a running noise floor) has no
//! meaningful notion of partial confidence.

use crate::error::{Result, TranscriptionError};
use crate::vad::{VadBackend, VadFrame};

/// One of the four WebRTC-style aggressiveness presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggressiveness {
    Quality = 0,
    LowBitrate = 1,
    Aggressive = 2,
    VeryAggressive = 3,
}

impl Aggressiveness {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Quality),
            1 => Ok(Self::LowBitrate),
            2 => Ok(Self::Aggressive),
            3 => Ok(Self::VeryAggressive),
            other => Err(TranscriptionError::ConfigInvalid(format!(
                "aggressiveness mode must be 0-3, got {other}"
            ))),
        }
    }

    /// RMS energy threshold above which a frame is classified as speech.
    /// Higher modes require more energy, trading recall for precision.
    fn energy_threshold(self) -> f32 {
        match self {
            Self::Quality => 0.01,
            Self::LowBitrate => 0.02,
            Self::Aggressive => 0.035,
            Self::VeryAggressive => 0.05,
        }
    }
}

/// Energy-based VAD backend. Stateless: `predict` is a pure function of the
/// frame it's given, and `reset` is a no-op.
pub struct EnergyVad {
    sample_rate: u32,
    frame_ms: u32,
    aggressiveness: Aggressiveness,
}

impl EnergyVad {
    /// `aggressiveness` must be 0-3. Defaults to 16 kHz / 20 ms
    /// frames, matching the neural backend's chunking convention closely
    /// enough to interoperate with the same state machine.
    pub fn new(aggressiveness: u8) -> Self {
        Self::with_params(aggressiveness, 16000, 20).expect("default params are always valid")
    }

    pub fn with_params(aggressiveness: u8, sample_rate: u32, frame_ms: u32) -> Result<Self> {
        if ![10, 20, 30].contains(&frame_ms) {
            return Err(TranscriptionError::ConfigInvalid(format!(
                "voice-tone-classifier frame length must be 10/20/30ms, got {frame_ms}ms"
            )));
        }
        Ok(Self {
            sample_rate,
            frame_ms,
            aggressiveness: Aggressiveness::from_u8(aggressiveness)?,
        })
    }
}

impl VadBackend for EnergyVad {
    fn required_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_ms as u64 / 1000) as usize
    }

    fn predict(&mut self, frame: VadFrame<'_>) -> Result<f32> {
        if frame.is_empty() {
            return Ok(0.0);
        }
        let sum_sq: f32 = frame.iter().map(|s| s * s).sum();
        let rms = (sum_sq / frame.len() as f32).sqrt();
        Ok(if rms >= self.aggressiveness.energy_threshold() {
            1.0
        } else {
            0.0
        })
    }

    fn reset(&mut self) {}
}
