//! Stateful lightweight frame classifier.
//!
//! Cheaper than the neural backend (no model weights, no inference
//! runtime): tracks a running noise floor and blends short-term energy
//! with zero-crossing rate into a smoothed, continuous speech probability.
//! Unlike [`crate::vad::energy::EnergyVad`] it carries state across frames
//! (the noise floor estimate and the previous smoothed probability), so
//! `reset()` is meaningful here.

use crate::error::{Result, TranscriptionError};
use crate::vad::{VadBackend, VadFrame};

pub struct LightweightVad {
    sample_rate: u32,
    hop_samples: usize,
    noise_floor: f32,
    smoothed_prob: f32,
    /// EMA coefficient for the noise floor: closer to 1.0 adapts slower.
    floor_decay: f32,
    /// EMA coefficient for probability smoothing.
    prob_decay: f32,
}

impl LightweightVad {
    /// `hop_samples` lets callers trade latency for stability via a
    /// configurable frame hop.
    pub fn new(sample_rate: u32, hop_samples: usize) -> Result<Self> {
        if hop_samples == 0 {
            return Err(TranscriptionError::ConfigInvalid(
                "lightweight VAD hop_samples must be > 0".into(),
            ));
        }
        Ok(Self {
            sample_rate,
            hop_samples,
            noise_floor: 1e-4,
            smoothed_prob: 0.0,
            floor_decay: 0.95,
            prob_decay: 0.6,
        })
    }
}

impl VadBackend for LightweightVad {
    fn required_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_samples(&self) -> usize {
        self.hop_samples
    }

    fn predict(&mut self, frame: VadFrame<'_>) -> Result<f32> {
        if frame.is_empty() {
            return Ok(self.smoothed_prob);
        }

        let energy: f32 = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;

        let mut crossings = 0usize;
        for w in frame.windows(2) {
            if (w[0] >= 0.0) != (w[1] >= 0.0) {
                crossings += 1;
            }
        }
        let zcr = crossings as f32 / frame.len().max(1) as f32;

        // Voiced speech tends to have moderate ZCR and energy well above
        // the ambient floor; weight energy-over-floor more heavily and use
        // ZCR as a tie-breaker against steady tonal noise (near-zero ZCR)
        // and white noise (ZCR near 0.5).
        let snr = energy / self.noise_floor.max(1e-8);
        let energy_score = (snr.ln().max(0.0) / 6.0).min(1.0);
        let zcr_score = 1.0 - (zcr - 0.15).abs().min(0.5) * 2.0;
        let instantaneous = (0.75 * energy_score + 0.25 * zcr_score.max(0.0)).clamp(0.0, 1.0);

        self.smoothed_prob =
            self.prob_decay * self.smoothed_prob + (1.0 - self.prob_decay) * instantaneous;

        // Only adapt the noise floor during apparent non-speech, or it
        // would chase the speech energy itself and never flag it again.
        if instantaneous < 0.3 {
            self.noise_floor = self.floor_decay * self.noise_floor + (1.0 - self.floor_decay) * energy;
        }

        Ok(self.smoothed_prob)
    }

    fn reset(&mut self) {
        self.noise_floor = 1e-4;
        self.smoothed_prob = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configurable_hop_is_reported_as_frame_samples() {
        let vad = LightweightVad::new(16000, 256).unwrap();
        assert_eq!(vad.frame_samples(), 256);
    }

    #[test]
    fn rejects_zero_hop() {
        assert!(LightweightVad::new(16000, 0).is_err());
    }

    #[test]
    fn reset_clears_learned_floor() {
        let mut vad = LightweightVad::new(16000, 160).unwrap();
        let loud = vec![0.4f32; 160];
        for _ in 0..10 {
            vad.predict(&loud).unwrap();
        }
        let before_reset_floor = vad.noise_floor;
        vad.reset();
        assert_ne!(vad.noise_floor, before_reset_floor);
        assert_eq!(vad.smoothed_prob, 0.0);
    }
}
