//! Sample-rate conversion.
//!
//! Two converters, chosen for where they're used:
//! - [`LinearResampler`]: stateful, frame-at-a-time linear interpolation.
//!   Used by [`crate::vad::VadStateMachine`]'s re-framer, which must accept
//!   arbitrarily small/variable chunks without ever seeing a chunk boundary.
//! - [`resample_sinc`]: batch sinc interpolation over a whole buffer via
//!   `rubato`. Used by `FileSource` and the file pipeline, which always
//!   resample a complete, already-decoded file.
//!
//! Neither technique is mandated over the other; both are deterministic
//! for a given input, which is the only hard requirement.

use rubato::{
    Async as AsyncResampler, FixedAsync, Resampler as RubatoResampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use audioadapter_buffers::direct::InterleavedSlice;

use crate::error::{Result, TranscriptionError};

/// Stateful linear resampler that carries its fractional phase and trailing
/// sample across calls, so chunk boundaries never drop or duplicate audio.
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Fractional read position into the *next* input chunk, in input-sample
    /// units, carried over between calls.
    phase: f64,
    /// Last sample of the previous chunk, used as the left interpolation
    /// anchor for the first output sample of the next chunk.
    prev_sample: f32,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            phase: 0.0,
            prev_sample: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Converts `input` (at `from_rate`) to `to_rate`, appending output
    /// samples and preserving phase for the next call.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_identity() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let ratio = self.from_rate as f64 / self.to_rate as f64;
        let mut output = Vec::new();
        let mut pos = self.phase;

        loop {
            if pos < 1.0 {
                // Interpolate between prev_sample and input[0].
                let frac = pos;
                let sample = self.prev_sample as f64 * (1.0 - frac) + input[0] as f64 * frac;
                output.push(sample as f32);
                pos += ratio;
                continue;
            }
            let idx = pos.floor() as usize;
            if idx >= input.len() {
                break;
            }
            let frac = pos - idx as f64;
            let left = input[idx];
            let right = if idx + 1 < input.len() {
                input[idx + 1]
            } else {
                // Carried to the next call; approximate with `left` for this sample.
                left
            };
            let sample = left as f64 * (1.0 - frac) + right as f64 * frac;
            output.push(sample as f32);
            pos += ratio;
        }

        self.phase = pos - (input.len() as f64 - 1.0).max(0.0);
        if self.phase < 0.0 {
            self.phase = 0.0;
        }
        self.prev_sample = *input.last().unwrap();
        output
    }
}

/// Batch sinc-interpolated resample of a complete buffer from `src_rate` to
/// `dst_rate` Hz, mono.
pub fn resample_sinc(audio: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>> {
    if src_rate == dst_rate {
        return Ok(audio.to_vec());
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let chunk_size = 1024;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = AsyncResampler::<f32>::new_sinc(ratio, 2.0, &params, chunk_size, 1, FixedAsync::Input)
        .map_err(|e| TranscriptionError::ConfigInvalid(format!("failed to create resampler: {e}")))?;

    let mut output = Vec::with_capacity((audio.len() as f64 * ratio) as usize + chunk_size);

    for chunk in audio.chunks(chunk_size) {
        let input = if chunk.len() < chunk_size {
            let mut padded = chunk.to_vec();
            padded.resize(chunk_size, 0.0);
            padded
        } else {
            chunk.to_vec()
        };

        let frames = input.len();
        let input_adapter = InterleavedSlice::new(&input, 1, frames)
            .map_err(|e| TranscriptionError::ConfigInvalid(format!("input adapter error: {e}")))?;

        let result = resampler
            .process(&input_adapter, 0, None)
            .map_err(|e| TranscriptionError::ConfigInvalid(format!("resample error: {e}")))?;

        output.extend(result.take_data());
    }

    let expected_len = (audio.len() as f64 * ratio) as usize;
    output.truncate(expected_len);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_resample_is_passthrough() {
        let mut r = LinearResampler::new(16000, 16000);
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(r.process(&input), input);
    }

    #[test]
    fn downsample_halves_length_roughly() {
        let mut r = LinearResampler::new(32000, 16000);
        let input: Vec<f32> = (0..3200).map(|i| (i as f32 / 100.0).sin()).collect();
        let out = r.process(&input);
        assert!((out.len() as i64 - 1600).abs() < 5);
    }
}
