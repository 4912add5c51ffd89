//! Audio ingestion: a uniform producer contract over a finite,
//! file-backed source and an unbounded, hardware-paced microphone source.

pub mod file_source;
pub mod microphone_source;

use async_trait::async_trait;

use crate::error::Result;

/// Mono float32 samples in `[-1.0, 1.0]` at a declared sample rate.
/// Chunk boundaries are non-semantic: no audio is lost across them.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// One enumerated capture device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

/// A lazy, finite-or-unbounded producer of [`AudioChunk`]s.
///
/// `open()`/`close()` bracket OS resource acquisition (file descriptor or
/// audio device); implementors must release the resource on every exit
/// path, including an error returned from `open()` itself partway through
/// setup. The core never constructs a source pre-opened.
#[async_trait]
pub trait AudioSource: Send {
    /// Acquires the underlying resource. Idempotent is not required; callers
    /// must not call `open()` twice without an intervening `close()`.
    async fn open(&mut self) -> Result<()>;

    /// Releases the underlying resource. Must be safe to call multiple times
    /// and safe to call without a prior successful `open()`.
    async fn close(&mut self) -> Result<()>;

    /// Sample rate chunks are produced at.
    fn sample_rate(&self) -> u32;

    /// `true` once `open()` has succeeded and `close()` has not yet run.
    fn is_active(&self) -> bool;

    /// Pulls the next chunk, or `None` at end-of-stream (file sources only;
    /// microphone sources are unbounded and never return `None` except after
    /// a fatal `DeviceDisconnected`, which is returned as `Err` instead).
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>>;
}

/// Down-mixes interleaved multi-channel samples to mono by equal-weight
/// averaging.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_passthrough_is_unchanged() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&samples, 1), samples);
    }

    #[test]
    fn stereo_averages_channels() {
        let samples = vec![1.0, -1.0, 0.5, 0.5];
        let mono = downmix_to_mono(&samples, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }
}
