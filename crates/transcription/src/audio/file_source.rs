//! File-backed [`AudioSource`]: reads a WAV file via `hound`, resamples to
//! an arbitrary target rate, and emits it as chunked, optionally
//! real-time-paced audio rather than all at once.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::audio::{downmix_to_mono, AudioChunk, AudioSource};
use crate::error::{Result, TranscriptionError};
use crate::resample::resample_sinc;

pub struct FileSource {
    path: PathBuf,
    target_sample_rate: u32,
    chunk_ms: u32,
    realtime: bool,
    buffer: Vec<f32>,
    position: usize,
    active: bool,
    last_emit: Option<Instant>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, target_sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            target_sample_rate,
            chunk_ms: 100,
            realtime: false,
            buffer: Vec::new(),
            position: 0,
            active: false,
            last_emit: None,
        }
    }

    pub fn with_chunk_ms(mut self, chunk_ms: u32) -> Self {
        self.chunk_ms = chunk_ms;
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn chunk_samples(&self) -> usize {
        (self.target_sample_rate as u64 * self.chunk_ms as u64 / 1000) as usize
    }

    fn decode(&self) -> Result<Vec<f32>> {
        let reader = hound::WavReader::open(&self.path).map_err(|e| {
            TranscriptionError::UnsupportedFormat(format!(
                "failed to open '{}': {e}",
                self.path.display()
            ))
        })?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        let source_rate = spec.sample_rate;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.unwrap_or(0) as f32 / max_val)
                    .collect()
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.unwrap_or(0.0))
                .collect(),
        };

        let mono = downmix_to_mono(&samples, channels);
        if source_rate != self.target_sample_rate {
            resample_sinc(&mono, source_rate, self.target_sample_rate)
        } else {
            Ok(mono)
        }
    }
}

#[async_trait]
impl AudioSource for FileSource {
    async fn open(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Err(TranscriptionError::UnsupportedFormat(format!(
                "file not found: {}",
                self.path.display()
            )));
        }
        let path = self.path.clone();
        let target_rate = self.target_sample_rate;
        let this_decode = {
            // Clone just what `decode` needs so the blocking call doesn't borrow `self`.
            let source = FileSource::new(path, target_rate);
            tokio::task::spawn_blocking(move || source.decode())
                .await
                .map_err(|e| TranscriptionError::UnsupportedFormat(e.to_string()))?
        };
        self.buffer = this_decode?;
        self.position = 0;
        self.active = true;
        self.last_emit = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.active = false;
        self.buffer.clear();
        self.position = 0;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if !self.active || self.position >= self.buffer.len() {
            return Ok(None);
        }

        if self.realtime {
            if let Some(last) = self.last_emit {
                let target_gap = Duration::from_millis(self.chunk_ms as u64);
                let elapsed = last.elapsed();
                if elapsed < target_gap {
                    tokio::time::sleep(target_gap - elapsed).await;
                }
            }
            self.last_emit = Some(Instant::now());
        }

        let end = (self.position + self.chunk_samples()).min(self.buffer.len());
        let samples = self.buffer[self.position..end].to_vec();
        self.position = end;

        Ok(Some(AudioChunk {
            samples,
            sample_rate: self.target_sample_rate,
        }))
    }
}
