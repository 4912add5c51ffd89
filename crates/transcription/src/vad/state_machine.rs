//! Re-framing + hysteresis + segment extraction.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::Result;
use crate::resample::LinearResampler;

use super::{VadBackend, VadConfig, VadSegment, VadState};

/// Buffers arbitrary-length incoming audio, re-frames it to the backend's
/// required frame length and sample rate, applies hysteresis, and emits
/// interim/final segments under a hysteresis threshold-crossing policy.
///
/// Owned exclusively by one stream; not safe to share across concurrent
/// streams.
pub struct VadStateMachine {
    backend: Box<dyn VadBackend>,
    config: VadConfig,

    frame_samples: usize,
    backend_rate: u32,
    frame_dur_s: f64,

    resampler: Option<LinearResampler>,
    resampler_src_rate: u32,
    residual: Vec<f32>,

    state: VadState,
    frames_total: u64,

    /// Sliding window of the most recent `speech_pad_ms` of non-speech
    /// audio, consumed as pre-pad on the next onset commit.
    pre_ring: VecDeque<f32>,
    pre_ring_capacity: usize,

    /// Audio accumulated for the candidate currently under evaluation
    /// (an onset candidate in `PotentialSpeech`, or an offset candidate in
    /// `PotentialSilence`).
    candidate_audio: Vec<f32>,
    candidate_frames: u64,
    candidate_start_time: f64,

    /// The in-progress utterance, once committed (state ∈ {Speech, PotentialSilence}).
    speech_buffer: Vec<f32>,
    /// Cumulative stream time (seconds) of the segment's first sample, once committed.
    utterance_start_time: f64,
    /// Cumulative stream time (seconds) marking the start of the onset
    /// candidate (i.e. excluding pre-pad); used for elapsed-speech math.
    utterance_commit_time: f64,

    last_interim_elapsed_ms: Option<f64>,
}

impl VadStateMachine {
    pub fn new(backend: Box<dyn VadBackend>, config: VadConfig) -> Result<Self> {
        config.validate()?;
        let frame_samples = backend.frame_samples();
        let backend_rate = backend.required_sample_rate();
        let frame_dur_s = frame_samples as f64 / backend_rate as f64;
        let pre_ring_capacity =
            ((config.speech_pad_ms as f64 / 1000.0) * backend_rate as f64).ceil() as usize;

        Ok(Self {
            backend,
            config,
            frame_samples,
            backend_rate,
            frame_dur_s,
            resampler: None,
            resampler_src_rate: backend_rate,
            residual: Vec::new(),
            state: VadState::Silence,
            frames_total: 0,
            pre_ring: VecDeque::with_capacity(pre_ring_capacity),
            pre_ring_capacity,
            candidate_audio: Vec::new(),
            candidate_frames: 0,
            candidate_start_time: 0.0,
            speech_buffer: Vec::new(),
            utterance_start_time: 0.0,
            utterance_commit_time: 0.0,
            last_interim_elapsed_ms: None,
        })
    }

    /// Current hysteresis state, mostly useful for tests and diagnostics.
    pub fn state(&self) -> VadState {
        self.state
    }

    /// Sample rate audio segments are emitted at (the VAD backend's rate,
    /// not necessarily the caller's input rate).
    pub fn backend_sample_rate(&self) -> u32 {
        self.backend_rate
    }

    /// Clears all buffered state and returns to `Silence`, discarding any
    /// in-progress utterance without emitting a segment for it. Used by
    /// `StreamTranscriber::reset()`.
    pub fn reset(&mut self) {
        self.reset_to_silence();
        self.residual.clear();
        self.frames_total = 0;
    }

    /// Re-frames `audio` (at `sample_rate`) into the backend's native frame
    /// size, steps the hysteresis machine frame-by-frame, and returns every
    /// segment emitted during the call, in chronological order.
    pub fn process_chunk(&mut self, audio: &[f32], sample_rate: u32) -> Result<Vec<VadSegment>> {
        let resampled = self.resample_if_needed(audio, sample_rate);
        self.residual.extend_from_slice(&resampled);

        let mut out = Vec::new();
        while self.residual.len() >= self.frame_samples {
            let frame: Vec<f32> = self.residual.drain(..self.frame_samples).collect();
            if let Some(seg) = self.step_frame(&frame)? {
                out.push(seg);
            }
            if let Some(seg) = self.maybe_emit_interim() {
                out.push(seg);
            }
        }
        Ok(out)
    }

    /// Flushes whatever utterance is in progress. Returns `None` if the
    /// state machine was in `Silence`/`PotentialSpeech`.
    pub fn finalize(&mut self) -> Option<VadSegment> {
        match self.state {
            VadState::Speech => {
                let seg = self.build_final_segment();
                self.reset_to_silence();
                Some(seg)
            }
            VadState::PotentialSilence => {
                // Flush: unlike a natural offset, there's no more audio to
                // wait for, so the whole candidate becomes trailing audio.
                self.speech_buffer.append(&mut self.candidate_audio);
                let seg = self.build_final_segment();
                self.reset_to_silence();
                Some(seg)
            }
            VadState::Silence | VadState::PotentialSpeech => {
                self.reset_to_silence();
                None
            }
        }
    }

    fn resample_if_needed(&mut self, audio: &[f32], sample_rate: u32) -> Vec<f32> {
        if sample_rate == self.backend_rate {
            return audio.to_vec();
        }
        if self.resampler.is_none() || self.resampler_src_rate != sample_rate {
            self.resampler = Some(LinearResampler::new(sample_rate, self.backend_rate));
            self.resampler_src_rate = sample_rate;
        }
        self.resampler.as_mut().unwrap().process(audio)
    }

    fn frame_time_bounds(&self) -> (f64, f64) {
        let start = self.frames_total as f64 * self.frame_dur_s;
        (start, start + self.frame_dur_s)
    }

    fn push_pre_ring(&mut self, frame: &[f32]) {
        for &s in frame {
            if self.pre_ring.len() >= self.pre_ring_capacity.max(1) {
                self.pre_ring.pop_front();
            }
            self.pre_ring.push_back(s);
        }
    }

    fn elapsed_speech_ms(&self, now: f64) -> f64 {
        (now - self.utterance_commit_time) * 1000.0
    }

    fn step_frame(&mut self, frame: &[f32]) -> Result<Option<VadSegment>> {
        let p = self.backend.predict(frame)?;
        let (frame_start, frame_end) = self.frame_time_bounds();
        self.frames_total += 1;

        let threshold = self.config.threshold;
        let neg_threshold = self.config.neg_threshold;

        let result = match self.state {
            VadState::Silence => {
                if p >= threshold {
                    debug!(p, frame_start, "VAD onset candidate opened");
                    self.candidate_audio.clear();
                    self.candidate_audio.extend_from_slice(frame);
                    self.candidate_frames = 1;
                    self.candidate_start_time = frame_start;
                    self.state = VadState::PotentialSpeech;
                } else {
                    self.push_pre_ring(frame);
                }
                None
            }

            VadState::PotentialSpeech => {
                if p < neg_threshold {
                    // Discard: fold the candidate back into ordinary
                    // pre-utterance history.
                    for chunk in std::mem::take(&mut self.candidate_audio).chunks(self.frame_samples.max(1)) {
                        self.push_pre_ring(chunk);
                    }
                    self.candidate_frames = 0;
                    self.state = VadState::Silence;
                    None
                } else {
                    self.candidate_audio.extend_from_slice(frame);
                    self.candidate_frames += 1;
                    let accumulated_ms = self.candidate_frames as f64 * self.frame_dur_s * 1000.0;
                    if accumulated_ms >= self.config.min_speech_ms as f64 {
                        let prepad: Vec<f32> = self.pre_ring.iter().copied().collect();
                        let prepad_dur = prepad.len() as f64 / self.backend_rate as f64;
                        self.utterance_commit_time = self.candidate_start_time;
                        self.utterance_start_time = self.candidate_start_time - prepad_dur;
                        self.speech_buffer = prepad;
                        self.speech_buffer.append(&mut self.candidate_audio);
                        self.candidate_frames = 0;
                        self.last_interim_elapsed_ms = None;
                        self.state = VadState::Speech;
                        debug!(
                            start = self.utterance_start_time,
                            "VAD onset committed"
                        );
                    }
                    None
                }
            }

            VadState::Speech => {
                let max_ms = self.config.max_speech_ms;
                if max_ms > 0 && self.elapsed_speech_ms(frame_end) >= max_ms as f64 {
                    self.speech_buffer.extend_from_slice(frame);
                    let seg = self.build_final_segment();
                    self.reset_to_silence();
                    Some(seg)
                } else {
                    self.speech_buffer.extend_from_slice(frame);
                    if p < neg_threshold {
                        self.candidate_audio.clear();
                        self.candidate_frames = 0;
                        self.candidate_start_time = frame_start;
                        self.state = VadState::PotentialSilence;
                    }
                    None
                }
            }

            VadState::PotentialSilence => {
                if p >= threshold {
                    // Cancel the offset: the candidate was just a dip.
                    self.speech_buffer.append(&mut self.candidate_audio);
                    self.candidate_frames = 0;
                    self.state = VadState::Speech;
                    None
                } else {
                    self.candidate_audio.extend_from_slice(frame);
                    self.candidate_frames += 1;
                    let silence_ms = self.candidate_frames as f64 * self.frame_dur_s * 1000.0;
                    if silence_ms >= self.config.min_silence_ms as f64 {
                        let post_pad_samples = ((self.config.speech_pad_ms as f64 / 1000.0)
                            * self.backend_rate as f64)
                            .ceil() as usize;
                        let take = post_pad_samples.min(self.candidate_audio.len());
                        self.speech_buffer.extend_from_slice(&self.candidate_audio[..take]);
                        self.candidate_audio.clear();
                        self.candidate_frames = 0;
                        let seg = self.build_final_segment();
                        self.reset_to_silence();
                        Some(seg)
                    } else {
                        None
                    }
                }
            }
        };

        Ok(result)
    }

    fn maybe_emit_interim(&mut self) -> Option<VadSegment> {
        if !matches!(self.state, VadState::Speech | VadState::PotentialSilence) {
            return None;
        }
        let (_, now) = self.frame_time_bounds();
        let elapsed_ms = self.elapsed_speech_ms(now);
        if elapsed_ms < self.config.interim_min_duration_ms as f64 {
            return None;
        }
        let since_last = match self.last_interim_elapsed_ms {
            None => elapsed_ms,
            Some(last) => elapsed_ms - last,
        };
        if since_last < self.config.interim_interval_ms as f64 {
            return None;
        }
        self.last_interim_elapsed_ms = Some(elapsed_ms);
        Some(VadSegment {
            audio: self.speech_buffer.clone(),
            start_time: self.utterance_start_time,
            end_time: now,
            is_final: false,
        })
    }

    fn build_final_segment(&self) -> VadSegment {
        let end_time = self.utterance_start_time + self.speech_buffer.len() as f64 / self.backend_rate as f64;
        VadSegment {
            audio: self.speech_buffer.clone(),
            start_time: self.utterance_start_time,
            end_time,
            is_final: true,
        }
    }

    fn reset_to_silence(&mut self) {
        self.state = VadState::Silence;
        self.speech_buffer.clear();
        self.candidate_audio.clear();
        self.candidate_frames = 0;
        self.last_interim_elapsed_ms = None;
        self.pre_ring.clear();
        self.backend.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::energy::EnergyVad;

    fn sine_chunk(len: usize, amplitude: f32, freq_hz: f32, sample_rate: u32, phase0: &mut f32) -> Vec<f32> {
        let mut out = Vec::with_capacity(len);
        let step = 2.0 * std::f32::consts::PI * freq_hz / sample_rate as f32;
        for _ in 0..len {
            out.push(amplitude * phase0.sin());
            *phase0 += step;
        }
        out
    }

    #[test]
    fn pure_silence_emits_nothing() {
        let mut vsm = VadStateMachine::new(Box::new(EnergyVad::new(1)), VadConfig::default()).unwrap();
        let silence = vec![0.0f32; 16000 * 2];
        let segs = vsm.process_chunk(&silence, 16000).unwrap();
        assert!(segs.is_empty());
        assert!(vsm.finalize().is_none());
    }

    #[test]
    fn short_audio_below_one_frame_buffers_without_emitting() {
        let mut vsm = VadStateMachine::new(Box::new(EnergyVad::new(1)), VadConfig::default()).unwrap();
        let tiny = vec![0.5f32; 10];
        let segs = vsm.process_chunk(&tiny, 16000).unwrap();
        assert!(segs.is_empty());
    }

    #[test]
    fn sustained_speech_then_silence_emits_one_final_segment() {
        let mut vsm = VadStateMachine::new(
            Box::new(EnergyVad::new(1)),
            VadConfig {
                threshold: 0.5,
                neg_threshold: 0.35,
                min_speech_ms: 250,
                min_silence_ms: 100,
                speech_pad_ms: 100,
                ..VadConfig::default()
            },
        )
        .unwrap();

        let mut phase = 0.0f32;
        let mut segs = Vec::new();
        segs.extend(vsm.process_chunk(&vec![0.01f32; 16000 * 5], 16000).unwrap());
        segs.extend(
            vsm.process_chunk(&sine_chunk(16000 * 8 / 10, 0.3, 440.0, 16000, &mut phase), 16000)
                .unwrap(),
        );
        segs.extend(vsm.process_chunk(&vec![0.01f32; 16000 * 2], 16000).unwrap());
        if let Some(seg) = vsm.finalize() {
            segs.push(seg);
        }

        let finals: Vec<_> = segs.iter().filter(|s| s.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert!(finals[0].start_time <= 4.9);
        assert!(finals[0].end_time >= 5.7);
    }
}
