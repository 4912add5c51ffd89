//! Confirms VAD hysteresis end to end through the public crate surface:
//! a continuous utterance with leading/trailing silence collapses to a
//! single final segment spanning (approximately) the speech, not one
//! segment per chunk boundary. The state-machine internals of this
//! behavior are covered in depth by `transcription_core::vad::state_machine`'s
//! own unit tests; this test only confirms the public API wires them up.

use transcription_core::vad::energy::EnergyVad;
use transcription_core::{VadConfig, VadStateMachine};

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
fn sustained_utterance_between_silence_yields_one_segment() {
    let config = VadConfig {
        threshold: 0.5,
        neg_threshold: 0.35,
        min_speech_ms: 250,
        min_silence_ms: 100,
        speech_pad_ms: 100,
        ..VadConfig::default()
    };
    let mut vsm = VadStateMachine::new(Box::new(EnergyVad::new(1)), config).unwrap();

    let mut phase = 0.0f32;
    let mut segments = Vec::new();
    segments.extend(vsm.process_chunk(&vec![0.0f32; 16000], 16000).unwrap());
    segments.extend(
        vsm.process_chunk(&sine_chunk(16000 * 2, 0.3, 440.0, 16000, &mut phase), 16000)
            .unwrap(),
    );
    segments.extend(vsm.process_chunk(&vec![0.0f32; 16000], 16000).unwrap());
    if let Some(seg) = vsm.finalize() {
        segments.push(seg);
    }

    let finals: Vec<_> = segments.iter().filter(|s| s.is_final).collect();
    assert_eq!(finals.len(), 1);
    assert!(finals[0].start_time < finals[0].end_time);
    assert!(!finals[0].audio.is_empty());
}

#[test]
fn config_rejects_inverted_thresholds_before_any_audio_is_fed() {
    let bad = VadConfig {
        threshold: 0.2,
        neg_threshold: 0.6,
        ..VadConfig::default()
    };
    assert!(VadStateMachine::new(Box::new(EnergyVad::new(1)), bad).is_err());
}
