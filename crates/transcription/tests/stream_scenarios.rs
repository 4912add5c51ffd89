//! End-to-end coverage of `StreamTranscriber` over a real `VadStateMachine`
//! and `EnergyVad` backend, driven entirely through the public API with
//! mock `AsrEngine`/`Translator` collaborators standing in for real
//! inference/translation backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use transcription_core::asr::{AsrResult, LoadProgress};
use transcription_core::error::anyhow_compat::BoxError;
use transcription_core::vad::energy::EnergyVad;
use transcription_core::{
    AsrEngine, Result, StreamTranscriber, StreamTranscriberConfig, Translator,
    TranscriptionError, VadConfig,
};

const SAMPLE_RATE: u32 = 16000;

fn silence(ms: u64) -> Vec<f32> {
    vec![0.0f32; (SAMPLE_RATE as u64 * ms / 1000) as usize]
}

fn tone(ms: u64, phase: &mut f32) -> Vec<f32> {
    let n = (SAMPLE_RATE as u64 * ms / 1000) as usize;
    let step = 2.0 * std::f32::consts::PI * 440.0 / SAMPLE_RATE as f32;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(0.3 * phase.sin());
        *phase += step;
    }
    out
}

/// Suppresses interim emission so a test can reason purely about finals.
fn no_interim_config() -> VadConfig {
    VadConfig {
        threshold: 0.5,
        neg_threshold: 0.35,
        min_speech_ms: 100,
        min_silence_ms: 100,
        speech_pad_ms: 0,
        max_speech_ms: 0,
        interim_min_duration_ms: 100_000,
        interim_interval_ms: 100_000,
    }
}

/// Three utterances of distinct duration separated by silence long enough
/// to trigger an offset commit (`min_silence_ms=100`) on its own.
fn three_utterances() -> Vec<f32> {
    let mut phase = 0.0f32;
    let mut audio = silence(300);
    audio.extend(tone(300, &mut phase));
    audio.extend(silence(500));
    audio.extend(tone(500, &mut phase));
    audio.extend(silence(500));
    audio.extend(tone(700, &mut phase));
    audio.extend(silence(500));
    audio
}

/// Engine whose per-call delay is inversely proportional to segment
/// duration, so a naive "whoever finishes first is emitted first" pool
/// would scramble the utterance order.
struct InverseDelayEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl AsrEngine for InverseDelayEngine {
    async fn load_model(&self, _progress: Option<&LoadProgress<'_>>) -> Result<()> {
        Ok(())
    }
    fn required_sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
    fn supported_languages(&self) -> Vec<String> {
        vec!["en".to_string()]
    }
    async fn transcribe(&self, audio: &[f32], sample_rate: u32) -> Result<AsrResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let duration_ms = (audio.len() as f64 / sample_rate as f64) * 1000.0;
        let delay_ms = (20_000.0 / duration_ms.max(1.0)).min(40.0) as u64;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(AsrResult {
            text: format!("utt-{n}"),
            confidence: 1.0,
        })
    }
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &str {
        "inverse-delay"
    }
}

#[tokio::test]
async fn single_worker_emits_finals_in_utterance_order() {
    let engine = Arc::new(InverseDelayEngine {
        calls: AtomicUsize::new(0),
    });
    let st = StreamTranscriber::new(
        engine,
        None,
        Box::new(EnergyVad::new(1)),
        StreamTranscriberConfig {
            source_id: "mic-0".to_string(),
            max_workers: 1,
            vad_config: no_interim_config(),
            source_lang: None,
            target_lang: None,
        },
    )
    .unwrap();
    st.load(None).await.unwrap();

    let audio = three_utterances();
    st.feed_audio(&audio, SAMPLE_RATE).await.unwrap();

    let mut results = Vec::new();
    for _ in 0..3 {
        let r = st
            .get_result(Duration::from_secs(2))
            .await
            .expect("expected a final result");
        results.push(r);
    }

    assert_eq!(results.len(), 3);
    assert!(results[0].start_time < results[1].start_time);
    assert!(results[1].start_time < results[2].start_time);
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r.text, format!("utt-{i}"));
    }

    st.close().await.unwrap();
}

struct ImmediateEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl AsrEngine for ImmediateEngine {
    async fn load_model(&self, _progress: Option<&LoadProgress<'_>>) -> Result<()> {
        Ok(())
    }
    fn required_sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
    fn supported_languages(&self) -> Vec<String> {
        vec!["en".to_string()]
    }
    async fn transcribe(&self, _audio: &[f32], _sample_rate: u32) -> Result<AsrResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AsrResult {
            text: format!("utt-{n}"),
            confidence: 1.0,
        })
    }
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &str {
        "immediate"
    }
}

#[tokio::test]
async fn interims_precede_the_final_for_one_long_utterance() {
    // A 4.4s utterance with interim_min_duration_ms=2000 and
    // interim_interval_ms=1000 crosses exactly three interim thresholds
    // (2.0s, 3.0s, 4.0s) before the audio runs out, so the fourth
    // threshold (5.0s) is never reached within this call.
    let engine = Arc::new(ImmediateEngine {
        calls: AtomicUsize::new(0),
    });
    let config = VadConfig {
        threshold: 0.5,
        neg_threshold: 0.35,
        min_speech_ms: 100,
        min_silence_ms: 100,
        speech_pad_ms: 0,
        max_speech_ms: 0,
        interim_min_duration_ms: 2000,
        interim_interval_ms: 1000,
    };
    let st = StreamTranscriber::new(
        engine,
        None,
        Box::new(EnergyVad::new(1)),
        StreamTranscriberConfig {
            source_id: "mic-0".to_string(),
            max_workers: 1,
            vad_config: config,
            source_lang: None,
            target_lang: None,
        },
    )
    .unwrap();
    st.load(None).await.unwrap();

    let interims: Arc<Mutex<Vec<transcription_core::stream::InterimResult>>> =
        Arc::new(Mutex::new(Vec::new()));
    let interims_cb = interims.clone();
    st.set_callbacks(
        None,
        Some(Arc::new(move |r: &transcription_core::stream::InterimResult| {
            interims_cb.lock().unwrap().push(r.clone());
        })),
        None,
    );

    let mut phase = 0.0f32;
    let audio = tone(4400, &mut phase);
    st.feed_audio(&audio, SAMPLE_RATE).await.unwrap();

    let seen = interims.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for r in &seen {
        assert_eq!(r.source_id, "mic-0");
    }
    let expected = [2.0, 3.0, 4.0];
    for (r, exp) in seen.iter().zip(expected.iter()) {
        assert!(
            (r.accumulated_time - exp).abs() < 0.05,
            "accumulated_time {} not within tolerance of {exp}",
            r.accumulated_time
        );
    }

    let last = st.finalize().await.unwrap().expect("expected a flushed final");
    assert_eq!(last.source_id, "mic-0");
    assert!(last.end_time >= 4.4);

    // No additional final arrives on the channel beyond the flushed one.
    assert!(st.get_result(Duration::from_millis(50)).await.is_none());

    st.close().await.unwrap();
}

/// Translator that fails on its second call (0-indexed: call #1) and
/// succeeds otherwise.
struct FlakyTranslator {
    calls: AtomicUsize,
}

#[async_trait]
impl Translator for FlakyTranslator {
    async fn translate(&self, text: &str, _source_lang: &str, _target_lang: &str) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 1 {
            Err(TranscriptionError::TranslationFailed(BoxError::msg(
                "translator unavailable",
            )))
        } else {
            Ok(format!("{text}-de"))
        }
    }
    fn supports(&self, _source_lang: &str, _target_lang: &str) -> bool {
        true
    }
}

#[tokio::test]
async fn translator_failure_on_one_utterance_does_not_stop_the_stream() {
    let engine = Arc::new(ImmediateEngine {
        calls: AtomicUsize::new(0),
    });
    let translator = Arc::new(FlakyTranslator {
        calls: AtomicUsize::new(0),
    });
    let st = StreamTranscriber::new(
        engine,
        Some(translator),
        Box::new(EnergyVad::new(1)),
        StreamTranscriberConfig {
            source_id: "mic-0".to_string(),
            max_workers: 1,
            vad_config: no_interim_config(),
            source_lang: Some("en".to_string()),
            target_lang: Some("de".to_string()),
        },
    )
    .unwrap();
    st.load(None).await.unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let errors_cb = errors.clone();
    st.set_callbacks(
        None,
        None,
        Some(Arc::new(move |_e: &TranscriptionError| {
            errors_cb.fetch_add(1, Ordering::SeqCst);
        })),
    );

    let audio = three_utterances();
    st.feed_audio(&audio, SAMPLE_RATE).await.unwrap();

    let mut results = Vec::new();
    for _ in 0..3 {
        let r = st
            .get_result(Duration::from_secs(2))
            .await
            .expect("expected a final result");
        results.push(r);
    }

    assert_eq!(results.len(), 3);
    assert!(results[0].translated_text.is_some());
    assert!(results[1].translated_text.is_none());
    assert!(results[2].translated_text.is_some());
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    st.close().await.unwrap();
}
