//! Exercises `FilePipeline::process_file` end to end through the real
//! `ffmpeg`/`ffprobe` external tools. These tests gate on the tools being
//! present on `PATH` and skip (rather than fail) when they are not, since
//! this crate treats them as an external, caller-provided dependency
//! rather than something it bundles.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use transcription_core::asr::LoadProgress;
use transcription_core::error::anyhow_compat::BoxError;
use transcription_core::file_pipeline::{FileOutcome, FilePipeline, Segmentation};
use transcription_core::vad::energy::EnergyVad;
use transcription_core::{
    AsrEngine, AsrResult, Event, Result, ResourceProvider, TranscriptionError, VadBackend, VadConfig,
};

const SAMPLE_RATE: u32 = 16000;

fn media_tools_available() -> bool {
    let ffmpeg_ok = std::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    let ffprobe_ok = std::process::Command::new("ffprobe")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    ffmpeg_ok && ffprobe_ok
}

/// Writes a WAV file alternating tone/silence spans, `(is_tone, seconds)`.
fn write_pattern_wav(path: &Path, pattern: &[(bool, f64)]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut phase = 0.0f32;
    let step = 2.0 * std::f32::consts::PI * 440.0 / SAMPLE_RATE as f32;
    for (is_tone, seconds) in pattern {
        let n = (SAMPLE_RATE as f64 * seconds) as usize;
        for _ in 0..n {
            let sample = if *is_tone {
                let v = 0.3 * phase.sin();
                phase += step;
                v
            } else {
                0.0
            };
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

struct RealMediaToolResources {
    root: PathBuf,
}

#[async_trait]
impl ResourceProvider for RealMediaToolResources {
    fn models_root(&self) -> PathBuf {
        self.root.join("models")
    }
    fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }
    fn get_models_dir(&self, engine_name: &str) -> PathBuf {
        self.root.join("models").join(engine_name)
    }
    fn download_file(
        &self,
        _url: &str,
        _filename: &str,
        _expected_sha256: Option<&str>,
        _progress: Option<&transcription_core::resource_provider::DownloadProgress<'_>>,
    ) -> Result<PathBuf> {
        unimplemented!()
    }
    async fn download_file_async(
        &self,
        _url: &str,
        _filename: &str,
        _expected_sha256: Option<&str>,
        _progress: Option<&transcription_core::resource_provider::DownloadProgress<'_>>,
    ) -> Result<PathBuf> {
        unimplemented!()
    }
    fn ensure_media_tool(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("ffmpeg"))
    }
    fn resolve_probe(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("ffprobe"))
    }
}

struct IndexedEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl AsrEngine for IndexedEngine {
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
            text: format!("seg{n}"),
            confidence: 1.0,
        })
    }
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &str {
        "indexed"
    }
}

fn vad_segmentation() -> Segmentation {
    Segmentation::Vad {
        backend_factory: Arc::new(|| Ok(Box::new(EnergyVad::new(1)) as Box<dyn VadBackend>)),
        config: VadConfig {
            threshold: 0.5,
            neg_threshold: 0.35,
            min_speech_ms: 250,
            min_silence_ms: 100,
            speech_pad_ms: 100,
            max_speech_ms: 0,
            interim_min_duration_ms: 1_000_000,
            interim_interval_ms: 1_000_000,
        },
    }
}

#[tokio::test]
async fn processing_the_same_file_twice_yields_identical_subtitles() {
    if !media_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not found on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clip.wav");
    write_pattern_wav(
        &input,
        &[
            (false, 1.0),
            (true, 2.0),
            (false, 1.0),
            (true, 2.0),
            (false, 1.0),
            (true, 2.0),
            (false, 1.0),
        ],
    );

    let resources = Arc::new(RealMediaToolResources {
        root: dir.path().join("resources"),
    });

    let first = run_pipeline_once(&input, resources.clone()).await;
    let second = run_pipeline_once(&input, resources.clone()).await;

    assert_eq!(first, second);
    assert!(first.contains("seg0"));
}

async fn run_pipeline_once(input: &Path, resources: Arc<RealMediaToolResources>) -> String {
    let pipeline = FilePipeline::new(
        Arc::new(IndexedEngine {
            calls: AtomicUsize::new(0),
        }),
        resources,
        vad_segmentation(),
    );
    let outcome = pipeline.process_file(input, None, None).await.unwrap();
    let result = match outcome {
        FileOutcome::Completed(r) => r,
        FileOutcome::Cancelled => panic!("unexpected cancellation"),
    };
    std::fs::read_to_string(result.output_path.unwrap()).unwrap()
}

#[tokio::test]
async fn cancellation_after_the_third_segment_stops_the_file_early() {
    if !media_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not found on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("long.wav");
    // Six well-separated utterances: enough that cancellation after the
    // third one leaves later segments unprocessed.
    let mut pattern = Vec::new();
    for _ in 0..6 {
        pattern.push((false, 2.0));
        pattern.push((true, 8.0));
    }
    pattern.push((false, 2.0));
    write_pattern_wav(&input, &pattern);

    let resources = Arc::new(RealMediaToolResources {
        root: dir.path().join("resources"),
    });
    let workspace = resources.cache_root().join("file_pipeline");
    let pipeline = FilePipeline::new(
        Arc::new(IndexedEngine {
            calls: AtomicUsize::new(0),
        }),
        resources,
        vad_segmentation(),
    );

    let completed_segments = Arc::new(AtomicUsize::new(0));
    let progress_counter = completed_segments.clone();
    let progress_cb = move |_current: u64, _total: u64, _status: &str, _ctx: Option<&Value>| {
        progress_counter.fetch_add(1, Ordering::SeqCst);
    };
    let cancel_counter = completed_segments.clone();
    let should_cancel = move || cancel_counter.load(Ordering::SeqCst) >= 3;

    let outcome = pipeline
        .process_file(&input, Some(&progress_cb), Some(&should_cancel))
        .await
        .unwrap();

    assert!(matches!(outcome, FileOutcome::Cancelled));
    assert!(!input.with_extension("srt").exists());
    assert_eq!(completed_segments.load(Ordering::SeqCst), 3);

    let decoded_path = workspace.join("long.decoded.wav");
    assert!(!decoded_path.exists());
}

/// Engine that fails on its second call (0-indexed: call #1) and succeeds
/// otherwise, so the pipeline sees exactly one non-fatal segment failure.
struct FlakyEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl AsrEngine for FlakyEngine {
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
        if n == 1 {
            Err(TranscriptionError::SegmentTranscriptionFailed(BoxError::msg(
                "engine unavailable",
            )))
        } else {
            Ok(AsrResult {
                text: format!("seg{n}"),
                confidence: 1.0,
            })
        }
    }
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test]
async fn a_failed_segment_yields_an_empty_cue_and_an_error_event() {
    if !media_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not found on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clip.wav");
    write_pattern_wav(
        &input,
        &[
            (false, 1.0),
            (true, 2.0),
            (false, 1.0),
            (true, 2.0),
            (false, 1.0),
            (true, 2.0),
            (false, 1.0),
        ],
    );

    let resources = Arc::new(RealMediaToolResources {
        root: dir.path().join("resources"),
    });
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let events_sink = events.clone();
    let pipeline = FilePipeline::new(
        Arc::new(FlakyEngine {
            calls: AtomicUsize::new(0),
        }),
        resources,
        vad_segmentation(),
    )
    .with_event_sink(Arc::new(move |e: &Event| {
        events_sink.lock().unwrap().push(e.clone());
    }));

    let outcome = pipeline.process_file(&input, None, None).await.unwrap();
    let result = match outcome {
        FileOutcome::Completed(r) => r,
        FileOutcome::Cancelled => panic!("unexpected cancellation"),
    };

    assert_eq!(result.subtitles.len(), 3);
    assert_eq!(result.subtitles[0].text, "seg0");
    assert_eq!(result.subtitles[1].text, "");
    assert_eq!(result.subtitles[2].text, "seg2");

    let seen = events.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    match &seen[0] {
        Event::Error {
            error_code,
            source_id,
            ..
        } => {
            assert_eq!(error_code, "segment_transcription_failed");
            assert_eq!(source_id, &input.display().to_string());
        }
        other => panic!("expected an Event::Error, got {other:?}"),
    }
}
