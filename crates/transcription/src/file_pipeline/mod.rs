//! Deterministic offline counterpart to [`crate::stream::StreamTranscriber`]:
//! decode a media file, segment, recognize, write subtitles.
//! Structured after an own-engine-and-config worker that reads a file,
//! runs VAD, and loops over segments collecting recognition results,
//! generalized from a fixed WAV-only, Silero-only pipeline to an arbitrary
//! decoded container and a pluggable segmentation strategy.

pub mod decode;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::asr::AsrEngine;
use crate::error::{error_code_for, Result, TranscriptionError};
use crate::events::{now_ts, Event};
use crate::resource_provider::ResourceProvider;
use crate::subtitle::write_srt_file;
use crate::vad::{VadBackend, VadConfig, VadStateMachine};

/// Structured event sink, invoked alongside `tracing` logging for non-fatal
/// per-segment failures.
pub type EventSink = dyn Fn(&Event) + Send + Sync;

/// One subtitle cue produced by the pipeline (`FileSubtitleSegment`).
#[derive(Debug, Clone, PartialEq)]
pub struct FileSubtitleSegment {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

/// `(current, total, status, context)` progress callback.
pub type ProgressCallback<'a> = dyn Fn(u64, u64, &str, Option<&Value>) + Send + Sync + 'a;

/// Cooperative cancellation check, polled between segments.
pub type ShouldCancel<'a> = dyn Fn() -> bool + Send + Sync + 'a;

/// Custom segmentation strategy: `(audio, sample_rate) -> [(start, end)]`
/// spans in seconds.
pub type CustomSegmenter = dyn Fn(&[f32], u32) -> Result<Vec<(f64, f64)>> + Send + Sync;

/// Outcome of one file. Cancellation is modeled as a distinguished variant
/// rather than an error, since it is expected control flow, not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Completed(FileProcessingResult),
    Cancelled,
}

/// Result of a completed `process_file` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FileProcessingResult {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub subtitles: Vec<FileSubtitleSegment>,
    pub duration_seconds: f64,
    pub segment_count: usize,
}

/// How `process_file` splits decoded audio into recognizable spans.
pub enum Segmentation {
    /// Builds a fresh [`VadStateMachine`] per file (it carries per-stream
    /// mutable state and is not reusable across files), running in
    /// final-only mode.
    Vad {
        backend_factory: Arc<dyn Fn() -> Result<Box<dyn VadBackend>> + Send + Sync>,
        config: VadConfig,
    },
    Custom(Arc<CustomSegmenter>),
}

/// Offline file transcription pipeline.
pub struct FilePipeline {
    engine: Arc<dyn AsrEngine>,
    resources: Arc<dyn ResourceProvider>,
    segmentation: Segmentation,
    workspace: PathBuf,
    event_sink: Option<Arc<EventSink>>,
}

impl FilePipeline {
    pub fn new(
        engine: Arc<dyn AsrEngine>,
        resources: Arc<dyn ResourceProvider>,
        segmentation: Segmentation,
    ) -> Self {
        let workspace = resources.cache_root().join("file_pipeline");
        Self {
            engine,
            resources,
            segmentation,
            workspace,
            event_sink: None,
        }
    }

    /// Registers a structured event sink, notified for non-fatal per-segment
    /// transcription failures (`Event::Error`) in addition to the `warn!` log.
    pub fn with_event_sink(mut self, sink: Arc<EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    fn segment_spans(&self, audio: &[f32], sample_rate: u32) -> Result<Vec<(f64, f64, Vec<f32>)>> {
        match &self.segmentation {
            Segmentation::Custom(segmenter) => {
                let spans = segmenter(audio, sample_rate)?;
                Ok(spans
                    .into_iter()
                    .map(|(start, end)| {
                        let lo = (start * sample_rate as f64) as usize;
                        let hi = ((end * sample_rate as f64) as usize).min(audio.len());
                        (start, end, audio[lo.min(hi)..hi].to_vec())
                    })
                    .collect())
            }
            Segmentation::Vad {
                backend_factory,
                config,
            } => {
                let backend = backend_factory()?;
                let mut vad = VadStateMachine::new(backend, config.clone())?;
                let mut spans = Vec::new();
                // Final-only emission: feed the whole file in one call, VAD
                // interims are discarded.
                for seg in vad.process_chunk(audio, sample_rate)? {
                    if seg.is_final {
                        spans.push((seg.start_time, seg.end_time, seg.audio));
                    }
                }
                if let Some(seg) = vad.finalize() {
                    spans.push((seg.start_time, seg.end_time, seg.audio));
                }
                Ok(spans)
            }
        }
    }

    /// Processes one file end-to-end: probe, decode, segment, recognize,
    /// write subtitles.
    pub async fn process_file(
        &self,
        path: &Path,
        progress_callback: Option<&ProgressCallback<'_>>,
        should_cancel: Option<&ShouldCancel<'_>>,
    ) -> Result<FileOutcome> {
        let path = path.to_path_buf();
        let resources = self.resources.clone();

        decode::probe(resources.as_ref(), &path)?;

        let workspace = self.workspace.clone();
        let (audio, _decoded_file) = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || {
                decode::decode_to_mono_16k(resources.as_ref(), &path, &workspace)
            })
            .await
            .map_err(|e| TranscriptionError::UnsupportedFormat(e.to_string()))??
        };

        let duration_seconds = audio.len() as f64 / decode::DECODE_SAMPLE_RATE as f64;
        let spans = self.segment_spans(&audio, decode::DECODE_SAMPLE_RATE)?;
        let total = spans.len() as u64;

        let mut subtitles = Vec::with_capacity(spans.len());
        for (i, (start, end, slice)) in spans.into_iter().enumerate() {
            if let Some(cancel) = should_cancel {
                if cancel() {
                    info!(file = %path.display(), "file transcription cancelled");
                    return Ok(FileOutcome::Cancelled);
                }
            }

            let text = match self
                .engine
                .transcribe(&slice, decode::DECODE_SAMPLE_RATE)
                .await
            {
                Ok(result) => result.text,
                Err(e) => {
                    warn!(error = %e, segment = i, "segment transcription failed, emitting empty cue");
                    if let Some(sink) = &self.event_sink {
                        sink(&Event::Error {
                            error_code: error_code_for(&e).to_string(),
                            message: e.to_string(),
                            timestamp: now_ts(),
                            source_id: path.display().to_string(),
                            error_details: None,
                            metadata: None,
                        });
                    }
                    String::new()
                }
            };

            subtitles.push(FileSubtitleSegment {
                index: i + 1,
                start_time: start,
                end_time: end,
                text,
            });

            if let Some(cb) = progress_callback {
                cb(i as u64 + 1, total, "transcribing", None);
            }
        }

        let output_path = path.with_extension("srt");
        write_srt_file(&output_path, &subtitles)?;

        Ok(FileOutcome::Completed(FileProcessingResult {
            success: true,
            output_path: Some(output_path),
            segment_count: subtitles.len(),
            subtitles,
            duration_seconds,
        }))
    }

    /// Processes every file in `paths`, forwarding each outcome via
    /// `on_result`. One file's failure does not abort the batch unless
    /// `should_cancel` reports true.
    pub async fn process_files(
        &self,
        paths: &[PathBuf],
        on_result: &(dyn Fn(&Path, Result<FileOutcome>) + Send + Sync),
        progress_callback: Option<&ProgressCallback<'_>>,
        should_cancel: Option<&ShouldCancel<'_>>,
    ) {
        for path in paths {
            if let Some(cancel) = should_cancel {
                if cancel() {
                    on_result(path, Ok(FileOutcome::Cancelled));
                    continue;
                }
            }
            let result = self.process_file(path, progress_callback, should_cancel).await;
            on_result(path, result);
        }
    }

    /// Releases the temporary workspace.
    pub fn close(&self) -> Result<()> {
        if self.workspace.exists() {
            std::fs::remove_dir_all(&self.workspace)?;
        }
        Ok(())
    }
}

/// Guards a single cancellation flag shared across `should_cancel` closures
/// in tests and simple callers.
#[derive(Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::{AsrResult, LoadProgress};
    use async_trait::async_trait;

    struct EchoEngine;

    #[async_trait]
    impl AsrEngine for EchoEngine {
        async fn load_model(&self, _progress: Option<&LoadProgress<'_>>) -> Result<()> {
            Ok(())
        }
        fn required_sample_rate(&self) -> u32 {
            16000
        }
        fn supported_languages(&self) -> Vec<String> {
            vec!["en".to_string()]
        }
        async fn transcribe(&self, audio: &[f32], _sample_rate: u32) -> Result<AsrResult> {
            Ok(AsrResult {
                text: format!("len={}", audio.len()),
                confidence: 1.0,
            })
        }
        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FakeResources {
        root: PathBuf,
    }

    #[async_trait]
    impl ResourceProvider for FakeResources {
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
            _progress: Option<&crate::resource_provider::DownloadProgress<'_>>,
        ) -> Result<PathBuf> {
            unimplemented!()
        }
        async fn download_file_async(
            &self,
            _url: &str,
            _filename: &str,
            _expected_sha256: Option<&str>,
            _progress: Option<&crate::resource_provider::DownloadProgress<'_>>,
        ) -> Result<PathBuf> {
            unimplemented!()
        }
        fn ensure_media_tool(&self) -> Result<PathBuf> {
            Err(TranscriptionError::ResourceUnavailable(
                crate::error::anyhow_compat::BoxError::msg("no media tool bundled in tests"),
            ))
        }
        fn resolve_probe(&self) -> Result<PathBuf> {
            Err(TranscriptionError::ResourceUnavailable(
                crate::error::anyhow_compat::BoxError::msg("no probe bundled in tests"),
            ))
        }
    }

    fn pipeline(root: PathBuf) -> FilePipeline {
        FilePipeline::new(
            Arc::new(EchoEngine),
            Arc::new(FakeResources { root }),
            Segmentation::Custom(Arc::new(|audio, rate| {
                Ok(vec![(0.0, audio.len() as f64 / rate as f64)])
            })),
        )
    }

    #[tokio::test]
    async fn process_file_fails_fast_without_a_probe_binary() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path().to_path_buf());
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"not really media").unwrap();

        let err = pipeline
            .process_file(&input, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::ResourceUnavailable(_)));
    }

    #[test]
    fn cancellation_token_reflects_cancel_call() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
