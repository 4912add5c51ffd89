//! Owns the VAD state machine and ASR engine for one logical audio stream,
//! serializes recognition through a [`worker_pool::WorkerPool`], and emits
//! ordered results via callbacks, a polled channel, or an async stream.

pub mod worker_pool;

pub use worker_pool::{InterimResult, TranscriptionResult, WorkerEvent};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;

use futures::Stream;
use tokio::sync::Mutex as AsyncMutex;

use crate::asr::{AsrEngine, LoadProgress};
use crate::audio::AudioSource;
use crate::error::{error_code_for, Result, TranscriptionError};
use crate::events::{now_ts, Event, StatusPhase, TranscriptionPhase};
use crate::translator::Translator;
use crate::vad::{VadBackend, VadConfig, VadStateMachine};

use worker_pool::WorkerPool;

type ResultCallback = dyn Fn(&TranscriptionResult) + Send + Sync;
type InterimCallback = dyn Fn(&InterimResult) + Send + Sync;
type ErrorCallback = dyn Fn(&TranscriptionError) + Send + Sync;
type EventSink = dyn Fn(&Event) + Send + Sync;

#[derive(Default)]
struct Callbacks {
    on_result: Option<Arc<ResultCallback>>,
    on_interim: Option<Arc<InterimCallback>>,
    on_error: Option<Arc<ErrorCallback>>,
    event_sink: Option<Arc<EventSink>>,
}

/// Construction parameters for [`StreamTranscriber::new`].
pub struct StreamTranscriberConfig {
    pub source_id: String,
    pub max_workers: usize,
    pub vad_config: VadConfig,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
}

impl Default for StreamTranscriberConfig {
    fn default() -> Self {
        Self {
            source_id: "default".to_string(),
            max_workers: 1,
            vad_config: VadConfig::default(),
            source_lang: None,
            target_lang: None,
        }
    }
}

/// Real-time streaming transcription over one audio stream.
///
/// Owns the VAD state machine and the ASR engine; accepts audio via push
/// (`feed_audio`) or pull (`transcribe_sync`/`transcribe_async`); serializes
/// engine invocations through an internal [`WorkerPool`]; emits results in
/// utterance-start order.
pub struct StreamTranscriber {
    engine: Arc<dyn AsrEngine>,
    vad: SyncMutex<VadStateMachine>,
    vad_sample_rate: u32,
    pool: Arc<WorkerPool>,
    source_id: String,
    loaded: AtomicBool,
    closed: AtomicBool,
    callbacks: Arc<SyncMutex<Callbacks>>,
    result_rx: AsyncMutex<tokio::sync::mpsc::Receiver<TranscriptionResult>>,
    dispatch_handle: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StreamTranscriber {
    pub fn new(
        engine: Arc<dyn AsrEngine>,
        translator: Option<Arc<dyn Translator>>,
        vad_backend: Box<dyn VadBackend>,
        config: StreamTranscriberConfig,
    ) -> Result<Self> {
        let vad = VadStateMachine::new(vad_backend, config.vad_config)?;
        let vad_sample_rate = vad.backend_sample_rate();

        let pool = Arc::new(WorkerPool::new(
            engine.clone(),
            translator,
            config.source_lang,
            config.target_lang,
            config.max_workers,
            vad_sample_rate,
        ));

        let callbacks = Arc::new(SyncMutex::new(Callbacks::default()));
        let (output_tx, output_rx) = tokio::sync::mpsc::channel(32);

        let dispatch_pool = pool.clone();
        let dispatch_callbacks = callbacks.clone();
        let dispatch_source_id = config.source_id.clone();
        let dispatch_handle = tokio::spawn(async move {
            while let Some(event) = dispatch_pool.recv_event().await {
                match event {
                    WorkerEvent::Final(result) => {
                        let (on_result, event_sink) = {
                            let guard = dispatch_callbacks.lock().unwrap();
                            (guard.on_result.clone(), guard.event_sink.clone())
                        };
                        if let Some(cb) = on_result {
                            cb(&result);
                        }
                        if let Some(sink) = event_sink {
                            sink(&Event::Transcription {
                                text: result.text.clone(),
                                source_id: result.source_id.clone(),
                                is_final: true,
                                timestamp: now_ts(),
                                confidence: Some(result.confidence),
                                language: None,
                                phase: Some(TranscriptionPhase::Final),
                                display_text: None,
                                speech_probability: None,
                                audio_quality: None,
                                noise_level: None,
                                metadata: None,
                            });
                        }
                        if output_tx.send(result).await.is_err() {
                            return;
                        }
                    }
                    WorkerEvent::Error(err) => {
                        let (on_error, event_sink) = {
                            let guard = dispatch_callbacks.lock().unwrap();
                            (guard.on_error.clone(), guard.event_sink.clone())
                        };
                        if let Some(cb) = &on_error {
                            cb(&err);
                        }
                        if let Some(sink) = event_sink {
                            sink(&Event::Error {
                                error_code: error_code_for(&err).to_string(),
                                message: err.to_string(),
                                timestamp: now_ts(),
                                source_id: dispatch_source_id.clone(),
                                error_details: None,
                                metadata: None,
                            });
                        }
                    }
                }
            }
        });

        Ok(Self {
            engine,
            vad: SyncMutex::new(vad),
            vad_sample_rate,
            pool,
            source_id: config.source_id,
            loaded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            callbacks,
            result_rx: AsyncMutex::new(output_rx),
            dispatch_handle: SyncMutex::new(Some(dispatch_handle)),
        })
    }

    /// Loads the underlying engine (idempotent) and emits `status` lifecycle
    /// events around it.
    pub async fn load(&self, progress: Option<&LoadProgress<'_>>) -> Result<()> {
        self.emit_status(StatusPhase::Processing, "loading engine");
        self.engine.load_model(progress).await?;
        self.loaded.store(true, Ordering::SeqCst);
        self.emit_status(StatusPhase::Ready, "engine ready");
        Ok(())
    }

    /// Registers push callbacks, invoked from the dispatch task. Callbacks
    /// must not block or hold locks across other calls into this transcriber.
    pub fn set_callbacks(
        &self,
        on_result: Option<Arc<ResultCallback>>,
        on_interim: Option<Arc<InterimCallback>>,
        on_error: Option<Arc<ErrorCallback>>,
    ) {
        let mut guard = self.callbacks.lock().unwrap();
        guard.on_result = on_result;
        guard.on_interim = on_interim;
        guard.on_error = on_error;
    }

    /// Registers a structured event sink.
    pub fn set_event_sink(&self, sink: Option<Arc<EventSink>>) {
        self.callbacks.lock().unwrap().event_sink = sink;
    }

    fn emit_status(&self, phase: StatusPhase, message: &str) {
        let sink = self.callbacks.lock().unwrap().event_sink.clone();
        if let Some(sink) = sink {
            let status_code = match phase {
                StatusPhase::Processing => "processing",
                StatusPhase::Ready => "ready",
                StatusPhase::Idle => "idle",
            };
            sink(&Event::Status {
                status_code: status_code.to_string(),
                message: message.to_string(),
                timestamp: now_ts(),
                source_id: self.source_id.clone(),
                phase: Some(phase),
                metadata: None,
            });
        }
    }

    /// Push-mode audio ingestion. Runs VAD on the caller's
    /// task, enqueues finals for recognition, and recognizes interims
    /// immediately for minimum latency. Fails with [`TranscriptionError::EngineNotReady`]
    /// if `load()` has not yet completed.
    pub async fn feed_audio(&self, audio: &[f32], sample_rate: u32) -> Result<()> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(TranscriptionError::EngineNotReady);
        }

        let segments = {
            let mut vad = self.vad.lock().unwrap();
            vad.process_chunk(audio, sample_rate)?
        };

        for seg in segments {
            if seg.is_final {
                self.pool.submit_final(seg, self.source_id.clone()).await?;
            } else {
                self.run_interim(seg).await;
            }
        }
        Ok(())
    }

    async fn run_interim(&self, seg: crate::vad::VadSegment) {
        let lock = self.pool.engine_lock();
        let text = {
            let _permit = lock.lock().await;
            match self.engine.transcribe(&seg.audio, self.vad_sample_rate).await {
                Ok(r) => r.text,
                Err(e) => {
                    self.emit_worker_error(e);
                    return;
                }
            }
        };

        let interim = InterimResult {
            text,
            accumulated_time: seg.end_time - seg.start_time,
            source_id: self.source_id.clone(),
        };

        let (on_interim, event_sink) = {
            let guard = self.callbacks.lock().unwrap();
            (guard.on_interim.clone(), guard.event_sink.clone())
        };
        if let Some(cb) = on_interim {
            cb(&interim);
        }
        if let Some(sink) = event_sink {
            sink(&Event::Transcription {
                text: interim.text.clone(),
                source_id: interim.source_id.clone(),
                is_final: false,
                timestamp: now_ts(),
                confidence: None,
                language: None,
                phase: Some(TranscriptionPhase::Interim),
                display_text: None,
                speech_probability: None,
                audio_quality: None,
                noise_level: None,
                metadata: None,
            });
        }
    }

    fn emit_worker_error(&self, err: TranscriptionError) {
        let (on_error, event_sink) = {
            let guard = self.callbacks.lock().unwrap();
            (guard.on_error.clone(), guard.event_sink.clone())
        };
        if let Some(cb) = &on_error {
            cb(&err);
        }
        if let Some(sink) = event_sink {
            sink(&Event::Error {
                error_code: error_code_for(&err).to_string(),
                message: err.to_string(),
                timestamp: now_ts(),
                source_id: self.source_id.clone(),
                error_details: None,
                metadata: None,
            });
        }
    }

    /// Pops one final result, or returns `None` after `timeout` elapses.
    pub async fn get_result(&self, timeout: Duration) -> Option<TranscriptionResult> {
        tokio::time::timeout(timeout, async { self.result_rx.lock().await.recv().await })
            .await
            .ok()
            .flatten()
    }

    /// Flushes the VAD state machine and waits for all pending recognitions.
    pub async fn finalize(&self) -> Result<Option<TranscriptionResult>> {
        let flushed = { self.vad.lock().unwrap().finalize() };
        let last = match flushed {
            Some(seg) => Some(
                self.pool
                    .submit_final_awaited(seg, self.source_id.clone())
                    .await?,
            ),
            None => None,
        };
        self.pool.wait_idle().await;
        Ok(last)
    }

    /// Clears VAD state and drops queued/in-flight work from before this
    /// call; already-delivered-but-undrained results are
    /// also discarded.
    pub async fn reset(&self) {
        self.vad.lock().unwrap().reset();
        self.pool.bump_generation();
        let mut rx = self.result_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Idempotent shutdown: stops the dispatch task, shuts down the worker
    /// pool, and releases the engine.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.emit_status(StatusPhase::Idle, "stream closed");
        if let Some(handle) = self.dispatch_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.pool.shutdown();
        self.engine.cleanup().await?;
        Ok(())
    }

    /// Pull-mode synchronous iteration. Must be called from
    /// within a multi-threaded Tokio runtime; each `next()` blocks the
    /// calling thread until a result, a source error, or exhaustion.
    pub fn transcribe_sync<'a>(
        &'a self,
        mut source: Box<dyn AudioSource>,
    ) -> impl Iterator<Item = Result<TranscriptionResult>> + 'a {
        let mut exhausted = false;
        let mut opened = false;
        std::iter::from_fn(move || {
            if exhausted {
                return None;
            }
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current()
                    .block_on(self.pull_one(&mut *source, &mut opened, &mut exhausted))
            })
        })
    }

    /// Pull-mode asynchronous iteration.
    pub fn transcribe_async<'a>(
        &'a self,
        source: Box<dyn AudioSource>,
    ) -> impl Stream<Item = Result<TranscriptionResult>> + 'a {
        futures::stream::unfold(
            (source, false, false),
            move |(mut source, mut opened, mut exhausted)| async move {
                if exhausted {
                    return None;
                }
                let item = self.pull_one(&mut *source, &mut opened, &mut exhausted).await;
                item.map(|r| (r, (source, opened, exhausted)))
            },
        )
    }

    async fn pull_one(
        &self,
        source: &mut dyn AudioSource,
        opened: &mut bool,
        exhausted: &mut bool,
    ) -> Option<Result<TranscriptionResult>> {
        if *exhausted {
            return None;
        }
        if !*opened {
            if let Err(e) = source.open().await {
                *exhausted = true;
                return Some(Err(e));
            }
            *opened = true;
        }
        loop {
            match source.next_chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = self.feed_audio(&chunk.samples, chunk.sample_rate).await {
                        *exhausted = true;
                        return Some(Err(e));
                    }
                    if let Ok(result) = self.result_rx.lock().await.try_recv() {
                        return Some(Ok(result));
                    }
                }
                Ok(None) => {
                    *exhausted = true;
                    let _ = source.close().await;
                    return match self.finalize().await {
                        Ok(Some(result)) => Some(Ok(result)),
                        Ok(None) => None,
                        Err(e) => Some(Err(e)),
                    };
                }
                Err(e) => {
                    *exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
