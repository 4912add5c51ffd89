//! Worker pool with sequence-ordered result reordering: a dedicated ASR
//! task pool fed by a channel so producer-side processing is never blocked
//! by inference, generalized from a single worker to `max_workers` of them
//! plus an explicit reorder stage that releases results in submission order
//! regardless of which worker finishes first.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tracing::warn;

use crate::asr::AsrEngine;
use crate::error::{Result, TranscriptionError};
use crate::translator::Translator;
use crate::vad::VadSegment;

/// Finalized recognition output.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub is_final: bool,
    pub confidence: f32,
    pub source_id: String,
    pub translated_text: Option<String>,
    pub target_language: Option<String>,
}

impl TranscriptionResult {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// In-progress recognition output. Never translated.
#[derive(Debug, Clone, PartialEq)]
pub struct InterimResult {
    pub text: String,
    pub accumulated_time: f64,
    pub source_id: String,
}

/// Event surfaced by the pool to the owning [`crate::stream::StreamTranscriber`].
pub enum WorkerEvent {
    Final(TranscriptionResult),
    /// A non-fatal condition (translation failure, segment transcription
    /// failure) that must still reach the error callback.
    Error(TranscriptionError),
}

struct FinalWork {
    sequence: u64,
    generation: u64,
    segment: VadSegment,
    source_id: String,
}

/// Pool of `max_workers` tasks recognizing queued final segments
/// concurrently, with a reorder stage that releases results in
/// segment-submission (sequence) order regardless of completion order.
/// Sequence numbers are assigned in `start_time` order at VAD emission
/// time, so sequence order and `start_time` order coincide — final
/// results reach callbacks ordered by `start_time`.
pub struct WorkerPool {
    work_tx: mpsc::Sender<FinalWork>,
    result_rx: AsyncMutex<mpsc::Receiver<WorkerEvent>>,
    next_sequence: AtomicU64,
    pending: Arc<AtomicU64>,
    idle: Arc<Notify>,
    waiters: Arc<AsyncMutex<std::collections::HashMap<u64, oneshot::Sender<TranscriptionResult>>>>,
    /// Bumped by `reset()`. Work tagged with a stale generation is dropped
    /// by the reorder stage instead of being forwarded, so in-flight
    /// recognitions from before a reset don't resurface after it: they
    /// complete, but their outputs are discarded.
    generation: Arc<AtomicU64>,
    worker_handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    reorder_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    vad_sample_rate: u32,
    engine_lock: Arc<EngineLock>,
}

/// Serializes `engine.transcribe()` calls across workers: most backends
/// are not safe to invoke concurrently on a single model instance. A no-op
/// in practice when `max_workers == 1`.
type EngineLock = AsyncMutex<()>;

impl WorkerPool {
    pub fn new(
        engine: Arc<dyn AsrEngine>,
        translator: Option<Arc<dyn Translator>>,
        source_lang: Option<String>,
        target_lang: Option<String>,
        max_workers: usize,
        vad_sample_rate: u32,
    ) -> Self {
        let max_workers = max_workers.max(1);
        // Bounded at `max_workers` so `feed_audio` back-pressures once every
        // worker is busy, rather than queuing unboundedly.
        let (work_tx, work_rx) = mpsc::channel::<FinalWork>(max_workers);
        let work_rx = Arc::new(AsyncMutex::new(work_rx));

        let (raw_tx, raw_rx) = mpsc::channel::<(u64, u64, TranscriptionResult, Option<TranscriptionError>)>(
            max_workers * 2,
        );
        let (result_tx, result_rx) = mpsc::channel::<WorkerEvent>(max_workers * 4);

        let pending = Arc::new(AtomicU64::new(0));
        let idle = Arc::new(Notify::new());
        let waiters = Arc::new(AsyncMutex::new(std::collections::HashMap::new()));
        let generation = Arc::new(AtomicU64::new(0));
        let engine_lock: Arc<EngineLock> = Arc::new(AsyncMutex::new(()));

        let mut worker_handles = Vec::with_capacity(max_workers);
        for _ in 0..max_workers {
            let work_rx = work_rx.clone();
            let engine = engine.clone();
            let translator = translator.clone();
            let source_lang = source_lang.clone();
            let target_lang = target_lang.clone();
            let raw_tx = raw_tx.clone();
            let engine_lock = engine_lock.clone();
            let vad_sample_rate_for_worker = vad_sample_rate;
            worker_handles.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = work_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else { break };
                    let (result, error) = Self::run_one(
                        engine.as_ref(),
                        engine_lock.as_ref(),
                        translator.as_deref(),
                        source_lang.as_deref(),
                        target_lang.as_deref(),
                        item.segment,
                        item.source_id,
                        vad_sample_rate_for_worker,
                    )
                    .await;
                    if raw_tx
                        .send((item.sequence, item.generation, result, error))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }));
        }
        drop(raw_tx);

        let reorder_handle = tokio::spawn(Self::reorder_loop(
            raw_rx,
            result_tx,
            pending.clone(),
            idle.clone(),
            waiters.clone(),
            generation.clone(),
        ));

        Self {
            work_tx,
            result_rx: AsyncMutex::new(result_rx),
            next_sequence: AtomicU64::new(0),
            pending,
            idle,
            waiters,
            generation,
            worker_handles: std::sync::Mutex::new(worker_handles),
            reorder_handle: std::sync::Mutex::new(Some(reorder_handle)),
            vad_sample_rate,
            engine_lock,
        }
    }

    /// Sample rate final-segment audio is recognized at (the VAD backend's
    /// rate; ASR engines resample internally if this differs from their own
    /// `required_sample_rate()`).
    pub fn vad_sample_rate(&self) -> u32 {
        self.vad_sample_rate
    }

    /// Clone of the engine's exclusive-access lock, for callers (the
    /// interim recognition path) that call `engine.transcribe()` directly
    /// rather than through the queue, but must still serialize against the
    /// pool's own workers.
    pub(crate) fn engine_lock(&self) -> Arc<EngineLock> {
        self.engine_lock.clone()
    }

    /// Enqueues a final segment for recognition, assigning it the next
    /// sequence number. Blocks (back-pressures the caller) if every worker
    /// is busy — segments are never dropped.
    pub async fn submit_final(&self, segment: VadSegment, source_id: String) -> Result<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.work_tx
            .send(FinalWork {
                sequence,
                generation,
                segment,
                source_id,
            })
            .await
            .map_err(|_| TranscriptionError::EngineNotReady)?;
        Ok(sequence)
    }

    /// Submits a final segment and awaits its own result specifically (used
    /// by `finalize()`, which needs the flush segment's own output rather
    /// than whatever next arrives on the general event stream).
    pub async fn submit_final_awaited(
        &self,
        segment: VadSegment,
        source_id: String,
    ) -> Result<TranscriptionResult> {
        let (tx, rx) = oneshot::channel();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.waiters.lock().await.insert(sequence, tx);
        self.work_tx
            .send(FinalWork {
                sequence,
                generation,
                segment,
                source_id,
            })
            .await
            .map_err(|_| TranscriptionError::EngineNotReady)?;
        rx.await.map_err(|_| TranscriptionError::EngineNotReady)
    }

    /// Runs a single segment through the engine (and translator, if any),
    /// never returning a hard error: recognition/translation failures are
    /// downgraded to an empty result plus a surfaced [`TranscriptionError`],
    /// so one bad segment never kills the worker task.
    async fn run_one(
        engine: &dyn AsrEngine,
        engine_lock: &EngineLock,
        translator: Option<&dyn Translator>,
        source_lang: Option<&str>,
        target_lang: Option<&str>,
        segment: VadSegment,
        source_id: String,
        vad_sample_rate: u32,
    ) -> (TranscriptionResult, Option<TranscriptionError>) {
        let start_time = segment.start_time;
        let end_time = segment.end_time;

        let (text, confidence, asr_error) = {
            let _permit = engine_lock.lock().await;
            match engine.transcribe(&segment.audio, vad_sample_rate).await {
                Ok(r) => (r.text, r.confidence, None),
                Err(e) => {
                    warn!(error = %e, "segment transcription failed");
                    (String::new(), 0.0, Some(e))
                }
            }
        };

        let mut translated_text = None;
        let mut target_language = None;
        let mut translation_error = None;
        if let (Some(translator), Some(src), Some(tgt)) = (translator, source_lang, target_lang) {
            if !text.is_empty() {
                match translator.translate(&text, src, tgt).await {
                    Ok(translated) => {
                        translated_text = Some(translated);
                        target_language = Some(tgt.to_string());
                    }
                    Err(e) => {
                        warn!(error = %e, "translation failed, emitting untranslated result");
                        translation_error = Some(e);
                    }
                }
            }
        }

        let result = TranscriptionResult {
            text,
            start_time,
            end_time,
            is_final: true,
            confidence,
            source_id,
            translated_text,
            target_language,
        };

        (result, asr_error.or(translation_error))
    }

    #[allow(clippy::too_many_arguments)]
    async fn reorder_loop(
        mut raw_rx: mpsc::Receiver<(u64, u64, TranscriptionResult, Option<TranscriptionError>)>,
        result_tx: mpsc::Sender<WorkerEvent>,
        pending: Arc<AtomicU64>,
        idle: Arc<Notify>,
        waiters: Arc<AsyncMutex<std::collections::HashMap<u64, oneshot::Sender<TranscriptionResult>>>>,
        generation: Arc<AtomicU64>,
    ) {
        let mut buffer: BTreeMap<u64, (u64, TranscriptionResult, Option<TranscriptionError>)> =
            BTreeMap::new();
        let mut next_expected = 0u64;

        while let Some((sequence, item_generation, result, error)) = raw_rx.recv().await {
            buffer.insert(sequence, (item_generation, result, error));
            while let Some((item_generation, result, error)) = buffer.remove(&next_expected) {
                if let Some(tx) = waiters.lock().await.remove(&next_expected) {
                    let _ = tx.send(result.clone());
                }
                if item_generation == generation.load(Ordering::SeqCst) {
                    if result_tx.send(WorkerEvent::Final(result)).await.is_err() {
                        return;
                    }
                    if let Some(err) = error {
                        if result_tx.send(WorkerEvent::Error(err)).await.is_err() {
                            return;
                        }
                    }
                }
                next_expected += 1;
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    idle.notify_waiters();
                }
            }
        }
    }

    /// Receives the next worker event (final result or non-fatal error).
    pub async fn recv_event(&self) -> Option<WorkerEvent> {
        self.result_rx.lock().await.recv().await
    }

    /// Blocks until no recognition work is pending anywhere in the pool.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Bumps the generation counter so outputs from work submitted before
    /// this call are discarded once they complete, instead of being
    /// forwarded. Used by `StreamTranscriber::reset()`.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Idempotent shutdown: aborts outstanding worker/reorder tasks. Safe
    /// under concurrent calls.
    pub fn shutdown(&self) {
        for handle in self.worker_handles.lock().unwrap().drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.reorder_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
