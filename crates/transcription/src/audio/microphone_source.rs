//! Microphone-backed [`AudioSource`]: cpal host/device enumeration and a
//! fixed-buffer input stream feeding a bounded ring buffer drained by
//! `next_chunk`, oldest-evicting on overflow.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::Notify;
use tracing::warn;

use crate::audio::{downmix_to_mono, AudioChunk, AudioSource, DeviceInfo};
use crate::error::{Result, TranscriptionError};
use crate::events::{now_ts, Event, StatusPhase};
use crate::resample::LinearResampler;

/// Queue depth for the capture-thread → consumer ring buffer. Must stay
/// bounded: unbounded capture queues let a slow consumer accumulate
/// unreleased audio memory indefinitely. On overflow the oldest queued
/// chunk is dropped in favor of the newly captured one.
const CAPTURE_QUEUE_CAPACITY: usize = 16;

/// Structured event sink for non-fatal conditions (e.g. queue overflow).
pub type EventSink = dyn Fn(&Event) + Send + Sync;

/// Ring buffer shared between the real-time capture callback (push, evict
/// oldest on overflow) and the async consumer (pop, await on empty).
struct CaptureQueue {
    buffer: Mutex<VecDeque<AudioChunk>>,
    notify: Notify,
}

pub struct MicrophoneSource {
    device_index: Option<u32>,
    sample_rate: u32,
    chunk_ms: u32,
    stream: Option<cpal::Stream>,
    queue: Option<Arc<CaptureQueue>>,
    disconnected: Arc<AtomicBool>,
    active: bool,
    event_sink: Option<Arc<EventSink>>,
}

impl MicrophoneSource {
    pub fn new(device_index: Option<u32>, sample_rate: u32, chunk_ms: u32) -> Self {
        Self {
            device_index,
            sample_rate,
            chunk_ms,
            stream: None,
            queue: None,
            disconnected: Arc::new(AtomicBool::new(false)),
            active: false,
            event_sink: None,
        }
    }

    /// Registers a structured event sink, notified on capture-queue
    /// overflow in addition to the `warn!` log.
    pub fn with_event_sink(mut self, sink: Arc<EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    fn source_id(&self) -> String {
        match self.device_index {
            Some(index) => format!("microphone:{index}"),
            None => "microphone:default".to_string(),
        }
    }

    /// Static device-enumeration operation.
    pub fn enumerate_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host
            .default_input_device()
            .and_then(|d| d.name().ok());

        let devices = host.input_devices().map_err(|e| {
            TranscriptionError::DeviceUnavailable(format!("failed to enumerate devices: {e}"))
        })?;

        let mut out = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let config = device.default_input_config().map_err(|e| {
                TranscriptionError::DeviceUnavailable(format!(
                    "failed to query config for '{name}': {e}"
                ))
            })?;
            out.push(DeviceInfo {
                index: index as u32,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            });
        }
        Ok(out)
    }

    fn find_device(&self, host: &cpal::Host) -> Result<cpal::Device> {
        match self.device_index {
            None => host.default_input_device().ok_or_else(|| {
                TranscriptionError::DeviceUnavailable("no default input device".into())
            }),
            Some(index) => host
                .input_devices()
                .map_err(|e| TranscriptionError::DeviceUnavailable(e.to_string()))?
                .nth(index as usize)
                .ok_or_else(|| {
                    TranscriptionError::DeviceUnavailable(format!(
                        "no input device at index {index}"
                    ))
                }),
        }
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn open(&mut self) -> Result<()> {
        let host = cpal::default_host();
        let device = self.find_device(&host)?;
        let config = device
            .default_input_config()
            .map_err(|e| TranscriptionError::DeviceUnavailable(e.to_string()))?;

        let native_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let target_rate = self.sample_rate;

        let queue = Arc::new(CaptureQueue {
            buffer: Mutex::new(VecDeque::with_capacity(CAPTURE_QUEUE_CAPACITY)),
            notify: Notify::new(),
        });
        let disconnected = self.disconnected.clone();
        let resampler = Mutex::new(LinearResampler::new(native_rate, target_rate));

        let stream_config: cpal::StreamConfig = config.into();
        let err_tx_disconnect = self.disconnected.clone();
        let callback_queue = queue.clone();
        let error_queue = queue.clone();
        let event_sink = self.event_sink.clone();
        let source_id = self.source_id();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| {
                    let mono = downmix_to_mono(data, channels);
                    let resampled = resampler.lock().unwrap().process(&mono);
                    if resampled.is_empty() {
                        return;
                    }
                    let chunk = AudioChunk {
                        samples: resampled,
                        sample_rate: target_rate,
                    };
                    // Never blocks the real-time audio callback thread: the
                    // ring buffer is bounded and eviction is O(1).
                    let mut buffer = callback_queue.buffer.lock().unwrap();
                    if buffer.len() >= CAPTURE_QUEUE_CAPACITY {
                        buffer.pop_front();
                        warn!("microphone capture queue full, dropping oldest chunk");
                        if let Some(sink) = &event_sink {
                            sink(&Event::Status {
                                status_code: "capture_queue_overflow".to_string(),
                                message: "microphone capture queue full, dropped oldest chunk".to_string(),
                                timestamp: now_ts(),
                                source_id: source_id.clone(),
                                phase: Some(StatusPhase::Processing),
                                metadata: None,
                            });
                        }
                    }
                    buffer.push_back(chunk);
                    drop(buffer);
                    callback_queue.notify.notify_one();
                },
                move |err| {
                    warn!("microphone stream error: {err}");
                    err_tx_disconnect.store(true, Ordering::SeqCst);
                    error_queue.notify.notify_one();
                },
                None,
            )
            .map_err(|e| TranscriptionError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| TranscriptionError::DeviceUnavailable(e.to_string()))?;

        self.stream = Some(stream);
        self.queue = Some(queue);
        self.active = true;
        self.disconnected.store(false, Ordering::SeqCst);
        let _ = self.chunk_ms; // pacing is hardware-driven; no artificial chunk timer needed
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream = None; // dropping the cpal::Stream stops capture
        self.queue = None;
        self.active = false;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        let queue = match self.queue.as_ref() {
            Some(queue) => queue.clone(),
            None => return Ok(None),
        };
        loop {
            let notified = queue.notify.notified();
            if let Some(chunk) = queue.buffer.lock().unwrap().pop_front() {
                return Ok(Some(chunk));
            }
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(TranscriptionError::DeviceDisconnected(
                    "microphone stream terminated".into(),
                ));
            }
            notified.await;
        }
    }
}
