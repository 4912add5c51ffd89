use thiserror::Error;

/// Stable error kinds for the transcription core.
///
/// `FileTranscriptionCancelled` is deliberately absent from this enum:
/// cancellation is a control-flow signal, not a failure, and is modeled
/// instead as a distinguished `Ok` variant — see
/// [`crate::file_pipeline::FileOutcome`].
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("model load failed for engine '{engine}': {source}")]
    ModelLoadFailed {
        engine: String,
        #[source]
        source: anyhow_compat::BoxError,
    },

    #[error("engine not ready: load_model() must complete before use")]
    EngineNotReady,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("unsupported media format: {0}")]
    UnsupportedFormat(String),

    #[error("segment transcription failed: {0}")]
    SegmentTranscriptionFailed(anyhow_compat::BoxError),

    #[error("translation failed: {0}")]
    TranslationFailed(anyhow_compat::BoxError),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(anyhow_compat::BoxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TranscriptionError>;

/// Stable string code for an `Event::Error`'s `error_code` field.
pub(crate) fn error_code_for(err: &TranscriptionError) -> &'static str {
    match err {
        TranscriptionError::ConfigInvalid(_) => "config_invalid",
        TranscriptionError::UnsupportedLanguage(_) => "unsupported_language",
        TranscriptionError::ModelLoadFailed { .. } => "model_load_failed",
        TranscriptionError::EngineNotReady => "engine_not_ready",
        TranscriptionError::DeviceUnavailable(_) => "device_unavailable",
        TranscriptionError::DeviceDisconnected(_) => "device_disconnected",
        TranscriptionError::UnsupportedFormat(_) => "unsupported_format",
        TranscriptionError::SegmentTranscriptionFailed(_) => "segment_transcription_failed",
        TranscriptionError::TranslationFailed(_) => "translation_failed",
        TranscriptionError::ResourceUnavailable(_) => "resource_unavailable",
        TranscriptionError::Io(_) => "io_error",
    }
}

/// A small local stand-in for `anyhow::Error` sized to what this crate
/// needs: a boxed, `Send + Sync` source error that carries a `Display`.
/// The public error surface here is contractual — callers match on
/// specific `TranscriptionError` variants — so each kind gets a real
/// `thiserror` variant instead of a catch-all `anyhow::Error`; this module
/// exists only to carry an arbitrary underlying cause (e.g. a resource
/// provider's I/O failure) without re-introducing `anyhow` as a public
/// dependency.
pub mod anyhow_compat {
    use std::fmt;

    pub struct BoxError(Box<dyn std::error::Error + Send + Sync + 'static>);

    impl BoxError {
        pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
            Self(Box::new(err))
        }

        pub fn msg(text: impl Into<String>) -> Self {
            Self(Box::new(StringError(text.into())))
        }
    }

    impl fmt::Debug for BoxError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(&self.0, f)
        }
    }

    impl fmt::Display for BoxError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(&self.0, f)
        }
    }

    impl std::error::Error for BoxError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.0.source()
        }
    }

    #[derive(Debug)]
    struct StringError(String);

    impl fmt::Display for StringError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl std::error::Error for StringError {}
}
