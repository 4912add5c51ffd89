//! Translator interface. Translation backends are out of scope here;
//! this module only specifies how a final `TranscriptionResult` is
//! routed through a translator and how failures are handled.

use async_trait::async_trait;

use crate::error::Result;

/// Collaborator that translates recognized text between two languages.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates `text` from `source_lang` to `target_lang`. May block on
    /// network or local inference.
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;

    /// Whether this translator supports the given language pair.
    fn supports(&self, source_lang: &str, target_lang: &str) -> bool;
}
