//! Contract required of the collaborator that resolves model/tool paths on
//! disk (`ResourceProvider`). Model download, cache management, and
//! filesystem resource resolution are out of scope for this crate; this
//! module only specifies the interface the core consumes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Progress callback invoked during a download: `(bytes_so_far, total_bytes)`.
pub type DownloadProgress<'a> = dyn Fn(u64, Option<u64>) + Send + Sync + 'a;

/// Collaborator that resolves models, caches, and bundled binary tools.
///
/// Implementations are expected to download to a temp path and rename into
/// place on success (atomic-write semantics) and to verify a SHA-256 digest
/// before declaring a cached artifact valid. This crate never assumes a concrete implementation.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Root directory for downloaded/cached models.
    fn models_root(&self) -> PathBuf;

    /// Root directory for ephemeral/cache data (temp buffers, decoded audio).
    fn cache_root(&self) -> PathBuf;

    /// Directory holding models for a specific named engine.
    fn get_models_dir(&self, engine_name: &str) -> PathBuf;

    /// Synchronously downloads `url` into `models_root()/filename`, verifying
    /// `expected_sha256` if given. Returns the final path.
    fn download_file(
        &self,
        url: &str,
        filename: &str,
        expected_sha256: Option<&str>,
        progress: Option<&DownloadProgress<'_>>,
    ) -> Result<PathBuf>;

    /// Awaitable counterpart to [`ResourceProvider::download_file`].
    async fn download_file_async(
        &self,
        url: &str,
        filename: &str,
        expected_sha256: Option<&str>,
        progress: Option<&DownloadProgress<'_>>,
    ) -> Result<PathBuf>;

    /// Path to the external media decode/transcode binary, downloading it
    /// first if absent.
    fn ensure_media_tool(&self) -> Result<PathBuf>;

    /// Path to the companion media-probe binary (codec/container detection).
    fn resolve_probe(&self) -> Result<PathBuf>;
}

/// Verifies that `path`'s contents hash to `expected_sha256` (lowercase hex).
pub fn verify_sha256(path: &Path, expected_sha256: &str) -> Result<bool> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    Ok(hex.eq_ignore_ascii_case(expected_sha256))
}
