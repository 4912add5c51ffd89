//! External media probing and decoding. Grounded on
//! `crate::audio::file_source::FileSource::decode`'s hound-based PCM
//! reading, generalized from "WAV only" to "arbitrary container/codec via
//! the `ResourceProvider`'s external media tool".

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::audio::downmix_to_mono;
use crate::error::{Result, TranscriptionError};
use crate::resample::resample_sinc;
use crate::resource_provider::ResourceProvider;

/// Sample rate the file pipeline always decodes to.
pub const DECODE_SAMPLE_RATE: u32 = 16000;

/// A decoded PCM file in the pipeline's temporary workspace. Removed on
/// drop, so every exit path (success, error, cancellation) cleans up.
pub struct DecodedFile {
    path: PathBuf,
}

impl Drop for DecodedFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Probes `input` via the resource provider's probe binary, rejecting
/// unknown containers/codecs with `UnsupportedFormat`.
pub fn probe(resources: &dyn ResourceProvider, input: &Path) -> Result<()> {
    let probe_bin = resources.resolve_probe()?;
    let output = Command::new(&probe_bin).arg(input).output().map_err(|e| {
        TranscriptionError::UnsupportedFormat(format!(
            "failed to run probe on '{}': {e}",
            input.display()
        ))
    })?;
    if !output.status.success() {
        return Err(TranscriptionError::UnsupportedFormat(format!(
            "'{}' rejected by probe ({}): {}",
            input.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Decodes `input` to mono float32 PCM at [`DECODE_SAMPLE_RATE`], via the
/// resource provider's media tool into a scratch WAV under `workspace`,
/// then reads that WAV back.
pub fn decode_to_mono_16k(
    resources: &dyn ResourceProvider,
    input: &Path,
    workspace: &Path,
) -> Result<(Vec<f32>, DecodedFile)> {
    let tool = resources.ensure_media_tool()?;
    std::fs::create_dir_all(workspace)?;

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input");
    let output_path = workspace.join(format!("{stem}.decoded.wav"));

    let status = Command::new(&tool)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg(DECODE_SAMPLE_RATE.to_string())
        .arg("-f")
        .arg("wav")
        .arg(&output_path)
        .status()
        .map_err(|e| {
            TranscriptionError::UnsupportedFormat(format!("failed to run media tool: {e}"))
        })?;
    if !status.success() {
        return Err(TranscriptionError::UnsupportedFormat(format!(
            "media tool exited with {status} decoding '{}'",
            input.display()
        )));
    }

    let decoded = DecodedFile {
        path: output_path.clone(),
    };

    let reader = hound::WavReader::open(&output_path).map_err(|e| {
        TranscriptionError::UnsupportedFormat(format!(
            "failed to read decoded output for '{}': {e}",
            input.display()
        ))
    })?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let source_rate = spec.sample_rate;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_val)
                .collect()
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().map(|s| s.unwrap_or(0.0)).collect(),
    };

    let mono = downmix_to_mono(&samples, channels);
    let resampled = if source_rate != DECODE_SAMPLE_RATE {
        resample_sinc(&mono, source_rate, DECODE_SAMPLE_RATE)?
    } else {
        mono
    };

    Ok((resampled, decoded))
}
