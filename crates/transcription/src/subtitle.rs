//! SRT subtitle writing: block layout and timestamp formatting follow the
//! standard SubRip conventions (1-based contiguous index, `HH:MM:SS,mmm`
//! timestamps, blank line between cues).

use std::fmt::Write as _;

use crate::error::{Result, TranscriptionError};
use crate::file_pipeline::FileSubtitleSegment;

/// Formats seconds as `HH:MM:SS,mmm`.
fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round().max(0.0) as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    format!("{hours:02}:{mins:02}:{secs:02},{ms:03}")
}

/// Renders subtitle segments to SRT text. Validates 1-based
/// contiguous indices, non-decreasing times, and no interval overlap
/// before rendering, since a malformed segment list would still produce
/// syntactically valid-but-wrong SRT otherwise.
pub fn render_srt(segments: &[FileSubtitleSegment]) -> Result<String> {
    for (i, seg) in segments.iter().enumerate() {
        if seg.index != i + 1 {
            return Err(TranscriptionError::ConfigInvalid(format!(
                "subtitle segment at position {i} has index {} (expected {})",
                seg.index,
                i + 1
            )));
        }
        if seg.end_time < seg.start_time {
            return Err(TranscriptionError::ConfigInvalid(format!(
                "subtitle segment {} has end_time < start_time",
                seg.index
            )));
        }
        if i > 0 && seg.start_time < segments[i - 1].end_time {
            return Err(TranscriptionError::ConfigInvalid(format!(
                "subtitle segment {} overlaps the previous segment",
                seg.index
            )));
        }
    }

    let mut out = String::new();
    for seg in segments {
        writeln!(out, "{}", seg.index).unwrap();
        writeln!(
            out,
            "{} --> {}",
            format_timestamp(seg.start_time),
            format_timestamp(seg.end_time)
        )
        .unwrap();
        writeln!(out, "{}", seg.text).unwrap();
        writeln!(out).unwrap();
    }
    Ok(out)
}

/// Writes `segments` as an SRT file at `path`.
pub fn write_srt_file(path: &std::path::Path, segments: &[FileSubtitleSegment]) -> Result<()> {
    let content = render_srt(segments)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(index: usize, start: f64, end: f64, text: &str) -> FileSubtitleSegment {
        FileSubtitleSegment {
            index,
            start_time: start,
            end_time: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn formats_timestamp_with_millis() {
        assert_eq!(format_timestamp(3661.25), "01:01:01,250");
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
    }

    #[test]
    fn renders_contiguous_blocks() {
        let segments = vec![seg(1, 0.0, 1.5, "hello"), seg(2, 2.0, 3.0, "world")];
        let srt = render_srt(&segments).unwrap();
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,500\nhello\n\n2\n00:00:02,000 --> 00:00:03,000\nworld\n\n"
        );
    }

    #[test]
    fn rejects_non_contiguous_indices() {
        let segments = vec![seg(1, 0.0, 1.0, "a"), seg(3, 2.0, 3.0, "b")];
        assert!(render_srt(&segments).is_err());
    }

    #[test]
    fn rejects_overlapping_intervals() {
        let segments = vec![seg(1, 0.0, 2.0, "a"), seg(2, 1.0, 3.0, "b")];
        assert!(render_srt(&segments).is_err());
    }
}
