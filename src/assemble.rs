//! Assembly of per-segment outputs into the final transcript pair.
//!
//! Two artifacts per run: a detailed, annotated transcript for humans
//! inspecting the run, and a clean concatenation for downstream consumers.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::transcribe::SegmentTranscript;

/// Aggregate counters for the detailed transcript footer.
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn from_segments(segments: &[SegmentTranscript], elapsed: Duration) -> Self {
        let successful = segments.iter().filter(|s| s.succeeded()).count();
        Self {
            total: segments.len(),
            successful,
            failed: segments.len() - successful,
            elapsed,
        }
    }
}

/// Write the detailed transcript: header, one marked section per segment,
/// statistics footer.
pub fn write_detailed(
    path: &Path,
    basename: &str,
    started: &DateTime<Local>,
    models_requested: &[String],
    timeout_multiplier: u32,
    segments: &[SegmentTranscript],
    stats: &RunStats,
) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "# Transcript: {basename}")?;
    writeln!(file, "Run started: {}", started.format("%Y-%m-%d_%H%M%S"))?;
    writeln!(file, "Models requested: {}", models_requested.join(", "))?;
    writeln!(file, "Timeout multiplier: {timeout_multiplier}")?;
    writeln!(file)?;

    for seg in segments {
        match (&seg.text, &seg.model) {
            (Some(text), Some(model)) => {
                writeln!(file, "--- Segment {:03} (Model: {model}) ---", seg.index)?;
                writeln!(file, "{text}")?;
            }
            _ => {
                writeln!(file, "--- Segment {:03} (FAILED TO TRANSCRIBE) ---", seg.index)?;
                writeln!(file, "Models attempted: {}", seg.attempted.join(", "))?;
            }
        }
        writeln!(file)?;
    }

    writeln!(file, "## Processing summary")?;
    writeln!(file, "Total segments: {}", stats.total)?;
    writeln!(file, "Successful: {}", stats.successful)?;
    writeln!(file, "Failed: {}", stats.failed)?;
    writeln!(file, "Elapsed: {} s", stats.elapsed.as_secs())?;
    file.sync_all()
}

/// Successful segment texts separated by blank lines; no markers.
pub fn clean_text(segments: &[SegmentTranscript]) -> String {
    segments
        .iter()
        .filter_map(|s| s.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Write the clean transcript.
pub fn write_clean(path: &Path, segments: &[SegmentTranscript]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    let text = clean_text(segments);
    writeln!(file, "{text}")?;
    file.sync_all()
}
