//! Input normalization and silence-driven segmentation.
//!
//! An arbitrary input file becomes a canonical working WAV (16 kHz, mono,
//! signed 16-bit PCM) plus an ordered list of segments cut at detected
//! silences. Segment boundaries back up slightly into the preceding silence
//! so the next audible region never starts mid-word.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config;
use crate::error::Failure;
use crate::exec::{self, ExecOptions, ExitKind};

/// Canonical sample rate.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
/// Canonical channel count.
pub const TARGET_CHANNELS: u32 = 1;
/// Silence filter noise floor.
pub const SILENCE_NOISE_THRESHOLD_DB: i32 = -30;
/// Minimum quiet stretch that counts as a silence.
pub const SILENCE_DURATION_THRESHOLD: f64 = 1.0;
/// Candidates shorter than this are dropped.
pub const MIN_SEGMENT_DURATION: f64 = 1.0;
/// Overlap back into the silence before the next audible region.
pub const SEGMENT_PADDING: f64 = 0.25;

/// One extracted segment, 1-based index, zero-padded file name.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
    pub path: PathBuf,
}

/// Probed properties of the primary audio stream.
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u32,
    pub duration: f64,
}

impl AudioInfo {
    /// Already in canonical form? Big-endian PCM is accepted too.
    pub fn is_canonical(&self) -> bool {
        (self.codec == "pcm_s16le" || self.codec == "pcm_s16be")
            && self.sample_rate == TARGET_SAMPLE_RATE
            && self.channels == TARGET_CHANNELS
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn spawn_failure(tool: &str, err: std::io::Error) -> anyhow::Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Failure::Dependency(tool.to_string()).into()
    } else {
        anyhow::Error::new(err).context(format!("running {tool}"))
    }
}

/// Probe codec, sample rate, channel count and container duration.
pub fn probe(input: &Path) -> Result<AudioInfo> {
    let tool = config::ffprobe_bin();
    let outcome = exec::run(
        Command::new(&tool).args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=codec_name,sample_rate,channels:format=duration",
            "-of",
            "json",
        ])
        .arg(input),
        ExecOptions::default(),
    )
    .map_err(|e| spawn_failure(&tool, e))?;

    if !outcome.kind.success() {
        return Err(Failure::Processing(format!(
            "probe of {} failed: {}",
            input.display(),
            outcome.stderr.trim()
        ))
        .into());
    }

    let parsed: ProbeOutput =
        serde_json::from_str(&outcome.stdout).context("parsing probe output")?;
    let stream = parsed.streams.first();
    let duration = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| {
            Failure::Processing(format!("no duration reported for {}", input.display()))
        })?;

    Ok(AudioInfo {
        codec: stream
            .and_then(|s| s.codec_name.clone())
            .unwrap_or_default(),
        sample_rate: stream
            .and_then(|s| s.sample_rate.as_ref())
            .and_then(|r| r.parse().ok())
            .unwrap_or(0),
        channels: stream.and_then(|s| s.channels).unwrap_or(0),
        duration,
    })
}

/// Produce the canonical working copy: a plain copy when the input already
/// is canonical PCM, otherwise a transcode.
pub fn normalize(
    input: &Path,
    info: &AudioInfo,
    workable: &Path,
    cancel: &Arc<AtomicBool>,
) -> Result<()> {
    if info.is_canonical() {
        fs::copy(input, workable)
            .with_context(|| format!("copying {} into place", input.display()))?;
        return Ok(());
    }

    let tool = config::ffmpeg_bin();
    let outcome = exec::run(
        Command::new(&tool)
            .args(["-hide_banner", "-nostdin", "-y", "-i"])
            .arg(input)
            .args([
                "-ar",
                "16000",
                "-ac",
                "1",
                "-c:a",
                "pcm_s16le",
            ])
            .arg(workable),
        ExecOptions {
            cancel: Some(Arc::clone(cancel)),
            ..Default::default()
        },
    )
    .map_err(|e| spawn_failure(&tool, e))?;

    match outcome.kind {
        ExitKind::Exited(0) => Ok(()),
        ExitKind::Interrupted => Err(Failure::Processing("normalization interrupted".into()).into()),
        _ => Err(Failure::Processing(format!(
            "normalization of {} failed: {}",
            input.display(),
            exec::last_line(&outcome.stderr).unwrap_or("no output")
        ))
        .into()),
    }
}

/// Run the silence filter and return (starts, ends).
pub fn detect_silence(workable: &Path, cancel: &Arc<AtomicBool>) -> Result<(Vec<f64>, Vec<f64>)> {
    let tool = config::ffmpeg_bin();
    let filter = format!(
        "silencedetect=noise={SILENCE_NOISE_THRESHOLD_DB}dB:d={SILENCE_DURATION_THRESHOLD}"
    );
    let outcome = exec::run(
        Command::new(&tool)
            .args(["-hide_banner", "-nostdin", "-i"])
            .arg(workable)
            .args(["-af", &filter, "-f", "null", "-"]),
        ExecOptions {
            cancel: Some(Arc::clone(cancel)),
            ..Default::default()
        },
    )
    .map_err(|e| spawn_failure(&tool, e))?;

    if outcome.kind == ExitKind::Interrupted {
        return Err(Failure::Processing("silence detection interrupted".into()).into());
    }
    if !outcome.kind.success() {
        return Err(Failure::Processing(format!(
            "silence detection failed: {}",
            exec::last_line(&outcome.stderr).unwrap_or("no output")
        ))
        .into());
    }
    Ok(parse_silence(&outcome.stderr))
}

/// Parse `silencedetect` filter output. The filter logs lines such as
/// `[silencedetect @ 0x...] silence_start: 12.34` and
/// `[silencedetect @ 0x...] silence_end: 15.6 | silence_duration: 3.26`.
pub fn parse_silence(text: &str) -> (Vec<f64>, Vec<f64>) {
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    for line in text.lines() {
        if let Some(value) = field_after(line, "silence_start:") {
            starts.push(value);
        } else if let Some(value) = field_after(line, "silence_end:") {
            ends.push(value);
        }
    }
    (starts, ends)
}

fn field_after(line: &str, marker: &str) -> Option<f64> {
    let rest = &line[line.find(marker)? + marker.len()..];
    rest.split_whitespace().next()?.parse().ok()
}

/// Turn silences into `(start, duration)` ranges.
///
/// Walk each silence start: the candidate spans from the cursor to it, and
/// is kept when it reaches [`MIN_SEGMENT_DURATION`]. The cursor then jumps
/// to the silence end minus [`SEGMENT_PADDING`]. A final candidate covers
/// the remainder. A file with no usable silences (including one shorter
/// than the minimum) yields a single range covering everything.
pub fn plan(total: f64, starts: &[f64], ends: &[f64]) -> Vec<(f64, f64)> {
    let mut ranges = Vec::new();
    let mut cursor = 0.0_f64;
    for (i, &start) in starts.iter().enumerate() {
        let duration = start - cursor;
        if duration >= MIN_SEGMENT_DURATION {
            ranges.push((cursor, duration));
        }
        // A trailing silence may have no end event; the file end stands in.
        let end = ends.get(i).copied().unwrap_or(total);
        cursor = (end - SEGMENT_PADDING).max(0.0);
    }
    let remainder = total - cursor;
    if remainder >= MIN_SEGMENT_DURATION {
        ranges.push((cursor, remainder));
    }
    if ranges.is_empty() {
        ranges.push((0.0, total));
    }
    ranges
}

/// Extract the planned ranges as canonical WAV files under `segments_dir`.
/// The whole-file case is aliased via symlink instead of re-encoding.
pub fn extract(
    workable: &Path,
    segments_dir: &Path,
    total: f64,
    ranges: &[(f64, f64)],
    cancel: &Arc<AtomicBool>,
) -> Result<Vec<Segment>> {
    let tool = config::ffmpeg_bin();
    let mut segments = Vec::with_capacity(ranges.len());
    for (i, &(start, duration)) in ranges.iter().enumerate() {
        let index = i + 1;
        let path = segments_dir.join(format!("segment_{index:03}.wav"));

        let whole_file = ranges.len() == 1 && start == 0.0 && (total - duration).abs() < 1e-6;
        if whole_file {
            alias_whole_file(workable, &path)?;
        } else {
            let outcome = exec::run(
                Command::new(&tool)
                    .args(["-hide_banner", "-nostdin", "-y", "-i"])
                    .arg(workable)
                    .args([
                        "-ss",
                        &format!("{start:.3}"),
                        "-t",
                        &format!("{duration:.3}"),
                        "-c:a",
                        "pcm_s16le",
                    ])
                    .arg(&path),
                ExecOptions {
                    cancel: Some(Arc::clone(cancel)),
                    ..Default::default()
                },
            )
            .map_err(|e| spawn_failure(&tool, e))?;
            if outcome.kind == ExitKind::Interrupted {
                return Err(Failure::Processing("segment extraction interrupted".into()).into());
            }
            if !outcome.kind.success() {
                return Err(Failure::Processing(format!(
                    "extraction of segment {index:03} failed: {}",
                    exec::last_line(&outcome.stderr).unwrap_or("no output")
                ))
                .into());
            }
        }

        segments.push(Segment {
            index,
            start,
            duration,
            path,
        });
    }
    Ok(segments)
}

fn alias_whole_file(workable: &Path, link: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(workable, link).is_ok() {
            return Ok(());
        }
    }
    fs::copy(workable, link)
        .with_context(|| format!("copying {} as single segment", workable.display()))?;
    Ok(())
}

/// Write the human-readable segmentation record.
pub fn write_info(
    path: &Path,
    source: &str,
    total: f64,
    silences: usize,
    segments: &[Segment],
) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "source: {source}")?;
    writeln!(file, "total_duration_sec: {total:.3}")?;
    let method = if silences == 0 {
        "none (single segment)"
    } else {
        "silence-detection"
    };
    writeln!(file, "method: {method}")?;
    writeln!(
        file,
        "parameters: noise={SILENCE_NOISE_THRESHOLD_DB}dB min_silence={SILENCE_DURATION_THRESHOLD}s \
         min_segment={MIN_SEGMENT_DURATION}s padding={SEGMENT_PADDING}s"
    )?;
    writeln!(file, "segments: {}", segments.len())?;
    for seg in segments {
        writeln!(
            file,
            "{:03}  {}  start={:.3}  duration={:.3}",
            seg.index,
            seg.path.file_name().and_then(|n| n.to_str()).unwrap_or("?"),
            seg.start,
            seg.duration
        )?;
    }
    file.sync_all()
}

/// Full segmentation pass: probe, normalize, detect, plan, extract, record.
pub fn run(
    input: &Path,
    workable: &Path,
    segments_dir: &Path,
    info_path: &Path,
    cancel: &Arc<AtomicBool>,
) -> Result<(Vec<Segment>, f64)> {
    let info = probe(input)?;
    normalize(input, &info, workable, cancel)?;
    let (starts, ends) = detect_silence(workable, cancel)?;
    let ranges = plan(info.duration, &starts, &ends);
    let segments = extract(workable, segments_dir, info.duration, &ranges, cancel)?;
    let source = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    write_info(info_path, source, info.duration, starts.len(), &segments)?;
    Ok((segments, info.duration))
}
