//! Per-segment transcription with ordered model fallback.
//!
//! Each segment gets a dynamic wall-clock budget scaled from its duration,
//! and every configured model is tried in order until one produces output.
//! When no model can read a segment the whole job fails: a single unreadable
//! segment almost always means a systemic problem (bad audio, missing
//! binary, wrong language) and transcribing the rest would be wasted work.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config;
use crate::error::Failure;
use crate::exec::{self, ExecOptions, ExitKind};
use crate::prompt;
use crate::segment::Segment;

/// Seconds of budget per second of audio.
pub const TIMEOUT_DURATION_MULTIPLIER: u32 = 5;
/// Floor of the per-segment budget.
pub const MIN_TIMEOUT_SECONDS: u64 = 30;
/// Ceiling of the per-segment budget.
pub const MAX_TIMEOUT_SECONDS: u64 = 600;
/// Appended as the last resort unless the caller asked for exactly this.
pub const FALLBACK_MODEL: &str = "tiny";

/// Requested models plus the ultimate fallback.
pub fn effective_models(requested: &[String]) -> Vec<String> {
    let mut models: Vec<String> = requested.to_vec();
    if models.is_empty() {
        models.push(FALLBACK_MODEL.to_string());
        return models;
    }
    let is_exactly_fallback = models.len() == 1 && models[0] == FALLBACK_MODEL;
    if !is_exactly_fallback && !models.iter().any(|m| m == FALLBACK_MODEL) {
        models.push(FALLBACK_MODEL.to_string());
    }
    models
}

/// `clamp(ceil(duration × multiplier), MIN, MAX)`.
pub fn segment_timeout(duration_sec: f64, multiplier: u32) -> Duration {
    let raw = (duration_sec * f64::from(multiplier)).ceil() as u64;
    Duration::from_secs(raw.clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS))
}

/// Model artifact location: `<models_dir>/ggml-<name>.bin`.
pub fn model_path(models_dir: &Path, name: &str) -> PathBuf {
    models_dir.join(format!("ggml-{name}.bin"))
}

/// Stderr content that marks an attempt as failed regardless of exit code.
pub fn stderr_indicates_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("failed to load model") || lower.contains("usage:") || lower.contains("error:")
}

/// Transcription result for one segment.
#[derive(Debug, Clone)]
pub struct SegmentTranscript {
    pub index: usize,
    pub text: Option<String>,
    pub model: Option<String>,
    /// Models actually attempted (missing artifacts are not listed).
    pub attempted: Vec<String>,
}

impl SegmentTranscript {
    pub fn succeeded(&self) -> bool {
        self.text.is_some()
    }
}

/// Outcome of the per-job transcription pass.
#[derive(Debug)]
pub struct TranscribeReport {
    pub segments: Vec<SegmentTranscript>,
    /// Index of the segment that exhausted every model, when the job aborted.
    pub failed_index: Option<usize>,
}

impl TranscribeReport {
    pub fn succeeded(&self) -> bool {
        self.failed_index.is_none()
    }
}

/// Transcribe all segments in index order, threading context between them.
pub fn transcribe_segments(
    models_dir: &Path,
    segments: &[Segment],
    title: &str,
    description: Option<&str>,
    requested_models: &[String],
    multiplier: u32,
    cancel: &Arc<AtomicBool>,
) -> Result<TranscribeReport> {
    let models = effective_models(requested_models);
    let stt = config::stt_bin();

    let mut report = TranscribeReport {
        segments: Vec::with_capacity(segments.len()),
        failed_index: None,
    };
    let mut prev_tail: Option<String> = None;

    for seg in segments {
        if cancel.load(Ordering::SeqCst) {
            return Err(Failure::Processing("transcription interrupted".into()).into());
        }

        let assembled = prompt::build_prompt(title, description, prev_tail.as_deref());
        let timeout = segment_timeout(seg.duration, multiplier);
        let mut result = SegmentTranscript {
            index: seg.index,
            text: None,
            model: None,
            attempted: Vec::new(),
        };

        for model in &models {
            let artifact = model_path(models_dir, model);
            if !artifact.exists() {
                tracing::debug!(model = %model, "model artifact missing, skipping");
                continue;
            }
            result.attempted.push(model.clone());

            match attempt(&stt, &artifact, seg, &assembled, timeout, cancel)? {
                Attempt::Text(text) => {
                    tracing::info!(
                        segment = seg.index,
                        model = %model,
                        "segment transcribed"
                    );
                    result.text = Some(text);
                    result.model = Some(model.clone());
                    break;
                }
                Attempt::Interrupted => {
                    return Err(Failure::Processing("transcription interrupted".into()).into());
                }
                Attempt::Failed(reason) => {
                    tracing::warn!(
                        segment = seg.index,
                        model = %model,
                        reason = %reason,
                        "model attempt failed, trying next"
                    );
                }
            }
        }

        if let Some(text) = &result.text {
            prev_tail = Some(text.clone());
            report.segments.push(result);
        } else {
            // Clear the tail so unrelated context is never carried forward,
            // then abort the job: retrying remaining segments is wasteful.
            prev_tail = None;
            report.failed_index = Some(seg.index);
            report.segments.push(result);
            break;
        }
    }

    Ok(report)
}

enum Attempt {
    Text(String),
    Failed(String),
    Interrupted,
}

fn attempt(
    stt: &str,
    artifact: &Path,
    seg: &Segment,
    assembled_prompt: &str,
    timeout: Duration,
    cancel: &Arc<AtomicBool>,
) -> Result<Attempt> {
    let out_base = seg.path.with_extension("");
    let out_txt = seg.path.with_extension("txt");
    let _ = std::fs::remove_file(&out_txt);

    let outcome = exec::run(
        Command::new(stt)
            .arg("-m")
            .arg(artifact)
            .arg("-f")
            .arg(&seg.path)
            .arg("-otxt")
            .arg("-of")
            .arg(&out_base)
            .arg("--prompt")
            .arg(assembled_prompt),
        ExecOptions {
            timeout: Some(timeout),
            cancel: Some(Arc::clone(cancel)),
            ..Default::default()
        },
    )
    .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::Error::from(Failure::Dependency(stt.to_string()))
        } else {
            e.into()
        }
    })?;

    match outcome.kind {
        ExitKind::Interrupted => return Ok(Attempt::Interrupted),
        ExitKind::TimedOut => {
            return Ok(Attempt::Failed(format!(
                "timed out after {}s",
                timeout.as_secs()
            )))
        }
        ExitKind::Exited(code) if code != 0 => {
            return Ok(Attempt::Failed(format!("exit code {code}")));
        }
        ExitKind::Exited(_) => {}
    }

    if stderr_indicates_failure(&outcome.stderr) {
        return Ok(Attempt::Failed("tool reported an error".into()));
    }

    match std::fs::read_to_string(&out_txt) {
        Ok(text) if !text.trim().is_empty() => Ok(Attempt::Text(text.trim().to_string())),
        Ok(_) => Ok(Attempt::Failed("empty output".into())),
        Err(_) => Ok(Attempt::Failed("output file missing".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_appended_once() {
        let models = effective_models(&["base.en".into(), "small".into()]);
        assert_eq!(models, vec!["base.en", "small", FALLBACK_MODEL]);
    }

    #[test]
    fn fallback_not_duplicated() {
        let models = effective_models(&["base.en".into(), FALLBACK_MODEL.into()]);
        assert_eq!(models, vec!["base.en", FALLBACK_MODEL]);
    }

    #[test]
    fn exact_fallback_list_stays_single() {
        let models = effective_models(&[FALLBACK_MODEL.into()]);
        assert_eq!(models, vec![FALLBACK_MODEL]);
    }

    #[test]
    fn empty_request_gets_fallback() {
        assert_eq!(effective_models(&[]), vec![FALLBACK_MODEL]);
    }

    #[test]
    fn timeout_scales_and_clamps() {
        assert_eq!(segment_timeout(1.0, 5), Duration::from_secs(30));
        assert_eq!(segment_timeout(100.0, 5), Duration::from_secs(500));
        assert_eq!(segment_timeout(1000.0, 5), Duration::from_secs(600));
        // ceil applies before clamping
        assert_eq!(segment_timeout(20.1, 5), Duration::from_secs(101));
    }

    #[test]
    fn model_artifact_naming() {
        assert_eq!(
            model_path(Path::new("/m"), "base.en"),
            PathBuf::from("/m/ggml-base.en.bin")
        );
    }

    #[test]
    fn stderr_classification() {
        assert!(stderr_indicates_failure("whisper: failed to load model"));
        assert!(stderr_indicates_failure("usage: whisper-cli [options]"));
        assert!(stderr_indicates_failure("ERROR: bad sample rate"));
        assert!(!stderr_indicates_failure("processing audio..."));
    }
}
