//! The job supervisor: one invocation processes one claimed media file.
//!
//! Spawned by the queue engine as a child process (also invocable directly).
//! The machine-readable contract with the parent: exit 0 with the absolute
//! clean-transcript path as the last stdout line, exit 10 when the
//! audio-processing lock is freshly held (retry later, not a failure),
//! exit 2 for validation problems, exit 1 for processing failures. Nothing
//! inside the run directory is deleted on failure, for forensic inspection.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::assemble::{self, RunStats};
use crate::error::{self, Failure, EXIT_RETRYABLE, EXIT_SUCCESS};
use crate::lock::{Acquire, NamedLock, LOCK_TIMEOUT_LONG};
use crate::paths::{self, RunPaths};
use crate::prompt;
use crate::segment;
use crate::transcribe;

/// Parsed `stentor process` arguments.
#[derive(Debug, Clone)]
pub struct ProcessArgs {
    pub input: PathBuf,
    pub models: Vec<String>,
    pub timeout_multiplier: u32,
    pub cleanup_temp_audio: bool,
    pub models_dir: PathBuf,
}

/// Metadata record written into the run directory when the run ends.
#[derive(Serialize)]
struct RunMeta<'a> {
    source: &'a str,
    run_id: &'a str,
    started: String,
    ended: String,
    models_requested: &'a [String],
    timeout_multiplier: u32,
    segments_total: usize,
    segments_successful: usize,
    outcome: &'a str,
}

/// Register INT/TERM into a shared flag checked at every suspension point.
pub fn cancel_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let _ = signal_hook::flag::register(signal, Arc::clone(&flag));
    }
    flag
}

/// Entry point for the `process` subcommand. Returns the process exit code.
pub fn run(args: &ProcessArgs) -> i32 {
    match execute(args) {
        Ok(code) => code,
        Err(err) => error::report(&err),
    }
}

fn execute(args: &ProcessArgs) -> Result<i32> {
    if !args.input.is_file() {
        return Err(Failure::Validation(format!(
            "input audio file not found: {}",
            args.input.display()
        ))
        .into());
    }
    if args.timeout_multiplier == 0 {
        return Err(Failure::Validation("timeout multiplier must be positive".into()).into());
    }
    let basename = args
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Failure::Validation("input file has no usable name".into()))?
        .to_string();

    let cancel = cancel_flag();

    let mut lock = NamedLock::new("audio-processing", LOCK_TIMEOUT_LONG)?;
    match lock.acquire()? {
        Acquire::Acquired => {}
        Acquire::AcquiredStale => {
            tracing::warn!("reclaimed a stale audio-processing lock");
        }
        Acquire::Held => {
            tracing::info!("audio-processing lock held by a peer, deferring");
            return Ok(EXIT_RETRYABLE);
        }
    }

    let started_wall = Local::now();
    let started = Instant::now();
    let run_id = paths::run_id(&basename, &started_wall);
    let runs_root = paths::runs_root()?;
    let run = RunPaths::new(&runs_root, &run_id);
    run.create()
        .with_context(|| format!("creating run directory {}", run.run_dir.display()))?;
    tracing::info!(run_id = %run_id, source = %basename, "processing run started");

    let outcome = process_run(args, &basename, &run, &started_wall, &cancel, started);

    // The lock is released on every path; Drop covers the error returns too.
    lock.release();
    outcome
}

fn process_run(
    args: &ProcessArgs,
    basename: &str,
    run: &RunPaths,
    started_wall: &DateTime<Local>,
    cancel: &Arc<AtomicBool>,
    started: Instant,
) -> Result<i32> {
    let (segments, _total) = segment::run(
        &args.input,
        &run.workable_wav,
        &run.segments_dir,
        &run.info,
        cancel,
    )?;
    tracing::info!(count = segments.len(), "segmentation complete");

    let title = prompt::clean_title(basename);
    let description = read_description_sidecar(&args.input);

    let report = transcribe::transcribe_segments(
        &args.models_dir,
        &segments,
        &title,
        description.as_deref(),
        &args.models,
        args.timeout_multiplier,
        cancel,
    )?;

    let stats = RunStats::from_segments(&report.segments, started.elapsed());
    assemble::write_detailed(
        &run.transcript_md,
        basename,
        started_wall,
        &args.models,
        args.timeout_multiplier,
        &report.segments,
        &stats,
    )?;

    let outcome_label = if report.succeeded() { "SUCCESS" } else { "FAILED" };
    write_meta(run, basename, started_wall, args, &stats, outcome_label)?;

    if let Some(index) = report.failed_index {
        return Err(Failure::Processing(format!(
            "segment {index:03} could not be transcribed with any configured model"
        ))
        .into());
    }

    assemble::write_clean(&run.transcript_txt, &report.segments)?;

    if args.cleanup_temp_audio {
        let _ = fs::remove_file(&run.workable_wav);
        let _ = fs::remove_dir_all(&run.segments_dir);
    }

    // Machine-readable contract: the absolute clean-transcript path is the
    // last line on stdout.
    let clean = fs::canonicalize(&run.transcript_txt).unwrap_or(run.transcript_txt.clone());
    println!("{}", clean.display());
    tracing::info!(
        elapsed_s = started.elapsed().as_secs(),
        segments = stats.total,
        "processing run succeeded"
    );
    Ok(EXIT_SUCCESS)
}

fn write_meta(
    run: &RunPaths,
    basename: &str,
    started_wall: &DateTime<Local>,
    args: &ProcessArgs,
    stats: &RunStats,
    outcome: &str,
) -> Result<()> {
    let run_id = run
        .run_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let meta = RunMeta {
        source: basename,
        run_id,
        started: started_wall.format("%Y-%m-%d_%H%M%S").to_string(),
        ended: Local::now().format("%Y-%m-%d_%H%M%S").to_string(),
        models_requested: &args.models,
        timeout_multiplier: args.timeout_multiplier,
        segments_total: stats.total,
        segments_successful: stats.successful,
        outcome,
    };
    let json = serde_json::to_vec_pretty(&meta)?;
    fs::write(&run.meta, json).context("writing run metadata")?;
    Ok(())
}

/// Description sidecar produced by the downloader, when present in the
/// MediaGroup (`<base>.description` next to the audio file).
fn read_description_sidecar(input: &std::path::Path) -> Option<String> {
    let sidecar = input.with_extension("description");
    fs::read_to_string(sidecar).ok().filter(|t| !t.trim().is_empty())
}

/// Parse the comma-separated model list argument.
pub fn parse_model_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}
