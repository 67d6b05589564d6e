//! The queue engine: one pass over the inbox, one supervised child per file.
//!
//! Directory renames are the commit primitive. A media file (with its
//! sidecar siblings) occupies exactly one of `inbox/`, `processing/`,
//! `completed/`, `failed/` at any time; every transition is a rename, which
//! is atomic on a POSIX filesystem. The engine itself never fails because a
//! job failed: job outcomes are recorded in directory state and history,
//! and the engine moves on.

use std::fs::{self, File};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;

use crate::color;
use crate::error::{self, EXIT_RETRYABLE, EXIT_SUCCESS};
use crate::exec::{self, ExecOptions, ExitKind};
use crate::history::{self, History, Outcome};
use crate::lock::{self, Acquire, NamedLock, LOCK_TIMEOUT_LONG};
use crate::paths::{harvest_root, HarvestLayout};
use crate::scan;

/// Grace between TERMing the child supervisor and KILLing it.
pub const CHILD_TERM_GRACE: Duration = Duration::from_secs(60);

/// Parsed `stentor queue` arguments (after `--aggressive-cleanup` expansion).
#[derive(Debug, Clone, Default)]
pub struct QueueArgs {
    pub cleanup_wav_files: bool,
    pub cleanup_run_logs: bool,
    pub cleanup_original_audio: bool,
    pub models: Option<String>,
    pub timeout_multiplier: Option<u32>,
}

/// INT/TERM/HUP/QUIT all request an orderly stop.
fn queue_cancel_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    for signal in [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGHUP,
        signal_hook::consts::SIGQUIT,
    ] {
        let _ = signal_hook::flag::register(signal, Arc::clone(&flag));
    }
    flag
}

/// Entry point for the `queue` subcommand. Returns the exit code.
pub fn run(args: &QueueArgs) -> i32 {
    match execute(args) {
        Ok(code) => code,
        Err(err) => error::report(&err),
    }
}

fn execute(args: &QueueArgs) -> Result<i32> {
    let cancel = queue_cancel_flag();

    let mut lock = NamedLock::new("queue-engine", LOCK_TIMEOUT_LONG)?;
    match lock.acquire()? {
        Acquire::Acquired => {}
        Acquire::AcquiredStale => tracing::warn!("reclaimed a stale queue-engine lock"),
        Acquire::Held => {
            // A running peer is the normal cron overlap case.
            tracing::info!("queue engine already running, exiting");
            return Ok(EXIT_SUCCESS);
        }
    }

    let layout = HarvestLayout::new(&harvest_root()?);
    layout.ensure().context("creating queue state directories")?;
    let history = History::new(&layout.history_file);

    let files = scan::scan_inbox(&layout.inbox)?;
    tracing::info!(count = files.len(), "inbox scan complete");

    for file in files {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("interrupted, leaving remaining files in the inbox");
            break;
        }
        if process_one(args, &layout, &history, &file, &cancel)?.is_break() {
            break;
        }
    }

    lock.release();
    Ok(EXIT_SUCCESS)
}

fn process_one(
    args: &QueueArgs,
    layout: &HarvestLayout,
    history: &History,
    file: &Path,
    cancel: &Arc<AtomicBool>,
) -> Result<ControlFlow<()>> {
    let basename = match file.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => return Ok(ControlFlow::Continue(())),
    };

    let fingerprint = match history::fingerprint(file) {
        Ok(fp) => fp,
        Err(err) => {
            tracing::warn!(file = %basename, error = %err, "could not fingerprint, skipping");
            return Ok(ControlFlow::Continue(()));
        }
    };

    if history.contains(&fingerprint)? {
        // Handled in a prior run; this is leftover cleanup, not new work.
        tracing::info!(file = %basename, "already in history, moving to completed");
        move_group(file, &layout.completed)?;
        return Ok(ControlFlow::Continue(()));
    }

    let claimed = move_group(file, &layout.processing)?;
    let started = Instant::now();

    let log_path = layout.job_log(&basename, &Local::now());
    let log = File::create(&log_path)
        .with_context(|| format!("creating job log {}", log_path.display()))?;

    let exe = std::env::current_exe().context("locating own executable")?;
    let mut cmd = Command::new(exe);
    cmd.arg("process");
    if args.cleanup_wav_files {
        cmd.arg("--cleanup-temp-audio");
    }
    cmd.arg(&claimed);
    if args.models.is_some() || args.timeout_multiplier.is_some() {
        cmd.arg(args.models.clone().unwrap_or_default());
    }
    if let Some(multiplier) = args.timeout_multiplier {
        cmd.arg(multiplier.to_string());
    }

    let outcome = exec::run(
        &mut cmd,
        ExecOptions {
            echo: true,
            log: Some(log),
            cancel: Some(Arc::clone(cancel)),
            term_grace: CHILD_TERM_GRACE,
            ..Default::default()
        },
    )
    .context("spawning job supervisor")?;

    let elapsed = started.elapsed().as_secs();

    match outcome.kind {
        ExitKind::Exited(0) => {
            let moved = move_group(&claimed, &layout.completed)?;
            copy_transcript(&outcome.stdout, &layout.completed, &basename, args)?;
            history.record(&fingerprint, Outcome::Success, &basename)?;
            if args.cleanup_original_audio {
                let _ = fs::remove_file(&moved);
            }
            emit_summary(&basename, true, elapsed, "SUCCESS");
            Ok(ControlFlow::Continue(()))
        }
        ExitKind::Exited(code) if code == EXIT_RETRYABLE => {
            // Lock contention inside the child: requeue, record nothing.
            tracing::info!(file = %basename, "supervisor deferred on lock contention, requeueing");
            move_group(&claimed, &layout.inbox)?;
            emit_summary(&basename, true, elapsed, "deferred");
            Ok(ControlFlow::Continue(()))
        }
        ExitKind::Interrupted => {
            // The child was TERMed (and possibly KILLed) on our signal. If
            // its lock survived the kill and still names the dead child,
            // remove it, but never a lock a fresh peer may have taken.
            let lock_path = lock::lock_file_path("audio-processing");
            if lock::remove_if_pid(&lock_path, outcome.pid) {
                tracing::warn!("removed the killed supervisor's stale lock");
            }
            move_group(&claimed, &layout.failed)?;
            history.record(&fingerprint, Outcome::Failed, &basename)?;
            emit_summary(&basename, false, elapsed, "interrupted");
            Ok(ControlFlow::Break(()))
        }
        kind => {
            tracing::warn!(file = %basename, kind = ?kind, "supervisor failed");
            move_group(&claimed, &layout.failed)?;
            history.record(&fingerprint, Outcome::Failed, &basename)?;
            emit_summary(&basename, false, elapsed, "FAILED");
            Ok(ControlFlow::Continue(()))
        }
    }
}

/// Copy the clean transcript named on the child's last stdout line into
/// `completed/<base>.txt`, honouring the run-log cleanup flag.
fn copy_transcript(
    child_stdout: &str,
    completed: &Path,
    basename: &str,
    args: &QueueArgs,
) -> Result<()> {
    let Some(line) = exec::last_line(child_stdout) else {
        tracing::warn!(file = %basename, "supervisor printed no transcript path");
        return Ok(());
    };
    let transcript = PathBuf::from(line.trim());
    if !transcript.is_file() {
        tracing::warn!(file = %basename, path = %transcript.display(), "transcript path missing");
        return Ok(());
    }

    let stem = Path::new(basename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(basename);
    let dest = completed.join(format!("{stem}.txt"));
    fs::copy(&transcript, &dest)
        .with_context(|| format!("copying transcript to {}", dest.display()))?;

    if args.cleanup_run_logs {
        if let Some(run_dir) = transcript.parent() {
            let _ = fs::remove_dir_all(run_dir);
        }
    }
    Ok(())
}

/// Move a MediaGroup (the file plus its same-base siblings) into `dest`,
/// returning the primary's new path. Renames only; rename is the commit
/// primitive.
pub fn move_group(primary: &Path, dest: &Path) -> Result<PathBuf> {
    let group = scan::media_group(primary)?;
    let mut new_primary = None;
    for member in group {
        let Some(name) = member.file_name() else {
            continue;
        };
        let target = dest.join(name);
        fs::rename(&member, &target)
            .with_context(|| format!("moving {} to {}", member.display(), dest.display()))?;
        if member == primary {
            new_primary = Some(target);
        }
    }
    new_primary.ok_or_else(|| {
        anyhow::anyhow!("primary {} vanished during group move", primary.display())
    })
}

fn emit_summary(basename: &str, ok: bool, elapsed_secs: u64, note: &str) {
    let style = if ok {
        color::success_style()
    } else {
        color::failure_style()
    };
    let symbol = if ok { "✓" } else { "✗" };
    println!(
        "{}{symbol} {basename} ({elapsed_secs} s) – {note}{}",
        style.render(),
        style.render_reset()
    );
}
