//! Client-side harvester: walk the source list, download, stage into the
//! worker's inbox, and verify the remote mount around every URL.
//!
//! URLs are processed strictly sequentially. The downstream worker is the
//! bottleneck, and parallel downloads risk IP-based throttling upstream.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use chrono::Local;

use crate::color;
use crate::config::{self, Config};
use crate::error::{self, Failure, EXIT_SUCCESS};
use crate::exec::{self, ExecOptions};
use crate::fetch::{FetchOutcome, Fetcher};
use crate::lock::{Acquire, NamedLock, LOCK_TIMEOUT_LONG};
use crate::mount::{self, Mounter};
use crate::supervisor::cancel_flag;

/// One line of the source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub url: String,
    pub label: Option<String>,
}

/// Parse the source list: one entry per non-blank, non-comment line; the
/// line splits on the first `|` into URL and optional free-form label.
pub fn parse_source_list(text: &str) -> Vec<SourceEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (url, label) = match line.split_once('|') {
            Some((url, label)) => {
                let label = label.trim();
                (
                    url.trim(),
                    if label.is_empty() {
                        None
                    } else {
                        Some(label.to_string())
                    },
                )
            }
            None => (line, None),
        };
        if url.is_empty() {
            continue;
        }
        entries.push(SourceEntry {
            url: url.to_string(),
            label,
        });
    }
    entries
}

/// Parsed `stentor harvest` arguments.
#[derive(Debug, Clone, Default)]
pub struct HarvestArgs {
    pub sources: Option<PathBuf>,
    pub break_on_existing: bool,
}

/// Entry point for the `harvest` subcommand. Returns the exit code.
pub fn run(args: &HarvestArgs) -> i32 {
    match execute(args) {
        Ok(code) => code,
        Err(err) => error::report(&err),
    }
}

fn execute(args: &HarvestArgs) -> Result<i32> {
    let cancel = cancel_flag();

    let mut lock = NamedLock::new("harvester", LOCK_TIMEOUT_LONG)?;
    match lock.acquire()? {
        Acquire::Acquired => {}
        Acquire::AcquiredStale => tracing::warn!("reclaimed a stale harvester lock"),
        Acquire::Held => {
            // Cron-friendly: a running peer is normal, not an error.
            tracing::info!("harvester already running, exiting");
            return Ok(EXIT_SUCCESS);
        }
    }

    let sources_path = args.sources.clone().unwrap_or_else(config::sources_path);
    let text = fs::read_to_string(&sources_path).map_err(|_| {
        Failure::Validation(format!("source list not found: {}", sources_path.display()))
    })?;
    let entries = parse_source_list(&text);
    if entries.is_empty() {
        tracing::info!("source list has no entries, nothing to do");
        return Ok(EXIT_SUCCESS);
    }

    let cfg = Config::load()?;
    let mut mounter = Mounter::default();
    let inbox = resolve_inbox(&cfg, &mut mounter)?;

    let result = run_batch(&cfg, &inbox, &entries, args.break_on_existing, &cancel);

    mounter.teardown(&cfg);
    lock.release();
    result
}

/// Remote mode mounts the worker inbox at `LOCAL_MOUNT_POINT`; local-only
/// mode (when the configuration does not require the remote) stages into a
/// local directory instead.
fn resolve_inbox(cfg: &Config, mounter: &mut Mounter) -> Result<PathBuf> {
    if cfg.require_remote_inbox {
        let mount_point = cfg.local_mount_point.clone().ok_or_else(|| {
            Failure::Validation("LOCAL_MOUNT_POINT is not configured".to_string())
        })?;
        mounter
            .ensure(cfg, &mount_point)
            .context("establishing the remote inbox mount")?;
        Ok(mount_point)
    } else {
        let inbox = cfg
            .local_inbox_dir
            .clone()
            .unwrap_or_else(|| config::config_root().join("inbox"));
        fs::create_dir_all(&inbox)
            .with_context(|| format!("creating local inbox {}", inbox.display()))?;
        Ok(inbox)
    }
}

fn run_batch(
    cfg: &Config,
    inbox: &Path,
    entries: &[SourceEntry],
    break_on_existing: bool,
    cancel: &std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> Result<i32> {
    let logs_dir = config::client_logs_dir();
    fs::create_dir_all(&logs_dir)?;
    let log_path = logs_dir.join(format!(
        "harvest_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let log = File::create(&log_path).ok();

    let mut fetcher = Fetcher::new(inbox, std::sync::Arc::clone(cancel));
    fetcher.log = log;
    fetcher.break_on_existing = break_on_existing;

    let mut transferred = 0usize;
    let mut archived = 0usize;

    for entry in entries {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("interrupted, stopping the batch");
            break;
        }

        match fetcher.fetch(entry)? {
            FetchOutcome::Transferred(n) => transferred += n,
            FetchOutcome::AlreadyArchived | FetchOutcome::NothingNew => archived += 1,
            FetchOutcome::SoftFailed => {}
        }

        // A transport that died mid-URL surfaces here even when the tool
        // output looked clean.
        if cfg.require_remote_inbox && !mount::is_mounted_and_responsive(inbox) {
            return Err(Failure::TransportLost(format!(
                "{} became unresponsive after {}",
                inbox.display(),
                entry.url
            ))
            .into());
        }
    }

    let style = if fetcher.soft_failures == 0 {
        color::success_style()
    } else {
        color::failure_style()
    };
    println!(
        "{}harvest complete: {transferred} new file(s), {archived} already archived, {} failure(s){}",
        style.render(),
        fetcher.soft_failures,
        style.render_reset()
    );
    Ok(EXIT_SUCCESS)
}

/// Entry point for the `pull` subcommand: copy finished `.txt` transcripts
/// from the worker's `completed/` into `LOCAL_TRANSCRIPT_DIR` over ssh.
pub fn run_pull() -> i32 {
    match execute_pull() {
        Ok(code) => code,
        Err(err) => error::report(&err),
    }
}

fn execute_pull() -> Result<i32> {
    let cfg = Config::load()?;
    let dest = cfg.local_transcript_dir.clone().ok_or_else(|| {
        Failure::Validation("LOCAL_TRANSCRIPT_DIR is not configured".to_string())
    })?;
    let (user, host, inbox_dir) = match (&cfg.remote_user, &cfg.remote_host, &cfg.remote_inbox_dir)
    {
        (Some(u), Some(h), Some(d)) => (u, h, d),
        _ => {
            return Err(Failure::Validation(
                "remote user/host/inbox must be configured for pull".to_string(),
            )
            .into())
        }
    };
    fs::create_dir_all(&dest).with_context(|| format!("creating {}", dest.display()))?;

    // completed/ sits next to inbox/ in the worker layout.
    let completed = match Path::new(inbox_dir).parent() {
        Some(parent) => parent.join("completed"),
        None => PathBuf::from("completed"),
    };

    let tool = config::rsync_bin();
    let mut cmd = Command::new(&tool);
    cmd.arg("-a");
    if let Some(key) = &cfg.ssh_key_path {
        cmd.arg("-e").arg(format!("ssh -i {}", key.display()));
    }
    cmd.args(["--include", "*.txt", "--exclude", "*"])
        .arg(format!("{user}@{host}:{}/", completed.display()))
        .arg(format!("{}/", dest.display()));

    let outcome = exec::run(
        &mut cmd,
        ExecOptions {
            echo: true,
            ..Default::default()
        },
    )
    .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow::Error::from(Failure::Dependency(tool.clone()))
        } else {
            e.into()
        }
    })?;

    if outcome.kind.success() {
        println!("{}", dest.display());
        Ok(EXIT_SUCCESS)
    } else {
        Err(Failure::Processing(format!(
            "transcript retrieval failed: {}",
            exec::last_line(&outcome.stderr).unwrap_or("no output")
        ))
        .into())
    }
}
