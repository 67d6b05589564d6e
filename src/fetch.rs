//! Adapter around the external media downloader.
//!
//! Each URL is downloaded into a private scratch directory, classified, and
//! (when new files were produced) handed to the transfer tool which moves
//! them into the (usually remote) inbox. The download archive lives in the
//! inbox itself so every client sharing the mount deduplicates against the
//! same record.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::error::Failure;
use crate::exec::{self, ExecOptions, ExitKind};
use crate::harvest::SourceEntry;
use crate::lock::{Acquire, NamedLock, LOCK_TIMEOUT_SHORT};

/// Downloader output marking a URL that is already in the archive.
pub const ALREADY_ARCHIVED_PHRASE: &str = "has already been recorded in the archive";

/// Output fragments that mean the transport under the mount died.
const TRANSPORT_PHRASES: &[&str] = &["device not configured", "socket is not connected"];

/// Subtitle languages requested from the downloader.
const SUBTITLE_LANGS: &str = "en.*,en";

/// Classified outcome for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New files were produced and moved into the inbox.
    Transferred(usize),
    /// The archive already covers this URL; nothing to do.
    AlreadyArchived,
    /// The tool succeeded but produced nothing new.
    NothingNew,
    /// This URL failed; the batch continues.
    SoftFailed,
}

/// Per-batch fetcher state.
pub struct Fetcher {
    inbox: PathBuf,
    archive: PathBuf,
    cancel: Arc<AtomicBool>,
    /// Batch log receiving the raw tool output alongside the terminal.
    pub log: Option<std::fs::File>,
    /// Stop a listing URL at the first already-archived entry.
    pub break_on_existing: bool,
    /// Soft failures accumulated across the batch, for the final summary.
    pub soft_failures: u32,
}

impl Fetcher {
    pub fn new(inbox: &Path, cancel: Arc<AtomicBool>) -> Self {
        Self {
            inbox: inbox.to_path_buf(),
            archive: inbox.join("download_archive.txt"),
            cancel,
            log: None,
            break_on_existing: false,
            soft_failures: 0,
        }
    }

    fn log_sink(&self) -> Option<std::fs::File> {
        self.log.as_ref().and_then(|f| f.try_clone().ok())
    }

    /// Download one source entry and stage its files into the inbox.
    ///
    /// Transport loss is an error; the caller must abort the batch. Any
    /// other failure is soft: counted, logged, and the batch continues.
    pub fn fetch(&mut self, entry: &SourceEntry) -> Result<FetchOutcome> {
        let scratch_root = config::scratch_root();
        fs::create_dir_all(&scratch_root)
            .with_context(|| format!("creating {}", scratch_root.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix("url-")
            .tempdir_in(&scratch_root)
            .context("creating scratch directory")?;

        let mut lock = NamedLock::new("downloader", LOCK_TIMEOUT_SHORT)?;
        match lock.acquire()? {
            Acquire::Acquired | Acquire::AcquiredStale => {}
            Acquire::Held => {
                tracing::warn!(url = %entry.url, "downloader lock held, skipping URL");
                self.soft_failures += 1;
                return Ok(FetchOutcome::SoftFailed);
            }
        }

        let label = entry.label.as_deref().unwrap_or(&entry.url);
        tracing::info!(url = %entry.url, label = %label, "downloading");

        let tool = config::downloader_bin();
        let template = scratch.path().join("%(title)s [%(id)s].%(ext)s");
        let mut cmd = Command::new(&tool);
        cmd.args(["-f", "bestaudio", "--extract-audio"])
            .arg("-o")
            .arg(&template)
            .args([
                "--write-description",
                "--write-info-json",
                "--write-subs",
                "--sub-langs",
                SUBTITLE_LANGS,
                "--download-archive",
            ])
            .arg(&self.archive);
        if self.break_on_existing {
            cmd.arg("--break-on-existing");
        }
        cmd.arg(&entry.url);
        let outcome = exec::run(
            &mut cmd,
            ExecOptions {
                echo: true,
                log: self.log_sink(),
                cancel: Some(Arc::clone(&self.cancel)),
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

        if outcome.kind == ExitKind::Interrupted {
            // Save what finished downloading, then let the scratch dir go.
            self.salvage(scratch.path());
            self.soft_failures += 1;
            return Ok(FetchOutcome::SoftFailed);
        }

        if let Some(phrase) = transport_failure(&outcome.combined, &self.inbox) {
            return Err(Failure::TransportLost(format!(
                "downloader output contained '{phrase}'"
            ))
            .into());
        }

        if outcome.combined.contains(ALREADY_ARCHIVED_PHRASE) {
            tracing::info!(url = %entry.url, "already recorded in archive");
            return Ok(FetchOutcome::AlreadyArchived);
        }

        if !outcome.kind.success() {
            tracing::warn!(url = %entry.url, kind = ?outcome.kind, "download failed");
            self.soft_failures += 1;
            return Ok(FetchOutcome::SoftFailed);
        }

        let staged = staged_files(scratch.path())?;
        if staged.is_empty() {
            return Ok(FetchOutcome::NothingNew);
        }

        self.transfer(scratch.path(), true)?;
        tracing::info!(url = %entry.url, files = staged.len(), "transferred to inbox");
        Ok(FetchOutcome::Transferred(staged.len()))
    }

    /// rsync the scratch directory into the inbox. With `consume`, source
    /// files are removed as they land, leaving the scratch empty on success.
    fn transfer(&self, scratch: &Path, consume: bool) -> Result<()> {
        let tool = config::rsync_bin();
        let mut cmd = Command::new(&tool);
        cmd.arg("-a");
        if consume {
            cmd.arg("--remove-source-files");
        }
        cmd.args(["--exclude", "*.part", "--exclude", "*.ytdl"])
            .arg(format!("{}/", scratch.display()))
            .arg(format!("{}/", self.inbox.display()));

        let outcome = exec::run(
            &mut cmd,
            ExecOptions {
                echo: true,
                log: self.log_sink(),
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

        if let Some(phrase) = transport_failure(&outcome.combined, &self.inbox) {
            return Err(Failure::TransportLost(format!(
                "transfer output contained '{phrase}'"
            ))
            .into());
        }
        if !outcome.kind.success() {
            return Err(Failure::Processing(format!(
                "transfer into {} failed: {}",
                self.inbox.display(),
                exec::last_line(&outcome.stderr).unwrap_or("no output")
            ))
            .into());
        }
        Ok(())
    }

    /// Best-effort rescue of completed downloads after an interrupt: copy
    /// without consuming, ignore failures.
    fn salvage(&self, scratch: &Path) {
        if staged_files(scratch).map(|f| f.is_empty()).unwrap_or(true) {
            return;
        }
        if let Err(err) = self.transfer(scratch, false) {
            tracing::warn!(error = %err, "salvage transfer failed");
        }
    }
}

/// Completed files staged in the scratch directory: regular, visible, and
/// not partial/journal files.
pub fn staged_files(scratch: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(scratch).context("listing scratch directory")? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        if entry.metadata()?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Check tool output for transport-death indicators. A generic "no such
/// file" only counts when it names the mount path itself.
pub fn transport_failure(output: &str, inbox: &Path) -> Option<&'static str> {
    let lower = output.to_ascii_lowercase();
    for &phrase in TRANSPORT_PHRASES {
        if lower.contains(phrase) {
            return Some(phrase);
        }
    }
    let inbox_str = inbox.to_string_lossy().to_ascii_lowercase();
    if lower.contains("no such file") && lower.contains(inbox_str.as_str()) {
        return Some("no such file (mount path)");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn staged_files_skip_partials_and_hidden() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("done.m4a"), b"x").unwrap();
        fs::write(dir.path().join("wip.m4a.part"), b"x").unwrap();
        fs::write(dir.path().join("wip.m4a.ytdl"), b"x").unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();

        let staged = staged_files(dir.path()).unwrap();
        assert_eq!(staged.len(), 1);
        assert!(staged[0].ends_with("done.m4a"));
    }

    #[test]
    fn transport_phrases_are_detected() {
        let inbox = Path::new("/mnt/worker/inbox");
        assert!(transport_failure("read: Device not configured", inbox).is_some());
        assert!(transport_failure("write: Socket is not connected", inbox).is_some());
        assert!(
            transport_failure("No such file or directory: /mnt/worker/inbox/archive", inbox)
                .is_some()
        );
        // Generic missing-file errors unrelated to the mount are not fatal.
        assert!(transport_failure("No such file or directory: /etc/nope", inbox).is_none());
        assert!(transport_failure("normal output", inbox).is_none());
    }
}
