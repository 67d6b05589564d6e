//! Centralised handling of on-disk locations.
//!
//! Two roots exist on the worker host. The *harvesting root* holds the four
//! queue-state directories plus per-job logs and the processed-file history;
//! the *runs root* holds one directory per processing run, deliberately
//! outside the harvesting hierarchy so that transient artifacts never pollute
//! the inbox a remote client writes into. Grouping paths in structs keeps the
//! naming logic in one place and avoids ad-hoc string formatting throughout
//! the code base.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Return the harvesting root, creating it if needed.
///
/// Users can override the default location by setting the
/// `STENTOR_HARVEST_ROOT` environment variable.
pub fn harvest_root() -> io::Result<PathBuf> {
    let path = if let Some(p) = env::var_os("STENTOR_HARVEST_ROOT") {
        PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(env::temp_dir)
            .join("stentor")
            .join("harvesting")
    };
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Return the processing-runs root, creating it if needed. Overridable via
/// `STENTOR_RUNS_ROOT`.
pub fn runs_root() -> io::Result<PathBuf> {
    let path = if let Some(p) = env::var_os("STENTOR_RUNS_ROOT") {
        PathBuf::from(p)
    } else {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(env::temp_dir)
            .join("stentor")
            .join("runs")
    };
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// The four queue states plus their sibling bookkeeping files.
#[derive(Debug, Clone)]
pub struct HarvestLayout {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub processing: PathBuf,
    pub completed: PathBuf,
    pub failed: PathBuf,
    pub logs: PathBuf,
    pub history_file: PathBuf,
}

impl HarvestLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            inbox: root.join("inbox"),
            processing: root.join("processing"),
            completed: root.join("completed"),
            failed: root.join("failed"),
            logs: root.join("logs"),
            history_file: root.join("processed_files.txt"),
        }
    }

    /// Create every state directory. Idempotent.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            &self.inbox,
            &self.processing,
            &self.completed,
            &self.failed,
            &self.logs,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Per-job log path: `logs/<timestamp>_<basename>.log`.
    pub fn job_log(&self, basename: &str, now: &DateTime<Local>) -> PathBuf {
        self.logs
            .join(format!("{}_{basename}.log", now.format("%Y%m%d_%H%M%S")))
    }
}

/// Unique run identifier: `md5(basename)` + `_` + local timestamp. The hash
/// disambiguates identically-timed runs of different files; the timestamp
/// disambiguates repeated runs of the same file.
pub fn run_id(basename: &str, now: &DateTime<Local>) -> String {
    let digest = md5::compute(basename.as_bytes());
    format!("{digest:x}_{}", now.format("%Y%m%d_%H%M%S"))
}

/// Every artifact written during one processing run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub workable_wav: PathBuf,
    pub segments_dir: PathBuf,
    pub info: PathBuf,
    pub transcript_md: PathBuf,
    pub transcript_txt: PathBuf,
    pub meta: PathBuf,
}

impl RunPaths {
    pub fn new(runs_root: &Path, run_id: &str) -> Self {
        let run_dir = runs_root.join(run_id);
        Self {
            workable_wav: run_dir.join("audio_workable.wav"),
            segments_dir: run_dir.join("segments"),
            info: run_dir.join("segmentation_info"),
            transcript_md: run_dir.join("audio_transcript.md"),
            transcript_txt: run_dir.join("audio_transcript.txt"),
            meta: run_dir.join("run.json"),
            run_dir,
        }
    }

    /// Create the run directory and the segments subdirectory.
    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(&self.segments_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_id_is_hash_underscore_timestamp() {
        let now = Local.with_ymd_and_hms(2026, 7, 4, 12, 30, 15).unwrap();
        let id = run_id("podcast.mp3", &now);
        let (hash, ts) = id.split_once('_').unwrap();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ts, "20260704_123015");
    }

    #[test]
    fn run_id_differs_per_basename() {
        let now = Local.with_ymd_and_hms(2026, 7, 4, 12, 30, 15).unwrap();
        assert_ne!(run_id("a.mp3", &now), run_id("b.mp3", &now));
    }

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = HarvestLayout::new(Path::new("/srv/harvesting"));
        assert_eq!(layout.inbox, Path::new("/srv/harvesting/inbox"));
        assert_eq!(
            layout.history_file,
            Path::new("/srv/harvesting/processed_files.txt")
        );
    }
}
