//! Append-only record of processed-file fingerprints and outcomes.
//!
//! One line per terminal job: `fingerprint|timestamp|outcome|basename`.
//! Either terminal outcome is final for the queue; a file whose fingerprint
//! appears here is never reprocessed unless the operator removes the line.
//! The file is never rewritten, only appended under an advisory lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use fs2::FileExt;
use sha2::{Digest, Sha256};

/// Terminal job outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => f.write_str("SUCCESS"),
            Outcome::Failed => f.write_str("FAILED"),
        }
    }
}

/// Handle on the processed-files history.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Whether `fingerprint` already has a terminal record. A linear scan is
    /// fine; the file stays small (one short line per processed file).
    pub fn contains(&self, fingerprint: &str) -> io::Result<bool> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        Ok(text
            .lines()
            .any(|line| line.split('|').next() == Some(fingerprint)))
    }

    /// Append a terminal record and flush it to disk. The advisory lock
    /// serializes appends with any peer writer sharing the file.
    pub fn record(&self, fingerprint: &str, outcome: Outcome, basename: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let timestamp = Local::now().format("%Y-%m-%d_%H%M%S");
        let result = writeln!(file, "{fingerprint}|{timestamp}|{outcome}|{basename}")
            .and_then(|()| file.sync_all());
        let _ = fs2::FileExt::unlock(&file);
        result
    }
}

/// Content fingerprint of the primary audio file: lowercase hex SHA-256.
pub fn fingerprint(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
