//! Named lock files with PID-liveness and staleness recovery.
//!
//! Lock files are the sole concurrency primitive in the system. Each named
//! resource ("queue-engine", "audio-processing", "harvester", "downloader")
//! maps to one file in the lock directory whose content is the owning PID.
//! A lock is removed only by its owner, or by a process that has verified
//! the owner is dead *and* the file is older than the per-name staleness
//! timeout: a dead owner behind a fresh file is treated as a peer that just
//! finished, and the caller retries later instead of racing it.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::process_is_alive;

/// Staleness timeout for locks guarding long-running critical sections
/// (whole-file transcription, a full harvest batch).
pub const LOCK_TIMEOUT_LONG: Duration = Duration::from_secs(7200);
/// Staleness timeout for locks guarding short critical sections.
pub const LOCK_TIMEOUT_SHORT: Duration = Duration::from_secs(300);

/// Outcome of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The lock was free and is now ours.
    Acquired,
    /// A stale lock (dead owner, expired age) was reclaimed.
    AcquiredStale,
    /// A peer holds the lock; the caller should back off.
    Held,
}

/// Return the directory holding all lock files for this user. Overridable
/// via `STENTOR_LOCK_DIR`.
pub fn lock_dir() -> PathBuf {
    if let Some(dir) = env::var_os("STENTOR_LOCK_DIR") {
        return PathBuf::from(dir);
    }
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(env::temp_dir)
        .join("stentor")
        .join("locks")
}

/// Path of the lock file for `name`.
pub fn lock_file_path(name: &str) -> PathBuf {
    lock_dir().join(format!("{name}.lock"))
}

/// One named lock. Ownership is tracked process-locally so that release from
/// a non-owning process (a crashed child's parent, or vice versa) is a
/// silent no-op. Dropping a held lock releases it.
#[derive(Debug)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
    timeout: Duration,
    owned: bool,
}

impl NamedLock {
    pub fn new(name: &str, timeout: Duration) -> io::Result<Self> {
        let dir = lock_dir();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            name: name.to_string(),
            path: dir.join(format!("{name}.lock")),
            timeout,
            owned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempt to take the lock. See the module docs for the protocol.
    pub fn acquire(&mut self) -> io::Result<Acquire> {
        if self.try_create()? {
            self.owned = true;
            return Ok(Acquire::Acquired);
        }

        match read_pid(&self.path) {
            Some(pid) if process_is_alive(pid) => return Ok(Acquire::Held),
            Some(_) => {
                // Dead owner. Only reclaim past the staleness window; an
                // unreadable age counts as stale (last-resort cleanup).
                let expired = match file_age(&self.path) {
                    Some(age) => age > self.timeout,
                    None => true,
                };
                if !expired {
                    return Ok(Acquire::Held);
                }
                tracing::warn!(
                    lock = %self.name,
                    "reclaiming stale lock from dead process"
                );
            }
            None => {
                tracing::warn!(lock = %self.name, "removing unreadable lock file");
            }
        }

        let _ = fs::remove_file(&self.path);
        if self.try_create()? {
            self.owned = true;
            Ok(Acquire::AcquiredStale)
        } else {
            // Another process won the reclaim race.
            Ok(Acquire::Held)
        }
    }

    /// Atomically create the lock file with our PID. `false` when it exists.
    fn try_create(&self) -> io::Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                file.sync_all()?;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Release the lock only if this instance acquired it.
    pub fn release(&mut self) {
        if self.owned {
            let _ = fs::remove_file(&self.path);
            self.owned = false;
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// PID stored in a lock file, if readable.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Remove a lock file only when its stored PID matches `pid`.
///
/// Used by a parent after KILLing a child that never reached its own cleanup:
/// a blind removal could destroy a lock a freshly-started peer has already
/// taken between the child's death and our cleanup.
pub fn remove_if_pid(path: &Path, pid: u32) -> bool {
    if read_pid(path) == Some(pid) {
        fs::remove_file(path).is_ok()
    } else {
        false
    }
}

fn file_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}
