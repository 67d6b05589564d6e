//! Remote-filesystem health probing and idempotent mounting.
//!
//! A remote filesystem can stay listed in the mount table long after its
//! transport has died, so "mounted" alone proves nothing. Health requires
//! both: the OS reports a filesystem at the path, and a directory listing
//! returns within a short timeout. The listing runs on a helper thread and
//! is abandoned on timeout, since a stale mount can block in uninterruptible I/O
//! indefinitely, and we must not hang with it.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::config::Config;
use crate::exec;

/// Upper bound for the responsiveness listing.
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before unmounting at teardown, letting in-flight I/O drain.
pub const UNMOUNT_SETTLE: Duration = Duration::from_secs(2);

/// Whether the OS mount table lists a filesystem at exactly `path`.
pub fn is_mounted(path: &Path) -> bool {
    if let Ok(table) = fs::read_to_string("/proc/mounts") {
        let wanted = path.to_string_lossy();
        return table
            .lines()
            .filter_map(mount_point_of_line)
            .any(|mp| mp == wanted.as_ref());
    }
    // Non-Linux fallback: parse `mount` output ("dev on /path (opts)").
    let Ok(output) = Command::new("mount").output() else {
        return false;
    };
    let text = String::from_utf8_lossy(&output.stdout);
    let needle = format!(" on {} ", path.display());
    text.lines().any(|line| line.contains(&needle))
}

/// Extract and unescape the mount-point field of a `/proc/mounts` line.
fn mount_point_of_line(line: &str) -> Option<String> {
    let field = line.split_whitespace().nth(1)?;
    // Spaces, tabs and backslashes appear octal-escaped in /proc/mounts.
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.by_ref().take(3).collect();
        match u8::from_str_radix(&digits, 8) {
            Ok(byte) => out.push(byte as char),
            Err(_) => {
                out.push(c);
                out.push_str(&digits);
            }
        }
    }
    Some(out)
}

/// Whether a listing of `path` completes within [`LISTING_TIMEOUT`].
pub fn is_responsive(path: &Path) -> bool {
    let path = path.to_path_buf();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let ok = fs::read_dir(&path).map(|mut iter| {
            // Force at least one entry read; an open alone can succeed on a
            // dead transport.
            let _ = iter.next();
            true
        });
        let _ = tx.send(ok.unwrap_or(false));
    });
    matches!(rx.recv_timeout(LISTING_TIMEOUT), Ok(true))
}

/// Both probes together; the only definition of "healthy" used anywhere.
pub fn is_mounted_and_responsive(path: &Path) -> bool {
    is_mounted(path) && is_responsive(path)
}

/// Outcome of [`Mounter::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Healthy before we did anything.
    AlreadyMounted,
    /// We performed the mount; teardown is ours.
    Mounted,
}

/// Tracks whether this process performed the mount, for symmetric teardown.
#[derive(Debug, Default)]
pub struct Mounter {
    performed: bool,
}

impl Mounter {
    /// Idempotent mount: probe, and when unhealthy run the external unmount
    /// helper (best-effort), the mount helper, and re-probe.
    pub fn ensure(&mut self, cfg: &Config, path: &Path) -> Result<MountState> {
        if is_mounted_and_responsive(path) {
            return Ok(MountState::AlreadyMounted);
        }

        // A stale mount must be torn down before remounting over it.
        if let Some(cmd) = cfg.unmount_command() {
            let _ = run_helper(&cmd);
        }
        let mount_cmd = cfg
            .mount_command()
            .ok_or_else(|| anyhow!("no mount helper configured for {}", path.display()))?;
        run_helper(&mount_cmd)?;

        if !is_mounted_and_responsive(path) {
            return Err(anyhow!(
                "mount helper succeeded but {} is still unhealthy",
                path.display()
            ));
        }
        self.performed = true;
        Ok(MountState::Mounted)
    }

    /// Unmount at exit, but only when this process performed the mount.
    pub fn teardown(&mut self, cfg: &Config) {
        if !self.performed {
            return;
        }
        std::thread::sleep(UNMOUNT_SETTLE);
        if let Some(cmd) = cfg.unmount_command() {
            if let Err(err) = run_helper(&cmd) {
                tracing::warn!(error = %err, "unmount helper failed at teardown");
            }
        }
        self.performed = false;
    }
}

fn run_helper(cmd: &[String]) -> Result<()> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| anyhow!("empty helper command"))?;
    let outcome = exec::run(
        Command::new(program).args(args),
        exec::ExecOptions {
            timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        },
    )?;
    if outcome.kind.success() {
        Ok(())
    } else {
        Err(anyhow!(
            "{program} exited with {:?}: {}",
            outcome.kind,
            outcome.stderr.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn root_is_mounted() {
        assert!(is_mounted(Path::new("/")));
    }

    #[test]
    fn tempdir_is_not_a_mount_point() {
        let dir = TempDir::new().unwrap();
        assert!(!is_mounted(dir.path()));
    }

    #[test]
    fn local_dir_is_responsive() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), b"x").unwrap();
        assert!(is_responsive(dir.path()));
    }

    #[test]
    fn missing_dir_is_not_responsive() {
        assert!(!is_responsive(Path::new("/definitely/not/a/real/path")));
    }

    #[test]
    fn unescapes_proc_mounts_spaces() {
        let line = "dev /mnt/My\\040Volume fuse rw 0 0";
        assert_eq!(mount_point_of_line(line).unwrap(), "/mnt/My Volume");
    }
}
