//! Inbox enumeration and MediaGroup resolution.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extensions the queue engine treats as processable media (the downloader
/// extracts audio, so audio-bearing containers are included). Matched
/// case-insensitively.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "m4b", "aac", "ogg", "opus", "flac", "wma", "webm", "mp4", "mkv",
];

fn is_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn is_hidden(name: &str) -> bool {
    // `.` covers dotfiles; `._` additionally covers AppleDouble metadata
    // artifacts left behind on remote filesystems.
    name.starts_with('.')
}

/// Enumerate processable media files in `inbox`, oldest first by modification
/// time, names as the deterministic tie-break. Hidden files and filesystem
/// metadata artifacts are skipped. Sibling (MediaGroup) resolution is the
/// caller's job.
pub fn scan_inbox(inbox: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(inbox)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_hidden(name) || !is_audio_extension(&path) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((mtime, path));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

/// Resolve the MediaGroup of `primary`: the file itself plus every sibling
/// in the same directory named `<base>.<anything>` (metadata sidecars,
/// subtitles, info records). The group moves across queue states together.
pub fn media_group(primary: &Path) -> io::Result<Vec<PathBuf>> {
    let dir = primary
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file has no parent"))?;
    let base = primary
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file has no base name"))?;

    let prefix = format!("{base}.");
    let mut group = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(&prefix) && entry.metadata()?.is_file() {
            group.push(path);
        }
    }
    group.sort();
    Ok(group)
}
