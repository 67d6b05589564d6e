//! Client/worker configuration.
//!
//! All durable settings live in a single `stentor.conf` under the user config
//! root: one `KEY=value` per line, `#` starts a comment, values may be
//! surrounded by single or double quotes. External tool locations are
//! resolved from the environment with a PATH-name fallback so that tests and
//! unusual installs can substitute their own binaries.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Configuration file name inside the config root.
pub const CONFIG_FILE: &str = "stentor.conf";
/// Default source-list file name inside the config root.
pub const SOURCES_FILE: &str = "content_sources.txt";

/// Parsed `stentor.conf`. Every field is optional on the worker host; the
/// harvester validates the remote keys it actually needs at startup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub remote_user: Option<String>,
    pub remote_host: Option<String>,
    pub remote_inbox_dir: Option<String>,
    pub local_mount_point: Option<PathBuf>,
    pub local_transcript_dir: Option<PathBuf>,
    pub volume_name: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    /// When false the harvester degrades to a local inbox instead of failing
    /// without a healthy remote mount.
    pub require_remote_inbox: bool,
    pub local_inbox_dir: Option<PathBuf>,
    pub models_dir: PathBuf,
}

/// Return the directory holding `stentor.conf`, the source list, lock-free
/// client state and the per-URL scratch area.
///
/// Users can override the default location by setting `STENTOR_CONFIG_DIR`.
pub fn config_root() -> PathBuf {
    if let Some(dir) = env::var_os("STENTOR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(env::temp_dir)
        .join("stentor")
}

/// Scratch root for per-URL download directories.
pub fn scratch_root() -> PathBuf {
    config_root().join("temp_downloads")
}

/// Client-side log directory.
pub fn client_logs_dir() -> PathBuf {
    config_root().join("logs")
}

/// Default source-list path.
pub fn sources_path() -> PathBuf {
    config_root().join(SOURCES_FILE)
}

impl Config {
    /// Load `stentor.conf` from the config root. A missing file yields the
    /// defaults – the worker host runs fine without any client configuration.
    pub fn load() -> Result<Self> {
        let path = config_root().join(CONFIG_FILE);
        let pairs = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            parse_kv(&text)
        } else {
            HashMap::new()
        };
        Ok(Self::from_pairs(pairs))
    }

    fn from_pairs(pairs: HashMap<String, String>) -> Self {
        let get = |key: &str| pairs.get(key).cloned();
        let get_path = |key: &str| pairs.get(key).map(PathBuf::from);

        let models_dir = env::var_os("STENTOR_MODELS_DIR")
            .map(PathBuf::from)
            .or_else(|| get_path("MODELS_DIR"))
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(env::temp_dir)
                    .join("stentor")
                    .join("models")
            });

        Self {
            remote_user: get("STENTOR_REMOTE_USER"),
            remote_host: get("STENTOR_REMOTE_HOST"),
            remote_inbox_dir: get("STENTOR_REMOTE_AUDIO_INBOX_DIR"),
            local_mount_point: get_path("LOCAL_MOUNT_POINT"),
            local_transcript_dir: get_path("LOCAL_TRANSCRIPT_DIR"),
            volume_name: get("STENTOR_VOLUME_NAME"),
            ssh_key_path: get_path("STENTOR_SSH_KEY_PATH"),
            require_remote_inbox: get("REQUIRE_REMOTE_INBOX")
                .map(|v| v != "false" && v != "0" && v != "no")
                .unwrap_or(true),
            local_inbox_dir: get_path("LOCAL_INBOX_DIR"),
            models_dir,
        }
    }

    /// Command line that establishes the remote mount. Overridable via
    /// `STENTOR_MOUNT_HELPER`; otherwise composed as an sshfs invocation from
    /// the remote keys. `None` when the configuration has no remote side.
    pub fn mount_command(&self) -> Option<Vec<String>> {
        if let Ok(helper) = env::var("STENTOR_MOUNT_HELPER") {
            return Some(helper.split_whitespace().map(String::from).collect());
        }
        let (user, host, dir) = (
            self.remote_user.as_ref()?,
            self.remote_host.as_ref()?,
            self.remote_inbox_dir.as_ref()?,
        );
        let mount_point = self.local_mount_point.as_ref()?;
        let mut cmd = vec![
            "sshfs".to_string(),
            format!("{user}@{host}:{dir}"),
            mount_point.display().to_string(),
            "-o".to_string(),
            "reconnect,ServerAliveInterval=15,ServerAliveCountMax=3".to_string(),
        ];
        if let Some(key) = &self.ssh_key_path {
            cmd.push("-o".to_string());
            cmd.push(format!("IdentityFile={}", key.display()));
        }
        Some(cmd)
    }

    /// Command line that tears the mount down. Overridable via
    /// `STENTOR_UNMOUNT_HELPER`.
    pub fn unmount_command(&self) -> Option<Vec<String>> {
        if let Ok(helper) = env::var("STENTOR_UNMOUNT_HELPER") {
            return Some(helper.split_whitespace().map(String::from).collect());
        }
        let mount_point = self.local_mount_point.as_ref()?;
        if cfg!(target_os = "linux") {
            Some(vec![
                "fusermount".to_string(),
                "-u".to_string(),
                mount_point.display().to_string(),
            ])
        } else {
            Some(vec![
                "umount".to_string(),
                mount_point.display().to_string(),
            ])
        }
    }
}

/// Parse `KEY=value` text into a map. Blank lines and `#` comments are
/// ignored; values keep internal whitespace but lose surrounding quotes.
pub fn parse_kv(text: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let mut value = value.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        pairs.insert(key, value.to_string());
    }
    pairs
}

fn tool_from_env(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Audio conversion / analysis tool.
pub fn ffmpeg_bin() -> String {
    tool_from_env("STENTOR_FFMPEG_BIN", "ffmpeg")
}

/// Stream metadata probe.
pub fn ffprobe_bin() -> String {
    tool_from_env("STENTOR_FFPROBE_BIN", "ffprobe")
}

/// Speech-to-text binary (whisper.cpp command-line interface).
pub fn stt_bin() -> String {
    tool_from_env("STENTOR_STT_BIN", "whisper-cli")
}

/// External media downloader.
pub fn downloader_bin() -> String {
    tool_from_env("STENTOR_DOWNLOADER_BIN", "yt-dlp")
}

/// Transfer tool used to move staged downloads into the remote inbox.
pub fn rsync_bin() -> String {
    tool_from_env("STENTOR_RSYNC_BIN", "rsync")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comments_blanks_and_quotes() {
        let text = "\n# a comment\nSTENTOR_REMOTE_HOST=example.org\n\
                    STENTOR_REMOTE_USER=\"alice\"\nLOCAL_MOUNT_POINT='/mnt/stentor'\n\
                    not a pair\n";
        let pairs = parse_kv(text);
        assert_eq!(pairs.get("STENTOR_REMOTE_HOST").unwrap(), "example.org");
        assert_eq!(pairs.get("STENTOR_REMOTE_USER").unwrap(), "alice");
        assert_eq!(pairs.get("LOCAL_MOUNT_POINT").unwrap(), "/mnt/stentor");
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn value_may_contain_equals() {
        let pairs = parse_kv("KEY=a=b=c\n");
        assert_eq!(pairs.get("KEY").unwrap(), "a=b=c");
    }

    #[test]
    fn mount_command_composed_from_remote_keys() {
        let mut pairs = HashMap::new();
        pairs.insert("STENTOR_REMOTE_USER".into(), "bob".into());
        pairs.insert("STENTOR_REMOTE_HOST".into(), "worker.lan".into());
        pairs.insert(
            "STENTOR_REMOTE_AUDIO_INBOX_DIR".into(),
            "/srv/harvesting/inbox".into(),
        );
        pairs.insert("LOCAL_MOUNT_POINT".into(), "/mnt/worker".into());
        let cfg = Config::from_pairs(pairs);
        let cmd = cfg.mount_command().unwrap();
        assert_eq!(cmd[0], "sshfs");
        assert_eq!(cmd[1], "bob@worker.lan:/srv/harvesting/inbox");
        assert_eq!(cmd[2], "/mnt/worker");
    }

    #[test]
    fn mount_command_absent_without_remote_keys() {
        let cfg = Config::from_pairs(HashMap::new());
        assert!(cfg.mount_command().is_none());
    }

    #[test]
    fn require_remote_inbox_defaults_true() {
        let cfg = Config::from_pairs(HashMap::new());
        assert!(cfg.require_remote_inbox);
        let mut pairs = HashMap::new();
        pairs.insert("REQUIRE_REMOTE_INBOX".into(), "false".into());
        assert!(!Config::from_pairs(pairs).require_remote_inbox);
    }
}
