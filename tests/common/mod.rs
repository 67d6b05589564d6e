#![allow(dead_code)] // each test binary uses a different helper subset

//! Shared helpers for the CLI integration tests.
//!
//! External tools (probe, audio tool, STT binary, downloader, transfer tool)
//! are resolved through `STENTOR_*_BIN` environment variables, so the tests
//! install small shell scripts standing in for each of them and point every
//! `stentor` invocation at an isolated set of roots.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use tempfile::TempDir;

/// Isolated roots for one test: queue state, runs, locks, config and mocks.
pub struct TestEnv {
    pub tmp: TempDir,
    pub harvest_root: PathBuf,
    pub runs_root: PathBuf,
    pub lock_dir: PathBuf,
    pub config_dir: PathBuf,
    pub models_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create tempdir");
        let root = tmp.path();
        let env = Self {
            harvest_root: root.join("harvesting"),
            runs_root: root.join("runs"),
            lock_dir: root.join("locks"),
            config_dir: root.join("config"),
            models_dir: root.join("models"),
            bin_dir: root.join("bin"),
            tmp,
        };
        for dir in [
            &env.harvest_root,
            &env.runs_root,
            &env.lock_dir,
            &env.config_dir,
            &env.models_dir,
            &env.bin_dir,
        ] {
            fs::create_dir_all(dir).expect("create test root");
        }
        env
    }

    /// A `stentor` command wired to this environment.
    pub fn stentor(&self) -> Command {
        let mut cmd = Command::cargo_bin("stentor").expect("binary exists");
        cmd.env("STENTOR_HARVEST_ROOT", &self.harvest_root)
            .env("STENTOR_RUNS_ROOT", &self.runs_root)
            .env("STENTOR_LOCK_DIR", &self.lock_dir)
            .env("STENTOR_CONFIG_DIR", &self.config_dir)
            .env("STENTOR_MODELS_DIR", &self.models_dir)
            .env("NO_COLOR", "1");
        for (var, name) in [
            ("STENTOR_FFMPEG_BIN", "ffmpeg"),
            ("STENTOR_FFPROBE_BIN", "ffprobe"),
            ("STENTOR_STT_BIN", "stt"),
            ("STENTOR_DOWNLOADER_BIN", "downloader"),
            ("STENTOR_RSYNC_BIN", "rsync"),
        ] {
            cmd.env(var, self.bin_dir.join(name));
        }
        cmd
    }

    pub fn inbox(&self) -> PathBuf {
        self.harvest_root.join("inbox")
    }

    pub fn completed(&self) -> PathBuf {
        self.harvest_root.join("completed")
    }

    pub fn failed(&self) -> PathBuf {
        self.harvest_root.join("failed")
    }

    pub fn history_file(&self) -> PathBuf {
        self.harvest_root.join("processed_files.txt")
    }

    /// Install an executable shell script under the mock bin directory.
    pub fn install_script(&self, name: &str, body: &str) -> PathBuf {
        write_script(&self.bin_dir, name, body)
    }

    /// Probe mock: a non-canonical mp3 stream, three seconds long.
    pub fn install_ffprobe(&self) {
        self.install_script(
            "ffprobe",
            r#"#!/usr/bin/env bash
echo '{"streams":[{"codec_name":"mp3","sample_rate":"44100","channels":2}],"format":{"duration":"3.0"}}'
"#,
        );
    }

    /// Audio-tool mock: silence detection reports one silence from 1.2 s to
    /// 2.4 s; every other invocation just creates its output file.
    pub fn install_ffmpeg(&self) {
        self.install_script(
            "ffmpeg",
            r#"#!/usr/bin/env bash
if [[ "$*" == *silencedetect* ]]; then
  echo "[silencedetect @ 0x1] silence_start: 1.2" >&2
  echo "[silencedetect @ 0x1] silence_end: 2.4 | silence_duration: 1.2" >&2
else
  out="${@: -1}"
  : > "$out"
fi
"#,
        );
    }

    /// STT mock: refuses quoted prompts, writes a fixed transcript.
    pub fn install_stt_ok(&self) {
        self.install_script(
            "stt",
            r#"#!/usr/bin/env bash
of=""
prompt=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    -of) of="$2"; shift 2 ;;
    --prompt) prompt="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [[ "$prompt" == *'"'* ]]; then
  echo "prompt contained a double quote" >&2
  exit 9
fi
echo "hello from the mock transcriber" > "${of}.txt"
"#,
        );
    }

    /// STT mock that fails every attempt.
    pub fn install_stt_failing(&self) {
        self.install_script(
            "stt",
            r#"#!/usr/bin/env bash
echo "error: cannot read audio" >&2
exit 1
"#,
        );
    }

    /// Install the full happy-path tool set plus one model artifact.
    pub fn install_happy_tools(&self) {
        self.install_ffprobe();
        self.install_ffmpeg();
        self.install_stt_ok();
        self.add_model("tiny");
    }

    /// Create a fake model artifact so the engine considers it available.
    pub fn add_model(&self, name: &str) {
        fs::write(self.models_dir.join(format!("ggml-{name}.bin")), b"weights")
            .expect("write model");
    }

    /// Write the client configuration file.
    pub fn write_config(&self, text: &str) {
        fs::write(self.config_dir.join("stentor.conf"), text).expect("write config");
    }

    /// Write the source list.
    pub fn write_sources(&self, text: &str) {
        fs::write(self.config_dir.join("content_sources.txt"), text).expect("write sources");
    }
}

/// Write an executable script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }
    path
}

/// Drop a media file into the inbox with distinct content (distinct
/// fingerprint).
pub fn seed_inbox(env: &TestEnv, name: &str, content: &[u8]) -> PathBuf {
    let inbox = env.inbox();
    fs::create_dir_all(&inbox).expect("create inbox");
    let path = inbox.join(name);
    fs::write(&path, content).expect("seed inbox file");
    path
}
