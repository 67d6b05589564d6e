//! End-to-end queue engine behavior: state-directory transitions, history
//! bookkeeping, MediaGroup atomicity and the retryable-contention contract.

use std::fs;

use assert_cmd::prelude::*;

use stentor::history::{History, Outcome};

mod common;
use common::{seed_inbox, TestEnv};

#[test]
fn empty_inbox_is_a_quiet_noop() {
    let env = TestEnv::new();
    env.stentor().arg("queue").assert().success();
    assert!(env.inbox().exists());
    assert!(env.completed().exists());
    assert!(env.failed().exists());
}

#[test]
fn happy_path_processes_oldest_first_and_records_history() {
    let env = TestEnv::new();
    env.install_happy_tools();
    seed_inbox(&env, "podcast.mp3", b"podcast-bytes");
    std::thread::sleep(std::time::Duration::from_millis(50));
    seed_inbox(&env, "talk.mp3", b"talk-bytes");

    env.stentor().arg("queue").assert().success();

    // Both media files end in completed/ with their transcripts.
    assert!(env.completed().join("podcast.mp3").is_file());
    assert!(env.completed().join("talk.mp3").is_file());
    assert!(env.completed().join("podcast.txt").is_file());
    assert!(env.completed().join("talk.txt").is_file());
    assert!(!env.inbox().join("podcast.mp3").exists());

    // History: two SUCCESS lines, commit order oldest-first.
    let history = fs::read_to_string(env.history_file()).unwrap();
    let lines: Vec<&str> = history.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("|SUCCESS|podcast.mp3"));
    assert!(lines[1].ends_with("|SUCCESS|talk.mp3"));
}

#[test]
fn rerun_with_no_new_files_is_idempotent() {
    let env = TestEnv::new();
    env.install_happy_tools();
    seed_inbox(&env, "podcast.mp3", b"podcast-bytes");

    env.stentor().arg("queue").assert().success();
    let history_after_first = fs::read_to_string(env.history_file()).unwrap();

    env.stentor().arg("queue").assert().success();
    let history_after_second = fs::read_to_string(env.history_file()).unwrap();
    assert_eq!(history_after_first, history_after_second);
    assert_eq!(history_after_first.lines().count(), 1);
}

#[test]
fn held_queue_lock_exits_zero_without_touching_the_inbox() {
    let env = TestEnv::new();
    seed_inbox(&env, "waiting.mp3", b"waiting-bytes");
    fs::write(
        env.lock_dir.join("queue-engine.lock"),
        format!("{}\n", std::process::id()),
    )
    .unwrap();

    env.stentor().arg("queue").assert().success();

    assert!(env.inbox().join("waiting.mp3").is_file());
    assert!(!env.history_file().exists());
}

#[test]
fn history_hit_moves_group_to_completed_without_processing() {
    let env = TestEnv::new();
    // Deliberately no tools installed: a spawned child would fail loudly.
    let file = seed_inbox(&env, "seen.mp3", b"seen-bytes");

    let fingerprint = stentor::history::fingerprint(&file).unwrap();
    fs::create_dir_all(&env.harvest_root).unwrap();
    let history = History::new(&env.history_file());
    history
        .record(&fingerprint, Outcome::Success, "seen.mp3")
        .unwrap();

    env.stentor().arg("queue").assert().success();

    assert!(env.completed().join("seen.mp3").is_file());
    assert!(!env.inbox().join("seen.mp3").exists());
    // No second history line was written.
    let text = fs::read_to_string(env.history_file()).unwrap();
    assert_eq!(text.lines().count(), 1);
}

#[test]
fn child_lock_contention_requeues_without_history() {
    let env = TestEnv::new();
    env.install_happy_tools();
    seed_inbox(&env, "contended.mp3", b"contended-bytes");

    // The audio-processing lock is held by a live process (us): the child
    // exits with the retryable code and the file goes back to the inbox.
    fs::write(
        env.lock_dir.join("audio-processing.lock"),
        format!("{}\n", std::process::id()),
    )
    .unwrap();

    env.stentor().arg("queue").assert().success();

    assert!(env.inbox().join("contended.mp3").is_file());
    assert!(!env.completed().join("contended.mp3").exists());
    assert!(!env.failed().join("contended.mp3").exists());
    let history = fs::read_to_string(env.history_file()).unwrap_or_default();
    assert_eq!(history.lines().count(), 0);
}

#[test]
fn failing_job_moves_whole_group_to_failed_and_keeps_the_log() {
    let env = TestEnv::new();
    env.install_ffprobe();
    env.install_ffmpeg();
    env.install_stt_failing();
    env.add_model("tiny");

    seed_inbox(&env, "show.mp3", b"show-bytes");
    fs::write(env.inbox().join("show.info.json"), b"{}").unwrap();
    fs::write(env.inbox().join("show.description"), b"desc").unwrap();
    fs::write(env.inbox().join("show.en.vtt"), b"subs").unwrap();

    env.stentor().arg("queue").assert().success();

    // The whole MediaGroup travels together.
    for name in ["show.mp3", "show.info.json", "show.description", "show.en.vtt"] {
        assert!(env.failed().join(name).is_file(), "{name} in failed/");
        assert!(!env.inbox().join(name).exists(), "{name} left inbox");
    }

    let history = fs::read_to_string(env.history_file()).unwrap();
    assert_eq!(history.lines().count(), 1);
    assert!(history.lines().next().unwrap().ends_with("|FAILED|show.mp3"));

    // The per-job log was retained.
    let logs: Vec<_> = fs::read_dir(env.harvest_root.join("logs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].ends_with("show.mp3.log"));
}

#[test]
fn aggressive_cleanup_removes_run_dir_and_original_audio() {
    let env = TestEnv::new();
    env.install_happy_tools();
    seed_inbox(&env, "tidy.mp3", b"tidy-bytes");

    env.stentor()
        .args(["queue", "--aggressive-cleanup"])
        .assert()
        .success();

    // Transcript survives; the original audio and the run directory do not.
    assert!(env.completed().join("tidy.txt").is_file());
    assert!(!env.completed().join("tidy.mp3").exists());
    assert_eq!(fs::read_dir(&env.runs_root).unwrap().count(), 0);

    let history = fs::read_to_string(env.history_file()).unwrap();
    assert!(history.lines().next().unwrap().ends_with("|SUCCESS|tidy.mp3"));
}
