//! Contract tests for the job supervisor subcommand: exit codes, the
//! trailing stdout transcript path, run-directory artifacts and the cleanup
//! flag.

use std::fs;
use std::path::PathBuf;

use assert_cmd::prelude::*;
use predicates::prelude::*;

mod common;
use common::{seed_inbox, TestEnv};

fn last_stdout_line(output: &std::process::Output) -> PathBuf {
    let stdout = String::from_utf8_lossy(&output.stdout);
    PathBuf::from(
        stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .expect("stdout has a trailing line")
            .trim(),
    )
}

#[test]
fn success_emits_clean_transcript_path_last_on_stdout() {
    let env = TestEnv::new();
    env.install_happy_tools();
    let input = seed_inbox(&env, "My_Show [abc123].mp3", b"show-bytes");

    let output = env
        .stentor()
        .arg("process")
        .arg(&input)
        .arg("tiny")
        .output()
        .expect("run process");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let clean = last_stdout_line(&output);
    assert!(clean.is_file(), "clean transcript exists: {}", clean.display());
    let text = fs::read_to_string(&clean).unwrap();
    assert!(text.contains("hello from the mock transcriber"));

    // The detailed transcript and segmentation record sit next to it.
    let run_dir = clean.parent().unwrap();
    let detailed = fs::read_to_string(run_dir.join("audio_transcript.md")).unwrap();
    assert!(detailed.contains("# Transcript: My_Show [abc123].mp3"));
    assert!(detailed.contains("--- Segment 001 (Model: tiny) ---"));
    assert!(detailed.contains("Total segments: 1"));
    assert!(run_dir.join("segmentation_info").is_file());
    assert!(run_dir.join("run.json").is_file());

    // Without the cleanup flag the working audio is retained.
    assert!(run_dir.join("audio_workable.wav").exists());
}

#[test]
fn cleanup_flag_removes_temp_audio_but_keeps_transcripts() {
    let env = TestEnv::new();
    env.install_happy_tools();
    let input = seed_inbox(&env, "talk.mp3", b"talk-bytes");

    let output = env
        .stentor()
        .args(["process", "--cleanup-temp-audio"])
        .arg(&input)
        .arg("tiny")
        .output()
        .expect("run process");
    assert!(output.status.success());

    let clean = last_stdout_line(&output);
    let run_dir = clean.parent().unwrap();
    assert!(clean.is_file());
    assert!(run_dir.join("audio_transcript.md").is_file());
    assert!(run_dir.join("segmentation_info").is_file());
    assert!(!run_dir.join("audio_workable.wav").exists());
    assert!(!run_dir.join("segments").exists());
}

#[test]
fn all_models_failing_is_a_processing_failure_with_forensics() {
    let env = TestEnv::new();
    env.install_ffprobe();
    env.install_ffmpeg();
    env.install_stt_failing();
    env.add_model("tiny");
    let input = seed_inbox(&env, "bad.mp3", b"bad-bytes");

    env.stentor()
        .arg("process")
        .arg(&input)
        .arg("tiny")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ERROR:"));

    // The run directory is retained in full for inspection, including a
    // detailed transcript marking the failed segment.
    let runs: Vec<_> = fs::read_dir(&env.runs_root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(runs.len(), 1);
    let detailed = fs::read_to_string(runs[0].join("audio_transcript.md")).unwrap();
    assert!(detailed.contains("--- Segment 001 (FAILED TO TRANSCRIBE) ---"));
    assert!(detailed.contains("Models attempted: tiny"));
    assert!(runs[0].join("audio_workable.wav").exists());
}

#[test]
fn fresh_lock_contention_exits_retryable() {
    let env = TestEnv::new();
    env.install_happy_tools();
    let input = seed_inbox(&env, "talk.mp3", b"talk-bytes");

    // A live peer: our own test PID in a fresh lock file.
    fs::write(
        env.lock_dir.join("audio-processing.lock"),
        format!("{}\n", std::process::id()),
    )
    .unwrap();

    env.stentor()
        .arg("process")
        .arg(&input)
        .arg("tiny")
        .assert()
        .code(10);

    // No run directory was created.
    assert_eq!(fs::read_dir(&env.runs_root).unwrap().count(), 0);
}

#[test]
fn description_sidecar_feeds_the_prompt() {
    let env = TestEnv::new();
    env.install_ffprobe();
    env.install_ffmpeg();
    env.add_model("tiny");
    // STT mock that records its prompt before producing output.
    let prompt_capture = env.tmp.path().join("prompt.txt");
    env.install_script(
        "stt",
        &format!(
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
printf '%s' "$prompt" > "{}"
echo "transcribed text" > "${{of}}.txt"
"#,
            prompt_capture.display()
        ),
    );

    let input = seed_inbox(&env, "My_Show [abc123].mp3", b"show-bytes");
    fs::write(
        env.inbox().join("My_Show [abc123].description"),
        "A show about \"testing\" things.",
    )
    .unwrap();

    env.stentor()
        .arg("process")
        .arg(&input)
        .arg("tiny")
        .assert()
        .success();

    let prompt = fs::read_to_string(&prompt_capture).unwrap();
    assert!(prompt.starts_with("My Show"));
    assert!(prompt.contains("A show about testing things."));
    assert!(!prompt.contains('"'));
}
