use assert_cmd::prelude::*;
use predicates::prelude::*;

mod common;
use common::TestEnv;

#[test]
fn no_arguments_prints_usage_and_exits_zero() {
    let env = TestEnv::new();
    env.stentor()
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn help_flag_exits_zero() {
    let env = TestEnv::new();
    env.stentor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("queue"))
        .stdout(predicate::str::contains("harvest"));
}

#[test]
fn process_missing_input_is_a_validation_error() {
    let env = TestEnv::new();
    env.stentor()
        .args(["process", "/definitely/not/here.mp3"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ERROR:"));
}

#[test]
fn process_rejects_zero_timeout_multiplier() {
    let env = TestEnv::new();
    env.install_happy_tools();
    let input = common::seed_inbox(&env, "talk.mp3", b"audio-bytes");
    env.stentor()
        .arg("process")
        .arg(&input)
        .args(["tiny", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ERROR:"));
}
