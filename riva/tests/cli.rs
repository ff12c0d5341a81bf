//! CLI tests for the `riva` binary.
//!
//! Spawns the binary in a temp workspace and checks exit codes plus the session file
//! that `run` leaves behind for `show` and `validate`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use riva::exit_codes;
use riva::io::config::{CONFIG_FILE, EngineConfig, load_config, write_config};

fn riva(workdir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_riva"))
        .current_dir(workdir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("spawn riva")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn session_from(output: &Output) -> PathBuf {
    stdout(output)
        .lines()
        .find_map(|line| line.strip_prefix("session: "))
        .map(PathBuf::from)
        .expect("session line")
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = riva(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join(CONFIG_FILE)).expect("load");
    assert_eq!(cfg, EngineConfig::default());

    let second = riva(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::OK));
    assert!(stdout(&second).contains("already exists"));
}

/// Verifies run -> validate -> show on a goal the heuristic planner can finish.
#[test]
fn run_verifies_create_goal_and_records_session() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = riva(
        temp.path(),
        &[
            "run",
            "--goal",
            "create hello.txt containing hi",
            "--acceptance",
            "hello.txt exists",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    assert!(stdout(&output).contains("outcome: verified"));
    assert_eq!(
        fs::read_to_string(temp.path().join("hello.txt")).expect("read"),
        "hi"
    );

    let session = session_from(&output);
    assert!(session.starts_with(temp.path().join(".riva/sessions")));
    let session_arg = session.to_str().expect("utf-8 path");

    let validate = riva(temp.path(), &["validate", session_arg]);
    assert_eq!(validate.status.code(), Some(exit_codes::OK));
    assert!(stdout(&validate).starts_with("ok: run-"));

    let show = riva(temp.path(), &["show", session_arg]);
    assert_eq!(show.status.code(), Some(exit_codes::OK));
    assert!(stdout(&show).contains("[verified] int-0000 create hello.txt containing hi"));
}

#[test]
fn run_exits_with_root_failed_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = EngineConfig::default();
    cfg.limits.max_depth = 1;
    write_config(&temp.path().join(CONFIG_FILE), &cfg).expect("config");

    let output = riva(
        temp.path(),
        &[
            "run",
            "--goal",
            "find the missing loader",
            "--acceptance",
            "loader file exists",
        ],
    );
    assert_eq!(output.status.code(), Some(exit_codes::ROOT_FAILED), "{output:?}");
    assert!(stdout(&output).contains("outcome: failed"));
    assert!(session_from(&output).exists());
}

#[test]
fn invalid_config_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(CONFIG_FILE), "[limits]\nmax_depth = 0\n").expect("config");

    let output = riva(
        temp.path(),
        &["run", "--goal", "create a.txt", "--acceptance", "a.txt exists"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn validate_rejects_tampered_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = riva(
        temp.path(),
        &[
            "run",
            "--goal",
            "create hello.txt containing hi",
            "--acceptance",
            "hello.txt exists",
        ],
    );
    let session = session_from(&output);
    let raw = fs::read_to_string(&session).expect("read");
    fs::write(&session, raw.replace("\"verified\"", "\"pending\"")).expect("tamper");

    let validate = riva(
        temp.path(),
        &["validate", session.to_str().expect("utf-8 path")],
    );
    assert_eq!(validate.status.code(), Some(exit_codes::INVALID));
}
