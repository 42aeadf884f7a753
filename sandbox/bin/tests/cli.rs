//! End-to-end checks of the safe-run binary that need no kernel support:
//! exit codes, environment handling and config validation.

use std::os::unix::fs::PermissionsExt;
use std::process::{Command, Output};

fn safe_run(args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_safe-run"));
    cmd.args(args).env_remove("SAFE_RUN_LOG_LEVEL");
    cmd
}

fn unrestricted(args: &[&str]) -> Output {
    let mut argv = vec!["--unrestricted-filesystem", "--unrestricted-network"];
    argv.extend_from_slice(args);
    safe_run(&argv).output().expect("failed to run safe-run")
}

#[test]
fn missing_command_is_a_usage_error() {
    let output = safe_run(&["--ro", "/"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn child_exit_status_is_propagated() {
    let output = unrestricted(&["--", "sh", "-c", "exit 3"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn invalid_port_fails_before_running_the_command() {
    let dir = tempfile::TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    let script = format!("touch {}", marker.display());
    let output = safe_run(&["--bind-tcp", "70000", "--", "sh", "-c", &script])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(125));
    assert!(
        !marker.exists(),
        "command must not run when the sandbox fails"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("70000"),
        "error should name the port: {stderr}"
    );
}

#[test]
fn unknown_command_exits_127() {
    let output = unrestricted(&["--", "safe-run-definitely-not-a-command"]);
    assert_eq!(output.status.code(), Some(127));
}

#[test]
fn non_executable_file_exits_126() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("data");
    std::fs::write(&file, b"not a program").unwrap();
    std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();

    let output = unrestricted(&["--", file.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(126));
}

#[test]
fn path_search_runs_the_first_executable_match() {
    let shadow = tempfile::TempDir::new().unwrap();
    let real = tempfile::TempDir::new().unwrap();
    let plain = shadow.path().join("safe-run-tool");
    std::fs::write(&plain, b"#!/bin/sh\nexit 5\n").unwrap();
    std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();
    let runnable = real.path().join("safe-run-tool");
    std::fs::write(&runnable, b"#!/bin/sh\nexit 4\n").unwrap();
    std::fs::set_permissions(&runnable, std::fs::Permissions::from_mode(0o755)).unwrap();

    let path = format!("PATH={}:{}", shadow.path().display(), real.path().display());
    let output = unrestricted(&["--env", &path, "--", "safe-run-tool"]);
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn only_declared_environment_reaches_the_command() {
    let output = safe_run(&[
        "--unrestricted-filesystem",
        "--unrestricted-network",
        "--env",
        "GREETING=hello",
        "--env",
        "PASSED_THROUGH",
        "--env",
        "NEVER_SET_ANYWHERE",
        "--",
        "sh",
        "-c",
        r#"test "$GREETING" = hello && test "$PASSED_THROUGH" = yes && test -z "${LEAKED+x}" && test -z "${NEVER_SET_ANYWHERE+x}""#,
    ])
    .env("PASSED_THROUGH", "yes")
    .env("LEAKED", "secret")
    .output()
    .unwrap();

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn command_arguments_are_passed_verbatim() {
    let output = unrestricted(&["--", "sh", "-c", "printf '%s|' \"$@\"", "sh", "--ro", "a b"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout), "--ro|a b|");
}
