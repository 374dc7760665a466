//! Binary-level tests for the pwmd CLI.
//!
//! Runs the built `pwmd` executable:
//! - argument errors and help output
//! - client commands against an unreachable daemon
//! - a real `pwmd server` over a fake sysfs tree

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use assert_cmd::Command;
use predicates::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn pwmd() -> Command {
    let mut cmd = Command::cargo_bin("pwmd").unwrap();
    cmd.env_remove("PWMD_SOCKET")
        .env_remove("PWMD_SYSFS")
        .env_remove("PWMD_AUTHKEY")
        .env_remove("RUST_LOG");
    cmd
}

/// Builds a fake PWM class with one chip of two timers, timer 1 exported.
fn create_fake_sysfs(root: &Path) -> PathBuf {
    let base = root.join("pwm");
    let chip = base.join("pwmchip0");
    fs::create_dir_all(chip.join("pwm1")).unwrap();
    fs::write(chip.join("npwm"), "2\n").unwrap();
    fs::write(chip.join("export"), "").unwrap();
    fs::write(chip.join("unexport"), "").unwrap();
    for (attr, value) in [
        ("enable", "0\n"),
        ("period", "0\n"),
        ("duty_cycle", "0\n"),
        ("polarity", "normal\n"),
    ] {
        fs::write(chip.join("pwm1").join(attr), value).unwrap();
    }
    base
}

/// `pwmd server` child process, killed on drop.
struct ServerProcess {
    child: Child,
    socket: PathBuf,
}

impl ServerProcess {
    fn start(sysfs: &Path, socket: &Path) -> Self {
        let child = StdCommand::cargo_bin("pwmd")
            .unwrap()
            .args(["server", "--authkey", "cli-test", "--sysfs"])
            .arg(sysfs)
            .arg("--socket")
            .arg(socket)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !socket.exists() {
            assert!(Instant::now() < deadline, "server did not create its socket");
            thread::sleep(Duration::from_millis(20));
        }

        Self {
            child,
            socket: socket.to_path_buf(),
        }
    }

    fn client(&self) -> Command {
        let mut cmd = pwmd();
        cmd.args(["--authkey", "cli-test", "--socket"])
            .arg(&self.socket);
        cmd
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

// ============================================================================
// Argument Handling
// ============================================================================

#[test]
fn test_help_lists_commands() {
    pwmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("server"))
        .stdout(predicate::str::contains("servoset"));
}

#[test]
fn test_completions_bash() {
    pwmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pwmd"));
}

#[test]
fn test_invalid_set_arguments() {
    pwmd()
        .args(["set", "0", "0", "2", "1000", "10"])
        .assert()
        .failure();
}

#[test]
fn test_unreachable_daemon_fails() {
    let dir = tempfile::tempdir().unwrap();
    pwmd()
        .args(["states", "--authkey", "any"])
        .arg("--socket")
        .arg(dir.path().join("missing.sock"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Daemonに接続できません"));
}

#[test]
fn test_server_without_key_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("pwmd.sock");
    pwmd()
        .args(["server", "--sysfs"])
        .arg(dir.path())
        .arg("--socket")
        .arg(&socket)
        .timeout(Duration::from_secs(10))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("認証キーが設定されていません"));
    assert!(!socket.exists());
}

#[test]
fn test_client_without_key_fails_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    pwmd()
        .arg("states")
        .arg("--socket")
        .arg(dir.path().join("missing.sock"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("PWMD_AUTHKEY"))
        .stderr(predicate::str::contains("Daemonに接続できません").not());
}

// ============================================================================
// Against a Running Server
// ============================================================================

#[test]
fn test_server_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = create_fake_sysfs(dir.path());
    let server = ServerProcess::start(&sysfs, &dir.path().join("run").join("pwmd.sock"));

    server
        .client()
        .args(["--json", "get", "0", "0"])
        .assert()
        .success()
        .stdout("null\n");

    server
        .client()
        .args(["set", "0", "1", "1", "1000", "250"])
        .assert()
        .success();

    let chip = sysfs.join("pwmchip0").join("pwm1");
    assert_eq!(fs::read_to_string(chip.join("period")).unwrap().trim(), "1000");
    assert_eq!(fs::read_to_string(chip.join("duty_cycle")).unwrap().trim(), "250");
    assert_eq!(fs::read_to_string(chip.join("enable")).unwrap().trim(), "1");

    server
        .client()
        .args(["--json", "pwm", "0", "1"])
        .assert()
        .success()
        .stdout("[0.25,1000000.0]\n");

    server
        .client()
        .args(["--json", "pwmfreq"])
        .assert()
        .success()
        .stdout("1000.0\n");
}

#[test]
fn test_server_error_reply_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = create_fake_sysfs(dir.path());
    let server = ServerProcess::start(&sysfs, &dir.path().join("pwmd.sock"));

    server
        .client()
        .args(["set", "0", "1", "1", "100", "101"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("duty 101 is greater than period 100"));
}

#[test]
fn test_server_rejects_wrong_key() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = create_fake_sysfs(dir.path());
    let server = ServerProcess::start(&sysfs, &dir.path().join("pwmd.sock"));

    pwmd()
        .args(["states", "--authkey", "wrong", "--socket"])
        .arg(&server.socket)
        .assert()
        .code(1);

    server.client().arg("states").assert().success();
}
