//! Process-level tests for the pyinit wrapper binary.

use std::fs;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn pyinit() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pyinit"))
}

#[test]
fn test_no_command_prints_usage() {
    let output = pyinit().output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"), "{}", stdout);
}

#[test]
fn test_bad_flag_is_usage_error_not_spawn_failure() {
    let output = pyinit()
        .args(["--single-child=yes", "--", "true"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&output.stderr).contains("failed to spawn"));
}

#[test]
fn test_exit_code_passthrough() {
    let status = pyinit()
        .args(["--", "sh", "-c", "exit 3"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));
}

#[test]
fn test_success_passthrough() {
    let output = pyinit().args(["--", "echo", "hello"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello\n");
}

#[test]
fn test_killed_child_reports_128_plus_signal() {
    let status = pyinit()
        .args(["--single-child", "--", "sh", "-c", "kill -KILL $$"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(128 + libc::SIGKILL));
}

#[test]
fn test_spawn_failure_exits_2() {
    let output = pyinit()
        .args(["--", "/nonexistent/pyinit-test-command"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to spawn"));
}

fn forwards_sigterm(extra: &[&str]) {
    let script = "trap 'exit 42' TERM; echo ready; while :; do sleep 0.1; done";
    let mut child = pyinit()
        .args(extra)
        .args(["--", "sh", "-c", script])
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    // Wait until the trap is installed.
    let mut line = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    assert_eq!(line.trim(), "ready");

    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            assert_eq!(status.code(), Some(42));
            return;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("pyinit did not exit after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_sigterm_forwarded_to_process_group() {
    forwards_sigterm(&[]);
}

#[test]
fn test_sigterm_forwarded_to_single_child() {
    forwards_sigterm(&["--single-child"]);
}

#[test]
fn test_orphans_reaped_and_exit_follows_direct_child() {
    // The background sleep is orphaned when sh exits; pyinit must still
    // exit with sh's status rather than wait for it.
    let start = Instant::now();
    let status = pyinit()
        .args(["--", "sh", "-c", "sleep 30 & exit 7"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(7));
    assert!(start.elapsed() < Duration::from_secs(20));
}

/// Children of `parent` currently in zombie state, from `/proc/<pid>/stat`.
fn zombie_children(parent: u32) -> Vec<u32> {
    let mut zombies = Vec::new();
    for entry in fs::read_dir("/proc").unwrap().flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // Fields after the parenthesised comm: state, ppid, ...
        let Some((_, rest)) = stat.rsplit_once(')') else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let state = fields.next();
        let ppid = fields.next().and_then(|p| p.parse::<u32>().ok());
        if state == Some("Z") && ppid == Some(parent) {
            zombies.push(pid);
        }
    }
    zombies
}

#[test]
fn test_orphaned_grandchild_is_reaped() {
    // The subshell exits at once, orphaning a short sleep that gets
    // reparented to pyinit (subreaper). It must not linger as a zombie
    // while sh keeps running.
    let mut child = pyinit()
        .args(["--", "sh", "-c", "(sleep 0.1 &); sleep 1; exit 5"])
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(600));
    let zombies = zombie_children(child.id());
    assert!(child.try_wait().unwrap().is_none(), "pyinit exited early");
    assert!(zombies.is_empty(), "unreaped children: {:?}", zombies);

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(5));
}
