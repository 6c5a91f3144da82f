use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

fn minish_path() -> String {
    std::env::var("CARGO_BIN_EXE_minish").unwrap_or_else(|_| "target/debug/minish".to_string())
}

fn run_script(script: &str) -> (i32, String, String) {
    let mut child = Command::new(minish_path())
        .process_group(0)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn minish");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(script.as_bytes())
        .expect("write script");
    let out = child.wait_with_output().expect("wait");
    (
        out.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&out.stdout).to_string(),
        String::from_utf8_lossy(&out.stderr).to_string(),
    )
}

fn spawn_notice_pid(stdout: &str) -> Option<String> {
    let rest = stdout.split("Background process ID: ").nth(1)?;
    let pid: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if pid.is_empty() {
        None
    } else {
        Some(pid)
    }
}

#[test]
fn background_spawn_is_announced_and_reaped() {
    // The background sleep finishes while the foreground sleep holds the
    // shell, so the completion notice lands before exit.
    let (code, out, _err) = run_script("sleep 0.2 &\nsleep 1\nexit\n");
    assert_eq!(code, 0);
    let pid = spawn_notice_pid(&out).unwrap_or_else(|| panic!("no spawn notice in {out:?}"));
    assert!(
        out.contains(&format!(
            "Background process with PID {} exited with status 0",
            pid
        )),
        "stdout: {out:?}"
    );
}

#[test]
fn burst_of_completions_each_reported_once() {
    let script = "sleep 0.2 &\nsleep 0.2 &\nsleep 0.2 &\nsleep 1\nexit\n";
    let (code, out, _err) = run_script(script);
    assert_eq!(code, 0);
    assert_eq!(out.matches("Background process ID: ").count(), 3);
    assert_eq!(
        out.matches("Background process with PID ").count(),
        3,
        "stdout: {out:?}"
    );
}

#[test]
fn background_outcome_never_reaches_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("exit7.sh");
    std::fs::write(&path, "#!/bin/sh\nexit 7\n").expect("write script file");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let script = format!("{} &\nsleep 0.5\nstatus\nexit\n", path.display());
    let (code, out, _err) = run_script(&script);
    assert_eq!(code, 0);
    // The reaper reports the background exit code...
    assert!(out.contains("exited with status 7"), "stdout: {out:?}");
    // ...but `status` still answers for the foreground sleep.
    assert!(out.contains("exit value: 0\n"));
    assert!(!out.contains("exit value: 7"));
}

#[test]
fn background_termination_by_signal_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("die.sh");
    std::fs::write(&path, "#!/bin/sh\nkill -9 $$\n").expect("write script file");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let script = format!("{} &\nsleep 0.5\nexit\n", path.display());
    let (code, out, _err) = run_script(&script);
    assert_eq!(code, 0);
    let pid = spawn_notice_pid(&out).unwrap_or_else(|| panic!("no spawn notice in {out:?}"));
    assert!(
        out.contains(&format!(
            "Background process with PID {} terminated by signal 9",
            pid
        )),
        "stdout: {out:?}"
    );
}
