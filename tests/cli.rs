use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

/// A config that elevates with a plain `sh` and keeps state in `dir`.
fn config(dir: &TempDir) -> String {
    let state = dir.path().join("state.json");
    let body = serde_json::json!({
        "elevate": ["sh"],
        "stateFile": state,
        "udcPollIntervalMs": 0,
    });
    write(dir.path(), "config.json", &body.to_string())
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("hidscript")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("estimate"))
        .stdout(predicate::str::contains("panic-stop"));
}

#[test]
fn test_parse_prints_commands_and_functions() {
    let dir = TempDir::new().unwrap();
    let script = write(
        dir.path(),
        "s.txt",
        "REM hello\nFUNCTION greet()\nSTRING hi\nEND_FUNCTION\nSTRINGLN abc\nLEFT\nREPEAT 2\ngreet()\n",
    );
    let output = Command::cargo_bin("hidscript")
        .unwrap()
        .args(["parse", &script])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("STRINGLN"));
    assert_eq!(stdout.lines().filter(|l| l.contains("| LEFT") || l.ends_with(" LEFT")).count(), 3);
    assert!(stdout.contains("function greet"));
}

#[test]
fn test_parse_missing_file_fails() {
    Command::cargo_bin("hidscript")
        .unwrap()
        .args(["parse", "/nonexistent/script.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse script file"));
}

#[test]
fn test_estimate_prints_milliseconds() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let script = write(dir.path(), "s.txt", "DELAY 100\nENTER\n");
    let output = Command::cargo_bin("hidscript")
        .unwrap()
        .args(["--config", &cfg, "estimate", &script])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let ms: u64 = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap();
    assert!((110..200).contains(&ms), "estimate was {ms}");
}

#[test]
fn test_estimate_scales_delays() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let script = write(dir.path(), "s.txt", "DELAY 1000\n");
    Command::cargo_bin("hidscript")
        .unwrap()
        .args(["--config", &cfg, "estimate", "--multiplier", "0.5", &script])
        .assert()
        .success()
        .stdout("500\n");
}

#[test]
fn test_bad_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let cfg = write(dir.path(), "config.json", "{ not json");
    let script = write(dir.path(), "s.txt", "DELAY 1\n");
    Command::cargo_bin("hidscript")
        .unwrap()
        .args(["--config", &cfg, "estimate", &script])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}
