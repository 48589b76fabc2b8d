//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own temporary data directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tempfile::TempDir;

fn command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_watchlimit-cli"));
    cmd.args(args)
        .env("WATCHLIMIT_DATA_DIR", dir)
        .env_remove("WATCHLIMIT_LOG");
    cmd
}

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = command(dir, args).output().expect("Failed to execute CLI command");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

fn run_ok(dir: &Path, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_cli(dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    stdout
}

fn status_json(dir: &Path) -> serde_json::Value {
    serde_json::from_str(&run_ok(dir, &["status", "--json"])).unwrap()
}

fn visit(dir: &Path, url: &str, input: &str) -> String {
    let mut child = command(dir, &["visit", url, "--title", "Terminal video"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn fresh_status_is_empty() {
    let dir = TempDir::new().unwrap();
    let state = status_json(dir.path());
    assert_eq!(state["watched"].as_array().unwrap().len(), 0);
    assert_eq!(state["dailyLimit"], 5);
    assert_eq!(state["bankCapacity"], 3);

    let text = run_ok(dir.path(), &["status"]);
    assert!(text.contains("Today: 0/5 watched"), "{text}");
}

#[test]
fn count_is_idempotent_and_capped() {
    let dir = TempDir::new().unwrap();
    assert!(run_ok(dir.path(), &["count", "a", "First"]).contains("Video added to count"));
    assert!(run_ok(dir.path(), &["count", "a", "First"]).contains("Video already counted"));
    for id in ["b", "c", "d", "e"] {
        run_ok(dir.path(), &["count", id]);
    }

    let (_, stderr, code) = run_cli(dir.path(), &["count", "f"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error: Daily limit reached"), "{stderr}");

    let state = status_json(dir.path());
    assert_eq!(state["watched"].as_array().unwrap().len(), 5);
    assert_eq!(state["watched"][1]["title"], "Unknown Video");
}

#[test]
fn bank_holds_three() {
    let dir = TempDir::new().unwrap();
    for id in ["x", "y", "z"] {
        run_ok(dir.path(), &["bank", id, "Later"]);
    }
    let (_, stderr, code) = run_cli(dir.path(), &["bank", "w"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Bank limit reached (3 videos max)"), "{stderr}");

    run_ok(dir.path(), &["unbank", "y"]);
    let state = status_json(dir.path());
    let ids: Vec<&str> = state["bank"].as_array().unwrap().iter().map(|e| e["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["x", "z"]);
}

#[test]
fn check_reports_reason() {
    let dir = TempDir::new().unwrap();
    let fresh: serde_json::Value = serde_json::from_str(&run_ok(dir.path(), &["check", "new"])).unwrap();
    assert_eq!(fresh["shouldShowOverlay"], true);
    assert_eq!(fresh["remaining"], 5);

    run_ok(dir.path(), &["count", "seen"]);
    let seen: serde_json::Value = serde_json::from_str(&run_ok(dir.path(), &["check", "seen"])).unwrap();
    assert_eq!(seen["shouldShowOverlay"], false);
    assert_eq!(seen["reason"], "alreadyWatched");

    run_ok(dir.path(), &["remove", "seen"]);
    let again: serde_json::Value = serde_json::from_str(&run_ok(dir.path(), &["check", "seen"])).unwrap();
    assert_eq!(again["shouldShowOverlay"], true);
}

#[test]
fn toggles_flip_preferences() {
    let dir = TempDir::new().unwrap();
    assert!(run_ok(dir.path(), &["toggle"]).contains("limit disabled"));
    assert!(run_ok(dir.path(), &["theme"]).contains("theme: light"));

    let check: serde_json::Value = serde_json::from_str(&run_ok(dir.path(), &["check", "v"])).unwrap();
    assert_eq!(check["reason"], "disabled");

    let state = status_json(dir.path());
    assert_eq!(state["preferences"]["enabled"], false);
}

#[test]
fn config_get_set() {
    let dir = TempDir::new().unwrap();
    assert_eq!(run_ok(dir.path(), &["config", "get", "limits.daily_limit"]).trim(), "5");
    run_ok(dir.path(), &["config", "set", "limits.daily_limit", "1"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "limits.daily_limit"]).trim(), "1");

    run_ok(dir.path(), &["count", "only"]);
    let (_, _, code) = run_cli(dir.path(), &["count", "more"]);
    assert_eq!(code, 1);

    let (_, stderr, code) = run_cli(dir.path(), &["config", "get", "limits.nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"), "{stderr}");

    for (key, value) in [("limits.daily_limit", "8"), ("limits.bank_capacity", "0")] {
        let (_, stderr, code) = run_cli(dir.path(), &["config", "set", key, value]);
        assert_eq!(code, 1, "{key}={value}");
        assert!(stderr.contains("must be between"), "{stderr}");
    }
    assert_eq!(run_ok(dir.path(), &["config", "get", "limits.daily_limit"]).trim(), "1");

    run_ok(dir.path(), &["config", "reset"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "limits.daily_limit"]).trim(), "5");
}

#[test]
fn visit_counts_from_stdin() {
    let dir = TempDir::new().unwrap();
    let out = visit(dir.path(), "https://www.youtube.com/watch?v=vis1", "y\n");
    assert!(out.contains("allowed: vis1"), "{out}");
    assert!(out.contains("Count this video? Terminal video [vis1]"), "{out}");
    assert!(out.contains("Video added to count"), "{out}");

    let state = status_json(dir.path());
    assert_eq!(state["watched"][0]["id"], "vis1");
    assert_eq!(state["watched"][0]["title"], "Terminal video");
}

#[test]
fn visit_is_blocked_when_full() {
    let dir = TempDir::new().unwrap();
    for id in ["a", "b", "c", "d", "e"] {
        run_ok(dir.path(), &["count", id]);
    }
    let out = visit(dir.path(), "https://www.youtube.com/watch?v=late", "");
    assert!(out.contains("blocked: late"), "{out}");
    assert!(out.contains("redirected to chrome-extension://watchlimit/block.html"), "{out}");
}
