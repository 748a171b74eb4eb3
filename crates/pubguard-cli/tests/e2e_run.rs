//! E2E CLI tests covering:
//! - `pubguard run` over CSV inputs in the default `input/` layout
//! - JSON notification contract and text output
//! - Error codes on stderr for missing sources and bad configuration
//! - `pubguard counters` / `pubguard clear` against a kept SQLite store
//!
//! Each test runs the `pubguard` binary as a subprocess in an isolated temp
//! directory.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

/// Build a Command targeting the pubguard binary, rooted in `dir`.
fn pg_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pubguard"));
    cmd.current_dir(dir);
    cmd.env("PUBGUARD_LOG", "error");
    cmd.env_remove("FORMAT");
    cmd
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../pubguard-core/tests/fixtures")
        .join(name)
}

/// Lay out `input/campaigns.csv` and `input/events.csv` from a fixture pair.
fn project(name: &str) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    let input = dir.path().join("input");
    fs::create_dir_all(&input).expect("mkdir input");
    fs::copy(fixture(&format!("campaigns_{name}.csv")), input.join("campaigns.csv"))
        .expect("copy campaigns");
    fs::copy(fixture(&format!("events_{name}.csv")), input.join("events.csv"))
        .expect("copy events");
    dir
}

fn run_json(dir: &Path, extra: &[&str]) -> Value {
    let output = pg_cmd(dir)
        .args(["run", "--start", "2024-02-01 00:00:00", "--json"])
        .args(extra)
        .output()
        .expect("run should not crash");
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("run --json should produce valid JSON")
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[test]
fn run_json_reports_notifications_in_order() {
    let dir = project("recovery");
    let json = run_json(dir.path(), &[]);

    assert_eq!(json["events_aggregated"], 19);
    assert_eq!(
        json["notifications"],
        json!([
            {"event": "sendMailWhitelisted", "campaign": 1, "publishers": [200]},
            {"event": "sendMailBlacklisted", "campaign": 1, "publishers": [20, 40]},
            {"event": "saveBlacklist", "campaign": 1, "publishers": [20, 40, 100]},
        ])
    );
    let campaigns = json["campaigns"].as_array().expect("campaigns array");
    assert_eq!(campaigns.len(), 2);
    assert_eq!(campaigns[0]["blacklist_delta"], json!([20, 40, 100]));
    assert_eq!(campaigns[1]["changed"], false);
}

#[test]
fn run_with_explicit_sources_and_batch_size() {
    let dir = TempDir::new().expect("tempdir");
    let campaigns = fixture("campaigns_threshold.csv");
    let events = fixture("events_threshold.csv");
    let json = run_json(
        dir.path(),
        &[
            "--campaigns",
            campaigns.to_str().expect("utf8 path"),
            "--events",
            events.to_str().expect("utf8 path"),
            "--batch-size",
            "1",
        ],
    );

    assert_eq!(
        json["notifications"],
        json!([
            {"event": "sendMailWhitelisted", "campaign": 4, "publishers": [300]},
            {"event": "saveBlacklist", "campaign": 4, "publishers": []},
        ])
    );
    assert_eq!(json["flushes"], json["increments"]);
}

#[test]
fn run_text_output_is_line_oriented() {
    let dir = project("threshold");
    pg_cmd(dir.path())
        .args(["run", "--start", "2024-02-01", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "campaign=4 blacklist=- whitelist=300 new=- saved=true",
        ))
        .stdout(predicate::str::contains(
            "notify=saveBlacklist campaign=4 publishers=-",
        ));
}

#[test]
fn config_file_supplies_defaults() {
    let dir = project("recovery");
    fs::write(
        dir.path().join("pubguard.toml"),
        "start = \"2024-02-01 00:00:00\"\nbatch_size = 1\n\n[store]\nscan_page_size = 1\n\n[evaluation]\nmeasured_scan = \"prefetch\"\n",
    )
    .expect("write config");

    let output = pg_cmd(dir.path())
        .args(["run", "--json"])
        .output()
        .expect("run should not crash");
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(
        json["notifications"][2],
        json!({"event": "saveBlacklist", "campaign": 1, "publishers": [20, 40, 100]})
    );
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn missing_event_file_exits_with_source_code() {
    let dir = TempDir::new().expect("tempdir");
    let input = dir.path().join("input");
    fs::create_dir_all(&input).expect("mkdir input");
    fs::copy(fixture("campaigns_recovery.csv"), input.join("campaigns.csv"))
        .expect("copy campaigns");

    pg_cmd(dir.path())
        .args(["run", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001: File not found"))
        .stderr(predicate::str::contains("events.csv"))
        .stdout(predicate::str::is_empty());
}

#[test]
fn malformed_row_exits_with_record_code() {
    let dir = project("recovery");
    fs::write(
        dir.path().join("input/events.csv"),
        "type,campaign_id,publisher_id,timestamp\ninstall,1,20\n",
    )
    .expect("write events");

    pg_cmd(dir.path())
        .args(["run", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001"));
}

#[test]
fn non_utf8_row_is_a_malformed_record() {
    let dir = project("recovery");
    fs::write(
        dir.path().join("input/events.csv"),
        b"type,campaign_id,publisher_id,timestamp\ninst\xffall,1,20,1706745600\n",
    )
    .expect("write events");

    pg_cmd(dir.path())
        .args(["run", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001"))
        .stderr(predicate::str::contains("events.csv:2"))
        .stderr(predicate::str::contains("File not found").not());
}

#[test]
fn bad_start_is_a_config_error_in_json() {
    let dir = project("recovery");
    let output = pg_cmd(dir.path())
        .args(["run", "--start", "next tuesday", "--json"])
        .output()
        .expect("run should not crash");
    assert!(!output.status.success());
    let json: Value = serde_json::from_slice(&output.stderr).expect("error JSON on stderr");
    assert_eq!(json["error"]["error_code"], "E1002");
}

// ---------------------------------------------------------------------------
// counters / clear
// ---------------------------------------------------------------------------

#[test]
fn kept_sqlite_counters_can_be_listed_and_cleared() {
    let dir = project("recovery");
    run_json(dir.path(), &["--store", "sqlite", "--keep-counters"]);
    assert!(dir.path().join(".pubguard/counters.sqlite3").exists());

    pg_cmd(dir.path())
        .args(["counters", "--campaign", "1", "--pattern", "install:*", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ev:1 install:20 3"))
        .stdout(predicate::str::contains("ev:1 purchase:").not());

    let output = pg_cmd(dir.path())
        .args(["counters", "--campaign", "1", "--json"])
        .output()
        .expect("counters should not crash");
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["bucket"], "ev:1");
    assert_eq!(json["counters"].as_array().expect("array").len(), 9);

    pg_cmd(dir.path())
        .args(["clear", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cleared="));

    pg_cmd(dir.path())
        .args(["counters", "--campaign", "1", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn sqlite_run_clears_counters_by_default() {
    let dir = project("threshold");
    run_json(dir.path(), &["--store", "sqlite"]);

    pg_cmd(dir.path())
        .args(["counters", "--campaign", "4", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
