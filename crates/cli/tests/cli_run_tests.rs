#![allow(deprecated)] // cargo_bin is deprecated but still functional

mod common;

use assert_cmd::Command;
use common::{CLEAN, NO_MD5, workspace};
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;

fn rodwatch() -> Command {
    let mut cmd = Command::cargo_bin("rodwatch").unwrap();
    cmd.env_remove("RODWATCH_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    rodwatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("check"))
        .stdout(contains("repair"));
}

#[test]
fn clean_tree_passes() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--config"])
        .arg(&ws.config)
        .args(["--print-pass", "/testZone/home/clean.txt"])
        .assert()
        .success()
        .stdout(format!("{CLEAN}\n"));
}

#[test]
fn violations_fail_the_check() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--config"])
        .arg(&ws.config)
        .args(["--recursive", "--print-fail", "/testZone"])
        .assert()
        .failure()
        .code(1)
        .stdout(format!("{NO_MD5}\n"))
        .stderr(contains("metadata_missing=1"));
}

#[test]
fn non_recursive_check_skips_sub_collections() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--config"])
        .arg(&ws.config)
        .args(["--print-pass", "--print-fail", "/testZone/home"])
        .assert()
        .success()
        .stdout(format!("{CLEAN}\n"));
}

#[test]
fn repair_writes_json_report() {
    let ws = workspace();
    let report = ws.path("report.json");
    rodwatch()
        .args(["repair", "--config"])
        .arg(&ws.config)
        .arg("--report")
        .arg(&report)
        .args(["-r", "/testZone"])
        .assert()
        .success()
        .stderr(contains("1 succeeded"));

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(value["mode"], "repair");
    assert_eq!(value["totals"]["objects_scanned"], 2);
    assert_eq!(value["totals"]["repairs_succeeded"], 1);
    assert_eq!(
        value["objects"][NO_MD5]["repairs"][0]["outcome"]["status"],
        "succeeded"
    );
}

#[test]
fn dry_run_repair_leaves_violations_unrepaired() {
    let ws = workspace();
    rodwatch()
        .args(["repair", "--dry-run", "--config"])
        .arg(&ws.config)
        .args(["-r", "--print-fail", "/testZone"])
        .assert()
        .failure()
        .stdout(format!("{NO_MD5}\n"))
        .stderr(contains("1 skipped"));
}

#[test]
fn paths_are_read_from_stdin() {
    let ws = workspace();
    let output = ws.path("passed.txt");
    rodwatch()
        .args(["check", "--config"])
        .arg(&ws.config)
        .args(["--input", "-", "--print-pass", "--output"])
        .arg(&output)
        .write_stdin(format!("# objects\n{CLEAN}\n\n"))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert_eq!(fs::read_to_string(&output).unwrap(), format!("{CLEAN}\n"));
}

#[test]
fn selected_checks_only() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--checks", "replicas,consent", "--config"])
        .arg(&ws.config)
        .args(["-r", "/testZone"])
        .assert()
        .success();
}

#[test]
fn raised_replica_count_is_reported() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--num-replicas", "3", "--config"])
        .arg(&ws.config)
        .args(["-r", "--print-fail", "/testZone"])
        .assert()
        .failure()
        .stdout(contains(CLEAN))
        .stderr(contains("replica_count_wrong=2"));
}

#[test]
fn missing_root_is_a_failure() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--config"])
        .arg(&ws.config)
        .arg("/otherZone")
        .assert()
        .failure()
        .stderr(contains("could not list /otherZone"));
}

#[test]
fn zero_threads_is_rejected() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--threads", "0", "--config"])
        .arg(&ws.config)
        .arg("/testZone")
        .assert()
        .failure()
        .stderr(contains("num_threads"));
}

#[test]
fn roots_are_required() {
    let ws = workspace();
    rodwatch()
        .args(["check", "--config"])
        .arg(&ws.config)
        .assert()
        .failure()
        .stderr(contains("no root paths provided"));
}

#[test]
fn unknown_check_is_rejected() {
    rodwatch()
        .args(["check", "--checks", "everything", "/testZone"])
        .assert()
        .failure()
        .stderr(contains("unknown check"));
}
