//! CLI Argument Parsing Compatibility Tests for uustat
//!
//! These tests verify that command-line arguments are parsed correctly and maintain
//! backward compatibility. The focus is on ensuring that argument values, aliases,
//! and formats continue to work as expected across versions.

use assert_cmd::Command;

#[test]
fn test_help_runs() {
    Command::cargo_bin("uustat")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn test_version_runs() {
    Command::cargo_bin("uustat")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

// ============================================================================
// Layout Argument Parsing Tests
// ============================================================================

#[test]
fn test_every_layout_is_accepted() {
    for layout in ["v2", "bsd42", "bsd43", "hdb", "svr4", "ultrix", "taylor"] {
        Command::cargo_bin("uustat")
            .unwrap()
            .args(["--layout", layout, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_unknown_layout_rejected() {
    Command::cargo_bin("uustat")
        .unwrap()
        .args(["--layout", "qnx", "--help"])
        .assert()
        .failure();
}

// ============================================================================
// Job Selection Tests
// ============================================================================

#[test]
fn test_all_and_system_conflict() {
    Command::cargo_bin("uustat")
        .unwrap()
        .args(["-a", "-s", "foo"])
        .assert()
        .failure();
}

#[test]
fn test_kill_requires_value() {
    Command::cargo_bin("uustat")
        .unwrap()
        .arg("-k")
        .assert()
        .failure();
}

#[test]
fn test_repeated_kill_and_rejuvenate() {
    Command::cargo_bin("uustat")
        .unwrap()
        .args(["-k", "a.N0001", "-k", "a.N0002", "-r", "b.N0003", "--help"])
        .assert()
        .success();
}

#[test]
fn test_long_flags() {
    Command::cargo_bin("uustat")
        .unwrap()
        .args([
            "--all",
            "--json",
            "--spool-dir",
            "/tmp",
            "--lock-dir",
            "/tmp",
            "--local-name",
            "local7",
            "--help",
        ])
        .assert()
        .success();
}

// ============================================================================
// Output Flag Tests
// ============================================================================

#[test]
fn test_verbose_counts() {
    Command::cargo_bin("uustat")
        .unwrap()
        .args(["-vvv", "--help"])
        .assert()
        .success();
}

#[test]
fn test_max_workers_numeric() {
    Command::cargo_bin("uustat")
        .unwrap()
        .args(["--max-workers", "abc", "--help"])
        .assert()
        .failure();
}
