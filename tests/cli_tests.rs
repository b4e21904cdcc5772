//! CLI integration tests using assert_cmd.
//!
//! These tests invoke the actual `cjr` binary and verify its output. None of
//! them reach a real platform: commands that would need one are pointed at a
//! binary that does not exist.

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn cjr_cmd() -> Command {
    let mut cmd = Command::cargo_bin("cjr").expect("binary should exist");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Config file whose platform CLI cannot be found.
fn unreachable_platform_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("cjr.json");
    std::fs::write(
        &path,
        r#"{"project_id": "acme", "gcloud_bin": "cjr-test-missing-gcloud", "docker_bin": "cjr-test-missing-docker"}"#,
    )
    .expect("write config");
    path
}

#[test]
fn test_version_flag() {
    cjr_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_help_flag() {
    cjr_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cloud Job Runner"))
        .stdout(predicate::str::contains("hash"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("execute"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_execute_help_shows_options() {
    cjr_cmd()
        .args(["execute", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-wait"))
        .stdout(predicate::str::contains("--tasks"));
}

#[test]
fn test_deploy_help_shows_options() {
    cjr_cmd()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--context"))
        .stdout(predicate::str::contains("--local"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cjr_cmd()
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_hash_prints_twelve_hex_chars() {
    let tmp = tempfile::tempdir().expect("tempdir");
    std::fs::write(tmp.path().join("run"), "#!/bin/sh\necho hi\n").expect("write");

    let output = cjr_cmd()
        .arg("hash")
        .arg(tmp.path())
        .output()
        .expect("run cjr");
    assert!(output.status.success());
    let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert_eq!(tag.len(), 12);
    assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));

    // Same context, same tag
    cjr_cmd()
        .arg("hash")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(tag));
}

#[test]
fn test_hash_missing_dir_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    cjr_cmd()
        .arg("hash")
        .arg(tmp.path().join("missing"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not a directory"));
}

#[test]
fn test_missing_config_file_fails() {
    let tmp = tempfile::tempdir().expect("tempdir");
    cjr_cmd()
        .arg("--config")
        .arg(tmp.path().join("nope.json"))
        .args(["status", "e1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_deploy_without_platform_cli_is_setup_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = unreachable_platform_config(tmp.path());
    let context = tmp.path().join("ctx");
    std::fs::create_dir(&context).expect("mkdir");
    std::fs::write(context.join("run"), "echo").expect("write");

    cjr_cmd()
        .arg("--config")
        .arg(&config)
        .args(["deploy", "export-users", "--context"])
        .arg(&context)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Setup error"));
}

#[test]
fn test_execute_without_platform_cli_is_launch_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = unreachable_platform_config(tmp.path());

    cjr_cmd()
        .arg("--config")
        .arg(&config)
        .args(["execute", "export-users", "--", "--format", "csv"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Launch failed"));
}
