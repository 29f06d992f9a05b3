// vim: tw=80
//! End-to-end tests that exercise the compiled `raid-ctl` binary.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &std::path::Path, kind: &str) -> PathBuf {
    let path = dir.join("array.toml");
    std::fs::write(
        &path,
        format!(
            "[array]\nkind = \"{kind}\"\n\n[[array.children]]\npath = \"{}\"\n\n[[array.children]]\npath = \"{}\"\n",
            dir.join("a.img").display(),
            dir.join("b.img").display(),
        ),
    )
    .unwrap();
    path
}

#[test]
fn create_then_status_reports_a_healthy_array() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "raid1");

    Command::cargo_bin("raid-ctl")
        .unwrap()
        .args(["create", "--config", config.to_str().unwrap(), "--size", "2097152"])
        .assert()
        .success();

    Command::cargo_bin("raid-ctl")
        .unwrap()
        .args(["status", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("raid1"))
        .stdout(predicate::str::contains("Healthy"));
}

#[test]
fn check_passes_on_a_freshly_created_array() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "raid1");

    Command::cargo_bin("raid-ctl")
        .unwrap()
        .args(["create", "--config", config.to_str().unwrap(), "--size", "2097152"])
        .assert()
        .success();

    Command::cargo_bin("raid-ctl")
        .unwrap()
        .args(["check", "--config", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn status_on_a_missing_config_file_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("nonexistent.toml");

    Command::cargo_bin("raid-ctl")
        .unwrap()
        .args(["status", "--config", config.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn create_with_wrong_child_count_for_raid1_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("array.toml");
    std::fs::write(
        &config,
        format!("[array]\nkind = \"raid1\"\n\n[[array.children]]\npath = \"{}\"\n", dir.path().join("a.img").display()),
    )
    .unwrap();

    Command::cargo_bin("raid-ctl")
        .unwrap()
        .args(["create", "--config", config.to_str().unwrap(), "--size", "2097152"])
        .assert()
        .failure()
        .code(2);
}
