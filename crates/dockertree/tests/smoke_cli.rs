//! CLI smoke tests: argument surface and offline failure modes.

use assert_cmd::Command;
use predicates::prelude::*;

fn dockertree() -> Command {
    Command::cargo_bin("dockertree").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    dockertree()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("volumes"))
        .stdout(predicate::str::contains("proxy"))
        .stdout(predicate::str::contains("packages"))
        .stdout(predicate::str::contains("push"));
}

#[test]
fn test_version() {
    dockertree()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dockertree"));
}

#[test]
fn test_unknown_subcommand_fails() {
    dockertree().arg("no-such-command").assert().failure();
}

#[test]
fn test_create_requires_branch() {
    dockertree().arg("create").assert().failure();
}

#[test]
fn test_volumes_help() {
    dockertree()
        .args(["volumes", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup"))
        .stdout(predicate::str::contains("restore"))
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("size"));
}

#[test]
fn test_packages_validate_missing_file_fails_with_json_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    dockertree()
        .current_dir(tmp.path())
        .args(["--json", "packages", "validate", "missing.tar.gz"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"success\":false"))
        .stdout(predicate::str::contains("not_found"));
}

#[test]
fn test_packages_list_empty_dir() {
    let tmp = tempfile::TempDir::new().unwrap();
    dockertree()
        .current_dir(tmp.path())
        .args(["--json", "packages", "list", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\":true"));
}

#[test]
fn test_domain_and_ip_flags_conflict() {
    dockertree()
        .args([
            "packages",
            "import",
            "p.tar.gz",
            "--domain",
            "a.example.com",
            "--ip",
            "203.0.113.9",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
