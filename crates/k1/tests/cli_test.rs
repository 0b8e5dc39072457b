#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A `k1` command isolated in its own workspace root with no tokens set.
fn k1(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("k1").unwrap();
    cmd.env("K1_HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("K1_CONFIG_PATH")
        .env_remove("K1_LOG_LEVEL")
        .env_remove("CIVO_TOKEN")
        .env_remove("GITHUB_TOKEN")
        .env_remove("GITLAB_TOKEN")
        .env_remove("K1_GITOPS_TEMPLATE_URL")
        .env_remove("K1_GITOPS_TEMPLATE_BRANCH");
    cmd
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("civo"))
        .stdout(predicate::str::contains("k3d"))
        .stdout(predicate::str::contains("--output"));
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("k1 "));
}

#[test]
fn test_create_help_lists_flags() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .args(["civo", "create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--cluster-name"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--gitops-template-branch"));
}

#[test]
fn test_create_requires_cluster_name() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .args(["civo", "create", "--git-owner", "acme"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--cluster-name"));
}

#[test]
fn test_missing_token_fails_first_step() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .args([
            "--output",
            "quiet",
            "civo",
            "create",
            "--cluster-name",
            "kf",
            "--domain-name",
            "example.test",
            "--cloud-region",
            "NYC1",
            "--git-owner",
            "acme",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cloud-credentials"))
        .stderr(predicate::str::contains("precondition"))
        .stderr(predicate::str::contains("CIVO_TOKEN"))
        .stderr(predicate::str::contains("to resume"));
}

#[test]
fn test_template_url_without_branch_is_rejected() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .args([
            "k3d",
            "create",
            "--cluster-name",
            "kf",
            "--git-owner",
            "acme",
            "--gitops-template-url",
            "https://github.com/acme/templates.git",
        ])
        .assert()
        .failure();
}

#[test]
fn test_dry_run_changes_nothing() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .args([
            "--output",
            "quiet",
            "k3d",
            "create",
            "--cluster-name",
            "kf",
            "--git-owner",
            "acme",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("would run  local-credentials"))
        .stdout(predicate::str::contains("create-k3d-cluster"));
    assert!(!home.path().join("kf").join("gitops").exists());
}

#[test]
fn test_json_output_streams_events() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .args([
            "--output",
            "json",
            "k3d",
            "destroy",
            "--cluster-name",
            "kf",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"step_key\":\"reset-workspace\""));
    assert!(home.path().join("logs").join("k1.log").exists());
}

#[test]
fn test_destroy_of_unknown_cluster_succeeds() {
    let home = TempDir::new().unwrap();
    k1(&home)
        .args(["--output", "quiet", "k3d", "destroy", "--cluster-name", "kf"])
        .assert()
        .success()
        .stdout(predicate::str::contains("destroyed"));
    assert!(!home.path().join("kf").exists());
}
