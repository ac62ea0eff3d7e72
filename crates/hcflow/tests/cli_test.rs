#![allow(deprecated)] // TODO: move from cargo_bin to the cargo_bin_cmd! macro

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const DNAT_MANIFEST: &str = r#"
provider "huaweicloud" {
    region "ap-southeast-1"
    project-id "proj"
}

dnat-rule "web" {
    nat-gateway-id "gw-1"
    floating-ip-id "eip-1"
    protocol "tcp"
    private-ip "192.168.0.10"
    internal-service-port 80
    external-service-port 8080
}
"#;

const STATE: &str = r#"{
  "version": 1,
  "updated_at": "2026-01-05T10:00:00Z",
  "resources": {
    "rds_instance.main": {
      "id": "inst-1",
      "resource_type": "rds_instance",
      "config": {"name": "orders-db", "db": {"type": "MySQL", "password": "Sup3rSecret!"}},
      "status": "ACTIVE",
      "created_at": "2026-01-05T10:00:00Z",
      "updated_at": "2026-01-05T10:00:00Z"
    }
  }
}"#;

fn hcf(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hcf").unwrap();
    cmd.current_dir(dir)
        .env_remove("HCFLOW_FILE")
        .env_remove("HW_REGION_NAME")
        .env_remove("HW_PROJECT_ID")
        .env_remove("HW_AUTH_TOKEN");
    cmd
}

fn project(manifest: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hcflow.kdl"), manifest).unwrap();
    dir
}

fn write_state(dir: &Path) {
    std::fs::create_dir_all(dir.join(".hcflow")).unwrap();
    std::fs::write(dir.join(".hcflow/state.json"), STATE).unwrap();
}

/// Help lists every subcommand
#[test]
fn test_cli_help() {
    let dir = tempfile::tempdir().unwrap();
    hcf(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("show"));
}

#[test]
fn test_cli_version() {
    let dir = tempfile::tempdir().unwrap();
    hcf(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hcflow"));
}

#[test]
fn test_plan_empty_manifest() {
    let dir = project("");
    hcf(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

/// Planning needs no credentials
#[test]
fn test_plan_lists_creations() {
    let dir = project(DNAT_MANIFEST);
    hcf(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("create nat_dnat_rule.web"))
        .stdout(predicate::str::contains("1 to create"));
}

#[test]
fn test_plan_with_file_flag() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("infra")).unwrap();
    std::fs::write(dir.path().join("infra/prod.kdl"), DNAT_MANIFEST).unwrap();
    hcf(dir.path())
        .args(["plan", "-f", "infra/prod.kdl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nat_dnat_rule.web"));
}

#[test]
fn test_plan_deletes_undeclared_resources() {
    let dir = project("");
    write_state(dir.path());
    hcf(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("delete rds_instance.main"));
}

#[test]
fn test_invalid_manifest() {
    let dir = project(r#"dnat-rule "web" { protocol "tcp" }"#);
    hcf(dir.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid manifest"))
        .stderr(predicate::str::contains("nat_dnat_rule.web"));
}

#[test]
fn test_missing_manifest() {
    let dir = tempfile::tempdir().unwrap();
    hcf(dir.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read manifest"));
}

#[test]
fn test_apply_without_changes() {
    let dir = project("");
    hcf(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
    assert!(!dir.path().join(".hcflow/lock.json").exists());
}

#[test]
fn test_apply_requires_token() {
    let dir = project(DNAT_MANIFEST);
    hcf(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HW_AUTH_TOKEN"));
    assert!(!dir.path().join(".hcflow/lock.json").exists());
}

#[test]
fn test_apply_can_be_cancelled() {
    let dir = project(DNAT_MANIFEST);
    hcf(dir.path())
        .arg("apply")
        .write_stdin("no\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Apply cancelled"));
}

#[test]
fn test_destroy_empty_state() {
    let dir = project("");
    hcf(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to destroy"));
}

#[test]
fn test_show_without_state() {
    let dir = tempfile::tempdir().unwrap();
    hcf(dir.path())
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("No resources in state"));
}

#[test]
fn test_show_lists_and_redacts() {
    let dir = project("");
    write_state(dir.path());

    hcf(dir.path())
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("rds_instance.main"))
        .stdout(predicate::str::contains("inst-1"));

    hcf(dir.path())
        .args(["show", "rds_instance.main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("orders-db"))
        .stdout(predicate::str::contains("(sensitive)"))
        .stdout(predicate::str::contains("Sup3rSecret!").not());
}

#[test]
fn test_show_unknown_address() {
    let dir = project("");
    write_state(dir.path());
    hcf(dir.path())
        .args(["show", "cce_addon.missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cce_addon.missing is not in the state"));
}
