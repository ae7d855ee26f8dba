//! Integration tests for the Sentra CLI
//!
//! These run the actual binary and verify output plus exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sentra_cmd() -> Command {
    Command::cargo_bin("sentra").unwrap()
}

#[test]
fn help_shows_about_line() {
    sentra_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "modular vulnerability-scan orchestration",
        ));
}

#[test]
fn modules_list_shows_builtins_and_contracts() {
    sentra_cmd()
        .args(["modules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("target_discovery"))
        .stdout(predicate::str::contains("tcp_port_scan"))
        .stdout(predicate::str::contains("discovery.live_hosts"))
        .stdout(predicate::str::contains("report.summary"));
}

#[test]
fn dag_validate_accepts_demo_file() {
    sentra_cmd()
        .args(["dag", "validate", "demos/full-scan.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn dag_validate_rejects_cycle_with_exit_2() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cycle.yaml");
    std::fs::write(
        &path,
        "name: cyclic\nnodes:\n  - id: a\n    module: target_discovery\n    depends_on: [b]\n  - id: b\n    module: target_discovery\n    depends_on: [a]\n",
    )
    .unwrap();

    sentra_cmd()
        .args(["dag", "validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("DAG_INVALID"));
}

#[test]
fn dag_validate_missing_file_exits_4() {
    sentra_cmd()
        .args(["dag", "validate", "no/such/file.yaml"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("DAG_LOAD_FAILED"));
}

#[test]
fn dag_validate_bad_extension_exits_2() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scan.txt");
    std::fs::write(&path, "name: x\n").unwrap();

    sentra_cmd()
        .args(["dag", "validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("DAG_UNSUPPORTED_FORMAT"));
}

#[test]
fn dag_order_prints_layers() {
    sentra_cmd()
        .args(["dag", "order", "demos/full-scan.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("discovery"))
        .stdout(predicate::str::contains("report"));
}

#[test]
fn dag_export_writes_a_valid_plan() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("planned.yaml");

    sentra_cmd()
        .args([
            "dag",
            "export",
            out.to_str().unwrap(),
            "--target",
            "10.0.0.1",
            "--profile",
            "full_scan",
            "--vuln-checks",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    sentra_cmd()
        .args(["dag", "validate", out.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn quick_discovery_scan_runs_and_reports() {
    sentra_cmd()
        .args([
            "scan",
            "--target",
            "127.0.0.1",
            "--profile",
            "quick_discovery",
            "--allow-loopback",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Report:"))
        .stdout(predicate::str::contains("hosts_discovered"));
}

#[test]
fn unknown_profile_is_a_config_error() {
    sentra_cmd()
        .args(["scan", "--target", "10.0.0.1", "--profile", "warp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MODULE_CONFIG_INVALID"));
}
