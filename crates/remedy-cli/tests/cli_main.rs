//! Basic CLI tests for the remedy command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn remedy(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("remedy").unwrap();
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("remedy").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("autonomous remediation"))
        .stdout(predicate::str::contains("decide"))
        .stdout(predicate::str::contains("evaluate"))
        .stdout(predicate::str::contains("sweep"))
        .stdout(predicate::str::contains("guardrails"))
        .stdout(predicate::str::contains("approve"));
}

/// Test that the CLI shows version information.
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("remedy").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("remedy"));
}

/// Test that providing no subcommand shows an error.
#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("remedy").unwrap();
    cmd.assert().failure().code(2);
}

#[test]
fn test_reject_requires_reason() {
    let mut cmd = Command::cargo_bin("remedy").unwrap();
    cmd.arg("reject").arg("some-id");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--reason"));
}

#[test]
fn test_seed_and_list_guardrails() {
    let dir = TempDir::new().unwrap();

    remedy(&dir)
        .args(["guardrails", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("built-in defaults apply"));

    remedy(&dir)
        .args(["guardrails", "seed-defaults"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Seeded 5 default guardrail(s)."));

    remedy(&dir)
        .args(["guardrails", "seed-defaults"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Seeded 0 default guardrail(s)."));

    remedy(&dir)
        .args(["guardrails", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PRIO"))
        .stdout(predicate::str::contains("deny"));
}

#[test]
fn test_policy_reset_then_show() {
    let dir = TempDir::new().unwrap();

    remedy(&dir)
        .args(["policy", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No policy stored yet"));

    remedy(&dir)
        .args(["policy", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cold start (v0)"));

    remedy(&dir)
        .args(["policy", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cold start (v1)"));

    remedy(&dir)
        .args(["policy", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Policy v1 (0 samples"));
}

#[test]
fn test_ticks_on_empty_database() {
    let dir = TempDir::new().unwrap();

    remedy(&dir)
        .arg("decide")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"result\""));

    remedy(&dir)
        .arg("evaluate")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing_to_do"));

    remedy(&dir)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"expired\": []"));
}

#[test]
fn test_decide_with_telemetry_file_records_audit() {
    let dir = TempDir::new().unwrap();
    let telemetry = dir.path().join("telemetry.json");
    std::fs::write(
        &telemetry,
        r#"{
            "totals": {"calls_24h": 40000, "errors_24h": 4000, "p95_ms": 2400.0},
            "anomalies": [{"ts": "2026-10-14T09:00:00Z", "severity": "high",
                           "metric": "error_rate", "score": 5.0}],
            "components": [{"name": "checkout-fn", "error_rate": 0.1}],
            "forecast_trend": 0.5
        }"#,
    )
    .unwrap();

    remedy(&dir)
        .arg("--telemetry")
        .arg(&telemetry)
        .arg("decide")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"started_at\""));

    remedy(&dir).arg("jobs").assert().success();
    remedy(&dir)
        .args(["decisions", "list", "--limit", "5"])
        .assert()
        .success();
}

#[test]
fn test_approve_unknown_decision_fails() {
    let dir = TempDir::new().unwrap();

    remedy(&dir)
        .args(["approve", "does-not-exist", "--by", "alice"])
        .assert()
        .failure();
}
