//! Smoke tests -- verify the binary runs and key subcommands work end to end.

use assert_cmd::Command;
use predicates::prelude::*;

fn cli(db: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("clinicflow").unwrap();
    cmd.env_remove("CLINICFLOW_CONFIG")
        .env("RUST_LOG", "warn")
        .arg("--db")
        .arg(db);
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("clinicflow")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Deferred flow execution"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("clinicflow")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("clinicflow"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("clinicflow")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_schedule_rejects_unknown_unit() {
    let dir = tempfile::tempdir().unwrap();
    cli(&dir.path().join("cf.db"))
        .args([
            "schedule",
            "add",
            "--flow",
            "7d7c4a57-2a8f-4a4e-9a51-3f0b7d3c1a10",
            "--patient",
            "1b0e6a7c-0f5e-4a4b-8d7e-2f1f0d9c6b22",
            "--amount",
            "2",
            "--unit",
            "months",
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("invalid delay unit"));
}

#[test]
fn test_import_schedule_list_and_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cf.db");
    let flow_file = dir.path().join("flow.json");
    std::fs::write(
        &flow_file,
        r#"{"nodes":[{"id":"start-1","type":"start"},{"id":"msg","type":"message"}],"edges":[]}"#,
    )
    .unwrap();
    let flow_id = "7d7c4a57-2a8f-4a4e-9a51-3f0b7d3c1a10";

    cli(&db)
        .args(["flow", "import", "--name", "Follow-up", "--id", flow_id, "--file"])
        .arg(&flow_file)
        .assert()
        .success()
        .stdout(predicates::str::contains("start node 'start-1'"));

    let out = cli(&db)
        .args([
            "schedule",
            "add",
            "--flow",
            flow_id,
            "--patient",
            "1b0e6a7c-0f5e-4a4b-8d7e-2f1f0d9c6b22",
            "--amount",
            "3",
            "--unit",
            "days",
        ])
        .assert()
        .success()
        .stdout(predicates::str::starts_with("Schedule "))
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(out).unwrap();
    let id = stdout.split_whitespace().nth(1).unwrap().to_string();

    cli(&db)
        .args(["schedule", "list", "--status", "pending"])
        .assert()
        .success()
        .stdout(predicates::str::contains(id.as_str()).and(predicates::str::contains("3 days")));

    cli(&db)
        .args(["schedule", "cancel", &id])
        .assert()
        .success()
        .stdout(predicates::str::contains("cancelled"));

    cli(&db)
        .args(["schedule", "list", "--status", "pending"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No schedules found."));
}
