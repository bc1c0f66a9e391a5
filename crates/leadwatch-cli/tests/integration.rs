#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use leadwatch_core::action::{ActionPayload, NewPendingAction};
use leadwatch_core::store::Store;
use leadwatch_core::types::Priority;

fn leadwatch(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("leadwatch").unwrap();
    cmd.current_dir(dir.path())
        .env("LEADWATCH_CONFIG", dir.path().join("leadwatch.yaml"))
        .env_remove("LEADWATCH_CRM_TOKEN")
        .env_remove("LEADWATCH_BOT_TOKEN")
        .env_remove("LEADWATCH_SCORER_KEY")
        .env_remove("LEADWATCH_OPERATOR_ID");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) {
    std::fs::write(dir.path().join("leadwatch.yaml"), yaml).unwrap();
}

/// Seed one pending action in the database the CLI will open.
fn seed_action(dir: &TempDir) -> i64 {
    let store = Store::open(dir.path().join("data/leadwatch.sqlite")).unwrap();
    store
        .insert_action(&NewPendingAction {
            lead_id: 12,
            payload: ActionPayload::AddNote {
                text: "Checked in".into(),
            },
            risk_score: 55,
            priority: Priority::Medium,
            reasoning: "quiet for a week".into(),
        })
        .unwrap()
        .id
}

// ---------------------------------------------------------------------------
// leadwatch config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_defaults() {
    let dir = TempDir::new().unwrap();
    leadwatch(&dir).args(["config", "init"]).assert().success();

    let content = std::fs::read_to_string(dir.path().join("leadwatch.yaml")).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&content).unwrap();
    assert_eq!(value["polling"]["batch_size"], serde_yaml::Value::from(10));
    assert_eq!(
        value["schedule"]["timezone"],
        serde_yaml::Value::from("Europe/Moscow")
    );
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "operator:\n  id: \"42\"\n");
    leadwatch(&dir)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    leadwatch(&dir)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn config_check_flags_missing_crm() {
    let dir = TempDir::new().unwrap();
    leadwatch(&dir)
        .args(["config", "check"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("crm.base_url"));
}

#[test]
fn config_check_passes_with_warnings_only() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "crm:\n  base_url: https://example.amocrm.ru\n");
    leadwatch(&dir)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("operator.id"));
}

#[test]
fn config_check_json_lists_warnings() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "crm:\n  base_url: https://example.amocrm.ru\n");
    let out = leadwatch(&dir)
        .args(["--json", "config", "check"])
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(value["warnings"].as_array().unwrap().iter().all(|w| w["level"] == "warning"));
}

// ---------------------------------------------------------------------------
// leadwatch actions
// ---------------------------------------------------------------------------

#[test]
fn actions_list_on_empty_database() {
    let dir = TempDir::new().unwrap();
    leadwatch(&dir)
        .args(["actions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No actions."));
}

#[test]
fn actions_list_shows_seeded_action() {
    let dir = TempDir::new().unwrap();
    let id = seed_action(&dir);
    let out = leadwatch(&dir)
        .args(["--json", "actions", "list"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value[0]["id"], id);
    assert_eq!(value[0]["action_type"], "add_note");
}

#[test]
fn actions_list_rejects_unknown_status() {
    let dir = TempDir::new().unwrap();
    leadwatch(&dir)
        .args(["actions", "list", "--status", "done"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown action status"));
}

#[test]
fn actions_show_missing_is_error() {
    let dir = TempDir::new().unwrap();
    leadwatch(&dir)
        .args(["actions", "show", "999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("action not found: 999"));
}

#[test]
fn reject_logs_decision_and_blocks_second_transition() {
    let dir = TempDir::new().unwrap();
    let id = seed_action(&dir);
    let id = id.to_string();

    leadwatch(&dir)
        .args(["actions", "reject", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("(rejected)"));

    leadwatch(&dir)
        .args(["actions", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("rejected"));

    leadwatch(&dir)
        .args(["actions", "snooze", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not pending"));
}

#[test]
fn approve_without_credentials_fails_before_any_change() {
    let dir = TempDir::new().unwrap();
    let id = seed_action(&dir).to_string();
    leadwatch(&dir)
        .args(["actions", "approve", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration missing"));

    leadwatch(&dir)
        .args(["--json", "actions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending\""));
}

// ---------------------------------------------------------------------------
// leadwatch scores / poll
// ---------------------------------------------------------------------------

#[test]
fn scores_for_unknown_lead_is_empty() {
    let dir = TempDir::new().unwrap();
    leadwatch(&dir)
        .args(["scores", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No scores for lead 12."));
}

#[test]
fn poll_without_crm_is_configuration_missing() {
    let dir = TempDir::new().unwrap();
    leadwatch(&dir)
        .arg("poll")
        .assert()
        .failure()
        .stderr(predicate::str::contains("crm.base_url"));
}
