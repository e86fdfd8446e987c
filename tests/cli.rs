//! Integration tests for the `kkmop` binary.
//!
//! Every invocation runs against the bundled emulator with its own config,
//! device registry and log directory, so tests never touch real hardware or
//! the user's data directory.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const SERIAL: &str = "00106700000001";

// ── Helpers ─────────────────────────────────────────────────────────

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = serde_json::json!({
            "dbDirectory": dir.path().join("db"),
            "cliOperator": { "name": "Night Shift" },
        });
        std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
        Self { dir }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.json")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("kkmop");
        cmd.env("KKM_CONFIG", self.config_path())
            .env("KKM_LOG_DIR", self.dir.path().join("logs"))
            .env_remove("KKM_EMULATE_SERIAL")
            .env_remove("RUST_LOG");
        cmd
    }

    fn learned(self) -> Self {
        self.cmd().args(["learn", "com,3"]).assert().success();
        self
    }
}

fn answer(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn descriptor_file(db: &Path) -> PathBuf {
    db.join(format!("{SERIAL}.json"))
}

const SALE: &str = r#"{
    "operator": { "name": "Jane Cashier" },
    "items": [{ "title": "Tea", "price": 150, "quantity": 2, "tax": "vat20" }],
    "payment": { "type": "cash", "sum": "auto" }
}"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let env = Env::new();
    let output = env.cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "Expected 'Usage' in:\n{stderr}");
}

#[test]
fn test_help_lists_commands() {
    Env::new().cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("receipts")
            .and(predicate::str::contains("learn"))
            .and(predicate::str::contains("close-shift"))
            .and(predicate::str::contains("full-status")),
    );
}

#[test]
fn test_version_reports_build_info() {
    let output = Env::new().cmd().arg("version").output().unwrap();
    assert!(output.status.success());
    let json = answer(&output);
    assert_eq!(json["success"], true);
    assert_eq!(json["name"], "kkm-gateway");
    assert!(json["gitSha"].is_string());
}

#[test]
fn test_show_config_uses_config_file() {
    let env = Env::new();
    let output = env.cmd().arg("show-config").output().unwrap();
    assert!(output.status.success());
    let json = answer(&output);
    assert_eq!(json["config"]["cliOperator"]["name"], "Night Shift");
    assert_eq!(json["config"]["driver"], "emulator");
    assert_eq!(
        json["config"]["dbDirectory"].as_str().map(PathBuf::from),
        Some(env.db())
    );
}

#[test]
fn test_unreadable_config_fails_with_json() {
    let env = Env::new();
    env.cmd()
        .args(["--config", "/nonexistent/kkm.json", "show-config"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed to load config"));
}

// ── Learning ────────────────────────────────────────────────────────

#[test]
fn test_learn_saves_descriptor() {
    let env = Env::new();
    let output = env.cmd().args(["learn", "com,3"]).output().unwrap();
    assert!(output.status.success());
    let json = answer(&output);
    assert_eq!(json["status"]["serialNumber"], SERIAL);
    assert!(descriptor_file(&env.db()).is_file());
}

#[test]
fn test_learn_reports_bad_descriptor() {
    let env = Env::new();
    let output = env
        .cmd()
        .args(["learn", "com,3", "bogus"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let json = answer(&output);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Invalid connection parameters");
    assert!(descriptor_file(&env.db()).is_file());
}

// ── Device commands ─────────────────────────────────────────────────

#[test]
fn test_unknown_serial_fails() {
    Env::new()
        .cmd()
        .args(["base-status", "00000000000000"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("not found"));
}

#[test]
fn test_status_after_learn() {
    let env = Env::new().learned();
    let output = env.cmd().args(["status", SERIAL]).output().unwrap();
    assert!(output.status.success());
    let json = answer(&output);
    assert!(json["shiftState"].is_object());
    assert!(json["cashStat"].is_object());
    assert!(json.get("fwVersions").is_none());
}

#[test]
fn test_other_emulated_serial_is_rejected() {
    let env = Env::new().learned();
    env.cmd()
        .args(["--emulate-serial", "00106700000002", "base-status", SERIAL])
        .assert()
        .failure()
        .stdout(predicate::str::contains("expected SN: 00106700000001"));
}

#[test]
fn test_sell_from_argument_and_stdin() {
    let env = Env::new().learned();
    env.cmd()
        .args(["sell", SERIAL, SALE])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"));
    env.cmd()
        .args(["sell-return", SERIAL, "-"])
        .write_stdin(SALE)
        .assert()
        .success();
}

#[test]
fn test_invalid_payload_is_rejected() {
    let env = Env::new().learned();
    env.cmd()
        .args(["sell", SERIAL, "{not json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Payload is not valid JSON"));
    env.cmd()
        .args(["sell", SERIAL, r#"{ "operator": { "name": "Jane" }, "items": [] }"#])
        .assert()
        .failure();
}

#[test]
fn test_cash_out_of_empty_drawer_fails() {
    let env = Env::new().learned();
    let payload = r#"{ "operator": { "name": "Jane Cashier" }, "cashSum": 100 }"#;
    env.cmd()
        .args(["cash-out", SERIAL, payload])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Not enough cash in drawer"));
    env.cmd().args(["cash-in", SERIAL, payload]).assert().success();
}

#[test]
fn test_shift_commands() {
    let env = Env::new().learned();
    for command in ["report-x", "close-shift", "report-z", "reset-state", "demo-print"] {
        env.cmd()
            .args([command, SERIAL])
            .assert()
            .success();
    }
}

#[test]
fn test_print_document() {
    let env = Env::new().learned();
    let doc = r#"{ "document": [{ "content": "Thank you", "center": true }] }"#;
    env.cmd().args(["print-doc", SERIAL, doc]).assert().success();
    env.cmd()
        .args(["print-doc", SERIAL, "{}"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Required valid property 'document'"));
}

#[test]
fn test_logs_go_to_log_dir() {
    let env = Env::new();
    env.cmd().arg("show-config").assert().success();
    let logs = env.dir.path().join("logs");
    let entries: Vec<_> = std::fs::read_dir(&logs).unwrap().flatten().collect();
    assert!(!entries.is_empty());
}
