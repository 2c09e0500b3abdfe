#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "NEO2COSMOS_CONFIG",
    "NEO4J_URI",
    "NEO4J_USER",
    "NEO4J_PASSWORD",
    "COSMOS_ENDPOINT",
    "COSMOS_AUTH_KEY",
    "COSMOS_GREMLIN_ENDPOINT",
    "RUST_LOG",
];

fn cli(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("neo2cosmos");
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("XDG_CONFIG_HOME", dir.join("xdg"))
        .env("HOME", dir.join("home"));
    cmd
}

fn write_snapshot(dir: &Path) -> PathBuf {
    let path = dir.join("graph.json");
    let snapshot = json!({
        "nodes": [
            {"labels": ["Person"], "id": 1, "properties": {"name": "Alice"}},
            {"labels": ["Person"], "id": 2, "properties": {"name": "Bob"}}
        ],
        "relationships": [
            {"type": "KNOWS", "startNodeId": 1, "endNodeId": 2, "properties": {"since": "2020"}}
        ]
    });
    fs::write(&path, serde_json::to_vec_pretty(&snapshot).expect("encode")).expect("write");
    path
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    fs::write(
        &path,
        r#"
[source]
uri = "bolt://localhost:7687"
user = "neo4j"
password = "hunter2"

[destination]
endpoint = "https://acct.documents.azure.com:443/"
auth_key = "c2VjcmV0LWtleQ=="
collection = "People"

[migration]
workers = 2
"#,
    )
    .expect("write config");
    path
}

#[test]
fn plan_prints_statements_in_phase_order() {
    let dir = TempDir::new().expect("tempdir");
    let snapshot = write_snapshot(dir.path());
    let output = cli(dir.path())
        .args(["--quiet", "plan", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "g.addV('Person').property('id','1').property('name','Alice')",
            "g.addV('Person').property('id','2').property('name','Bob')",
            "g.V('1').addE('KNOWS').property('since','2020').to(g.V('2'))",
        ]
    );
}

#[test]
fn plan_emits_json() {
    let dir = TempDir::new().expect("tempdir");
    let snapshot = write_snapshot(dir.path());
    let output = cli(dir.path())
        .args(["--format", "json", "plan", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["vertices"].as_array().map(Vec::len), Some(2));
    assert_eq!(
        json["edges"][0],
        "g.V('1').addE('KNOWS').property('since','2020').to(g.V('2'))"
    );
}

#[test]
fn dry_run_migration_reports_both_phases() {
    let dir = TempDir::new().expect("tempdir");
    let snapshot = write_snapshot(dir.path());
    let output = cli(dir.path())
        .args(["--format", "json", "migrate", "--dry-run", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["vertices"]["total"], 2);
    assert_eq!(json["vertices"]["executed"], 2);
    assert_eq!(json["edges"]["executed"], 1);
    assert!(json["duration_ms"].is_number());
}

#[test]
fn dry_run_fails_on_unlabeled_nodes() {
    let dir = TempDir::new().expect("tempdir");
    let snapshot = dir.path().join("bad.json");
    fs::write(&snapshot, r#"{"nodes": [{"labels": [], "id": "1"}]}"#).expect("write");
    let output = cli(dir.path())
        .args(["migrate", "--dry-run", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("has no labels"), "stderr: {stderr}");
}

#[test]
fn config_show_masks_secrets() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(dir.path());
    let output = cli(dir.path())
        .args(["--format", "json", "config", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["source.password"], "********");
    assert_eq!(json["destination.auth_key"], "********");
    assert_eq!(json["destination.collection"], "People");
    assert_eq!(json["destination.database"], "graphdb");
    assert_eq!(
        json["destination.gremlin_endpoint"],
        "wss://acct.gremlin.cosmos.azure.com:443/"
    );
    assert_eq!(json["migration.workers"], "2");
    let raw = String::from_utf8_lossy(&output);
    assert!(!raw.contains("hunter2"));
}

#[test]
fn flags_override_the_config_file() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_config(dir.path());
    let output = cli(dir.path())
        .args(["--format", "json", "--collection", "Override", "config", "show"])
        .arg("--config")
        .arg(&config)
        .env("NEO4J_USER", "reader")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["destination.collection"], "Override");
    assert_eq!(json["source.user"], "reader");
}

#[test]
fn missing_explicit_config_fails() {
    let dir = TempDir::new().expect("tempdir");
    cli(dir.path())
        .args(["config", "show", "--config"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .code(1);
}

#[test]
fn migrate_without_destination_settings_fails() {
    let dir = TempDir::new().expect("tempdir");
    let snapshot = write_snapshot(dir.path());
    let output = cli(dir.path())
        .args(["migrate", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(
        stderr.contains("missing required setting 'destination.endpoint'"),
        "stderr: {stderr}"
    );
}
