use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const CONFIG: &str = r#"
log-level: DEBUG
fallback: next_provider
providers:
  - name: broken
    type: mock
    mock-script: [auth_failed]
  - name: backup
    type: mock
    cost-per-image: 0.02
  - name: dalle
    type: dalle3
    api-key: sk-very-secret
retry:
  initial-backoff-ms: 10
  max-backoff-ms: 20
queue:
  max-concurrent: 2
  poll-interval-ms: 20
  enable-rate-limiting: false
"#;

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write fixture");
    path
}

fn pg(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pg").expect("binary built");
    cmd.arg("--log-stderr").arg("--config").arg(config);
    cmd
}

#[test]
fn test_run_reports_fallback_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "panelgen.yml", CONFIG);
    let panels = write_file(
        dir.path(),
        "panels.json",
        r#"[{"panel_id": "p1", "prompt": "a cat on a roof"}, {"panel_id": "p2", "prompt": "rain", "provider": "backup"}]"#,
    );

    let output = pg(&config).arg("run").arg(&panels).output().expect("run ok");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["completed"], true);
    assert_eq!(report["status"]["total_success"], 2);
    assert_eq!(report["statistics"]["fallback_count"], 1);
    assert_eq!(report["statistics"]["providers"]["broken"]["attempts"], 1);

    let outcomes = report["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["panel_id"], "p1");
    assert_eq!(outcomes[0]["provider"], "backup");
    // Bytes are left out unless asked for
    assert!(outcomes[0]["image_bytes"].is_null());
}

#[test]
fn test_run_include_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "panelgen.yml", CONFIG);
    let panels = write_file(dir.path(), "panels.yml", "- panel_id: p1\n  prompt: a lighthouse\n");

    let output = pg(&config)
        .args(["run", "--provider", "backup", "--include-bytes"])
        .arg(&panels)
        .output()
        .expect("run ok");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let bytes = report["outcomes"][0]["image_bytes"].as_str().unwrap();
    assert!(bytes.starts_with("iVBORw0KGgo"));
}

#[test]
fn test_run_unknown_provider_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "panelgen.yml", CONFIG);
    let panels = write_file(dir.path(), "panels.yml", "- panel_id: p1\n  prompt: a lighthouse\n");

    pg(&config)
        .args(["run", "--provider", "nope"])
        .arg(&panels)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown provider: nope"));
}

#[test]
fn test_providers_listing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "panelgen.yml", CONFIG);

    pg(&config)
        .arg("providers")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fallback strategy: next_provider"))
        .stdout(predicate::str::contains("1. broken (mock)"))
        .stdout(predicate::str::contains("3. dalle (dalle3)"));

    let output = pg(&config).args(["providers", "--format", "json"]).output().unwrap();
    let infos: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(infos.as_array().unwrap().len(), 3);
    assert_eq!(infos[1]["name"], "backup");
}

#[test]
fn test_estimate_uses_provider_pricing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "panelgen.yml", CONFIG);

    pg(&config)
        .args(["estimate", "2", "--quality", "hd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Estimated cost for 2 image(s)"))
        .stdout(predicate::str::contains("backup").and(predicate::str::contains("$0.04")))
        .stdout(predicate::str::contains("$0.16"));
}

#[test]
fn test_config_redacts_inline_keys() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "panelgen.yml", CONFIG);

    pg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("name: backup"))
        .stdout(predicate::str::contains("redacted"))
        .stdout(predicate::str::contains("sk-very-secret").not());
}

#[test]
fn test_missing_panels_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_file(dir.path(), "panelgen.yml", CONFIG);

    pg(&config)
        .args(["run", "/nonexistent/panels.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read panels file"));
}
