//! CLI integration tests for dshub
//!
//! These tests drive the binary through complete workflows: hub
//! initialization, dataset creation, versioning and publication.

use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Get a command instance for the dshub binary
fn dshub_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("dshub"));
    cmd.env("DSHUB_DOMAIN", "hub.test")
        .env("DSHUB_USER", "1")
        .env_remove("RUST_LOG");
    cmd
}

/// Create a temporary directory and initialize a hub
fn setup_hub() -> TempDir {
    let dir = TempDir::new().unwrap();
    dshub_cmd().arg("init").arg(dir.path()).assert().success();
    dir
}

/// Runs a command in the hub with JSON output and parses stdout
fn json(dir: &Path, args: &[&str]) -> serde_json::Value {
    let output = dshub_cmd()
        .current_dir(dir)
        .args(args)
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

/// Writes a CSV into the hub directory and creates a dataset from it
fn create_dataset(dir: &Path, file: &str, title: &str) -> i64 {
    fs::write(dir.join(file), "region,total\nnorth,10\nsouth,7\n").unwrap();
    let created = json(
        dir,
        &[
            "dataset",
            "create",
            "--title",
            title,
            "--description",
            "Quarterly numbers",
            "--tags",
            "retail, 2024",
            "--publication-type",
            "sales",
            file,
        ],
    );
    created["id"].as_i64().unwrap()
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_init_creates_structure() {
    let dir = TempDir::new().unwrap();

    dshub_cmd()
        .arg("init")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized dshub hub"));

    assert!(dir.path().join(".dshub").is_dir());
    assert!(dir.path().join(".dshub/registry").is_dir());
    assert!(dir.path().join(".dshub/config.toml").is_file());
    assert!(dir.path().join(".dshub/.gitignore").is_file());
    assert!(dir.path().join(".dshub/hub.db").is_file());
    assert!(dir.path().join(".dshub/registry.db").is_file());
}

#[test]
fn test_init_is_idempotent() {
    let dir = TempDir::new().unwrap();

    dshub_cmd().arg("init").arg(dir.path()).assert().success();
    dshub_cmd().arg("init").arg(dir.path()).assert().success();
}

#[test]
fn test_commands_outside_hub_fail() {
    let dir = TempDir::new().unwrap();

    dshub_cmd()
        .current_dir(dir.path())
        .args(["dataset", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not in a dshub hub"));
}

// =============================================================================
// Dataset Tests
// =============================================================================

#[test]
fn test_dataset_create_starts_at_1_0() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "sales.csv", "Sales");

    let shown = json(dir.path(), &["dataset", "show", &id.to_string()]);
    assert_eq!(shown["title"], "Sales");
    assert_eq!(shown["version"], "1.0");
    assert_eq!(shown["status"], "local");
    assert_eq!(shown["publication_type"], "sales");
    assert_eq!(shown["tags"], serde_json::json!(["retail", "2024"]));
    assert_eq!(shown["files_count"], 1);

    let stored = dir
        .path()
        .join("uploads/user_1")
        .join(format!("dataset_{}", id))
        .join("sales.csv");
    assert!(stored.is_file());
}

#[test]
fn test_dataset_create_rejects_non_csv() {
    let dir = setup_hub();
    fs::write(dir.path().join("notes.txt"), "hello").unwrap();

    dshub_cmd()
        .current_dir(dir.path())
        .args([
            "dataset",
            "create",
            "--title",
            "Notes",
            "--description",
            "Not a table",
            "notes.txt",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains(".csv"));
}

#[test]
fn test_dataset_create_rejects_unknown_publication_type() {
    let dir = setup_hub();
    fs::write(dir.path().join("a.csv"), "x\n1\n").unwrap();

    dshub_cmd()
        .current_dir(dir.path())
        .args([
            "dataset",
            "create",
            "--title",
            "A",
            "--description",
            "B",
            "--publication-type",
            "poetry",
            "a.csv",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poetry"));
}

#[test]
fn test_dataset_list_filters_by_sync_status() {
    let dir = setup_hub();
    let published = create_dataset(dir.path(), "a.csv", "Published one");
    let local = create_dataset(dir.path(), "b.csv", "Local one");

    json(dir.path(), &["publish", &published.to_string()]);

    let synced = json(dir.path(), &["dataset", "list", "--synced"]);
    let synced = synced.as_array().unwrap();
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0]["id"], published);

    let locals = json(dir.path(), &["dataset", "list", "--local"]);
    let locals = locals.as_array().unwrap();
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0]["id"], local);

    dshub_cmd()
        .current_dir(dir.path())
        .args(["dataset", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Published one"))
        .stdout(predicate::str::contains("Local one"));
}

#[test]
fn test_dataset_delete() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Doomed");

    dshub_cmd()
        .current_dir(dir.path())
        .args(["dataset", "delete", &id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted dataset"));

    dshub_cmd()
        .current_dir(dir.path())
        .args(["dataset", "show", &id.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    assert!(!dir
        .path()
        .join(format!("uploads/user_1/dataset_{}", id))
        .exists());
}

#[test]
fn test_dataset_download_counts() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");

    let receipt = json(
        dir.path(),
        &["dataset", "download", &id.to_string(), "--output", "sales.zip"],
    );
    assert_eq!(receipt["files"], 1);
    assert_eq!(receipt["downloads"], 1);
    assert!(dir.path().join("sales.zip").is_file());

    dshub_cmd()
        .current_dir(dir.path())
        .args(["dataset", "download", &id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("download #2"));
    assert!(dir.path().join(format!("dataset_{}.zip", id)).is_file());

    let shown = json(dir.path(), &["dataset", "show", &id.to_string()]);
    assert_eq!(shown["downloads"], 2);
}

// =============================================================================
// Version Tests
// =============================================================================

#[test]
fn test_version_new_on_local_dataset() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");

    let outcome = json(
        dir.path(),
        &["version", "new", &id.to_string(), "--changelog", "typo fix"],
    );
    assert_eq!(outcome["version"], "1.1");
    assert_eq!(outcome["changelog"], "typo fix");
    assert_eq!(outcome["registry"]["action"], "not_linked");
    let new_id = outcome["dataset_id"].as_i64().unwrap();
    assert_ne!(new_id, id);

    let major = json(dir.path(), &["version", "new", &new_id.to_string(), "--major"]);
    assert_eq!(major["version"], "2.0");

    let versions = json(dir.path(), &["version", "list", &id.to_string()]);
    let labels: Vec<_> = versions
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["version"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["1.0", "1.1", "2.0"]);
}

#[test]
fn test_version_new_after_publish_keeps_doi() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");

    let receipt = json(dir.path(), &["publish", &id.to_string()]);
    let doi = receipt["doi"].as_str().unwrap().to_string();
    let deposition = receipt["deposition_id"].as_i64().unwrap();
    assert!(doi.starts_with("10.5281/fakenodo."));
    assert_eq!(
        receipt["publication_doi"],
        format!("http://hub.test/doi/{}", doi)
    );

    let outcome = json(dir.path(), &["version", "new", &id.to_string()]);
    assert_eq!(outcome["version"], "1.1");
    assert_eq!(outcome["registry"]["action"], "label_updated");

    let dep = json(dir.path(), &["deposition", "show", &deposition.to_string()]);
    assert_eq!(dep["doi"], doi.as_str());
    assert_eq!(dep["metadata"]["dataset_version"], "1.1");

    let history = json(dir.path(), &["deposition", "versions", &deposition.to_string()]);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["version"], "1.0");
    assert_eq!(history[1]["version"], "1.1");
    assert_eq!(history[1]["doi"], doi.as_str());
}

#[test]
fn test_version_new_with_file_publishes_new_doi() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");
    let receipt = json(dir.path(), &["publish", &id.to_string()]);
    let first_doi = receipt["doi"].as_str().unwrap().to_string();

    fs::write(dir.path().join("a_v2.csv"), "region,total\nnorth,11\n").unwrap();
    let outcome = json(
        dir.path(),
        &["version", "new", &id.to_string(), "--major", "--file", "a_v2.csv"],
    );

    assert_eq!(outcome["version"], "2.0");
    assert_eq!(outcome["registry"]["action"], "published");
    let new_doi = outcome["registry"]["doi"].as_str().unwrap();
    assert_ne!(new_doi, first_doi);

    let new_id = outcome["dataset_id"].as_i64().unwrap();
    let shown = json(dir.path(), &["dataset", "show", &new_id.to_string()]);
    assert_eq!(shown["dataset_doi"], new_doi);
    assert_eq!(shown["files"][0]["name"], "a_v2.csv");
}

#[test]
fn test_version_new_for_missing_dataset_fails() {
    let dir = setup_hub();

    dshub_cmd()
        .current_dir(dir.path())
        .args(["version", "new", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Dataset 99 not found"));
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_publish_twice_fails() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");

    json(dir.path(), &["publish", &id.to_string()]);

    dshub_cmd()
        .current_dir(dir.path())
        .args(["publish", &id.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already synchronized"));
}

#[test]
fn test_prepare_creates_draft() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");

    let prepared = json(dir.path(), &["prepare", &id.to_string()]);
    let deposition = prepared["deposition_id"].as_i64().unwrap();

    let again = json(dir.path(), &["prepare", &id.to_string()]);
    assert_eq!(again["deposition_id"], deposition);

    let dep = json(dir.path(), &["deposition", "show", &deposition.to_string()]);
    assert_eq!(dep["status"], "draft");
    assert!(dep["doi"].is_null());
    assert_eq!(dep["metadata"]["dataset_version"], "1.0");

    let shown = json(dir.path(), &["dataset", "show", &id.to_string()]);
    assert_eq!(shown["status"], "local");
    assert_eq!(shown["deposition_id"], deposition);
}

#[test]
fn test_edit_marks_deposition_dirty() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");
    let receipt = json(dir.path(), &["publish", &id.to_string()]);
    let deposition = receipt["deposition_id"].as_i64().unwrap().to_string();

    let edited = json(
        dir.path(),
        &["dataset", "edit", &id.to_string(), "--title", "Sales (revised)"],
    );
    assert_eq!(edited["title"], "Sales (revised)");
    assert_eq!(edited["dataset_doi"], receipt["doi"]);

    let dep = json(dir.path(), &["deposition", "show", &deposition]);
    assert_eq!(dep["dirty"], true);
    assert_eq!(dep["doi"], receipt["doi"]);
    assert_eq!(dep["metadata"]["title"], "Sales (revised)");

    dshub_cmd()
        .current_dir(dir.path())
        .args(["deposition", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("published*"));
}

#[test]
fn test_edit_without_fields_fails() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");

    dshub_cmd()
        .current_dir(dir.path())
        .args(["dataset", "edit", &id.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing to update"));
}

#[test]
fn test_deposition_delete() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");
    let prepared = json(dir.path(), &["prepare", &id.to_string()]);
    let deposition = prepared["deposition_id"].as_i64().unwrap().to_string();

    dshub_cmd()
        .current_dir(dir.path())
        .args(["deposition", "delete", &deposition])
        .assert()
        .success();

    dshub_cmd()
        .current_dir(dir.path())
        .args(["deposition", "show", &deposition])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Deposition not found"));
}

#[test]
fn test_resolve_follows_superseded_doi() {
    let dir = setup_hub();
    let id = create_dataset(dir.path(), "a.csv", "Sales");
    let receipt = json(dir.path(), &["publish", &id.to_string()]);
    let first_doi = receipt["doi"].as_str().unwrap().to_string();

    fs::write(dir.path().join("a_v2.csv"), "region,total\nnorth,11\n").unwrap();
    let outcome = json(
        dir.path(),
        &["version", "new", &id.to_string(), "--major", "--file", "a_v2.csv"],
    );
    let new_doi = outcome["registry"]["doi"].as_str().unwrap().to_string();

    let old = json(dir.path(), &["resolve", &first_doi]);
    assert_eq!(old["dataset"]["id"], id);
    assert_eq!(old["deposition"]["id"], receipt["deposition_id"]);
    assert_eq!(old["superseded"], true);

    let current = json(dir.path(), &["resolve", &new_doi]);
    assert_eq!(current["dataset"]["id"], outcome["dataset_id"]);
    assert_eq!(current["superseded"], false);

    dshub_cmd()
        .current_dir(dir.path())
        .args(["resolve", &first_doi])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Superseded by: {}", new_doi)));

    dshub_cmd()
        .current_dir(dir.path())
        .args(["resolve", "10.5281/fakenodo.1000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not known"));
}
