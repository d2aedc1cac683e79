//! End-to-end tests of the `study` binary against a temporary workspace.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("inbox")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/study.sqlite"

[chunking]
chunk_size = 500
chunk_overlap = 50

[ambient]
watch_directory = "{root}/inbox"
manifest_file = "{root}/inbox/.processed_manifest.md"
log_file = "{root}/inbox/.ambient_log.jsonl"

[memory]
path = "{root}/inbox/.agent_memory.md"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("study.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_study(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_study"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run study binary");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn init_creates_workspace_files() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_study(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/study.sqlite").exists());
    assert!(tmp.path().join("inbox/.processed_manifest.md").exists());

    let memory = fs::read_to_string(tmp.path().join("inbox/.agent_memory.md")).unwrap();
    assert!(memory.contains("## Recent Activity"));
    assert!(memory.contains("init: Created study workspace"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, first) = run_study(&config_path, &["init"]);
    let (_, _, second) = run_study(&config_path, &["init"]);
    assert!(first && second);
}

#[test]
fn empty_workspace_listings() {
    let (_tmp, config_path) = setup_test_env();
    run_study(&config_path, &["init"]);

    let (stdout, _, success) = run_study(&config_path, &["collections"]);
    assert!(success);
    assert!(stdout.contains("No collections yet."));

    let (stdout, _, success) = run_study(&config_path, &["manifest"]);
    assert!(success);
    assert!(stdout.contains("No files processed yet."));

    let (stdout, _, success) = run_study(&config_path, &["log"]);
    assert!(success);
    assert!(stdout.trim().is_empty());
}

#[test]
fn poll_without_embedder_records_ingestion_failure() {
    let (tmp, config_path) = setup_test_env();
    run_study(&config_path, &["init"]);
    fs::write(
        tmp.path().join("inbox/Galois_Theory.pdf"),
        common::minimal_pdf("field extensions and automorphisms"),
    )
    .unwrap();

    let (stdout, stderr, success) = run_study(&config_path, &["poll"]);
    assert!(success, "poll failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Found 1 new PDF(s): Galois_Theory.pdf"));
    assert!(stdout.contains("Galois_Theory.pdf (ingestion failed)"));

    let (stdout, _, _) = run_study(&config_path, &["manifest"]);
    assert!(stdout.contains("Galois_Theory.pdf"));
    assert!(stdout.contains("ingestion_failed"));
    assert!(stdout.contains("galois_theory"));

    let (stdout, _, _) = run_study(&config_path, &["log", "--limit", "1"]);
    let event: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(event["event"], "ingestion_failed");
    assert_eq!(event["file"], "Galois_Theory.pdf");

    let (stdout, _, _) = run_study(&config_path, &["poll"]);
    assert!(stdout.contains("No new PDFs found (1 total, 1 already processed)"));
}

#[test]
fn search_without_collection_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_study(&config_path, &["init"]);
    let (_, stderr, success) = run_study(&config_path, &["search", "eigenvalues"]);
    assert!(!success);
    assert!(stderr.contains("no collection supplied"));
}

#[test]
fn missing_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_study(&tmp.path().join("absent.toml"), &["collections"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
