use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragsync");
    path
}

fn write_config(root: &Path, dims: usize) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[store]
path = "{root}/data/vectors.sqlite"
collection = "docs"

[chunking]
chunk_chars = 200
overlap_chars = 20

[embedding]
provider = "hash"
dims = {dims}

[corpus]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]

[sync]
state_root = "{root}/data/state"
"#,
        root = root.display(),
        dims = dims,
    );

    let config_path = config_dir.join("ragsync.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("data")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses incremental indexing.",
    )
    .unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.",
    )
    .unwrap();

    let config_path = write_config(&root, 32);
    (tmp, config_path)
}

fn run_ragsync(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let binary = ragsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

fn state_dir(tmp: &TempDir) -> PathBuf {
    tmp.path().join("data/state/docs")
}

#[test]
fn test_build_then_status() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(0), "build failed: {}", stderr);
    assert!(stdout.contains("3 added"), "stdout: {}", stdout);
    assert!(stdout.contains("ok"));

    assert!(state_dir(&tmp).join("LATEST").exists());
    assert!(state_dir(&tmp).join("BUILD_STAMP.json").exists());

    let (stdout, stderr, code) = run_ragsync(&config, &["status"]);
    assert_eq!(code, Some(0), "status failed: {}", stderr);
    assert!(stdout.contains("(matches)"), "stdout: {}", stdout);
    assert!(stdout.contains("documents: 3"));
    assert!(stdout.contains("(consistent)"));
}

#[test]
fn test_rebuild_is_incremental() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(0), "build failed: {}", stderr);

    let (stdout, _, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("3 unchanged"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks upserted: 0"));

    fs::write(
        tmp.path().join("files/beta.md"),
        "# Beta Document\n\nRewritten body.",
    )
    .unwrap();
    fs::remove_file(tmp.path().join("files/gamma.txt")).unwrap();

    let (stdout, stderr, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(0), "build failed: {}", stderr);
    assert!(stdout.contains("1 changed"), "stdout: {}", stdout);
    assert!(stdout.contains("1 deleted"));
    assert!(stdout.contains("1 unchanged"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, code) = run_ragsync(&config, &["build", "--dry-run"]);
    assert_eq!(code, Some(0), "dry run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("documents to embed: 3"));
    assert!(stdout.contains("+ alpha.md"));
    assert!(!state_dir(&tmp).exists());
}

#[test]
fn test_schema_change_requires_reset() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(0), "build failed: {}", stderr);

    // A different vector size changes the schema fingerprint.
    write_config(tmp.path(), 64);

    let (_, stderr, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(4), "stderr: {}", stderr);
    assert!(stderr.contains("schema fingerprint changed"));

    let (stdout, _, _) = run_ragsync(&config, &["status"]);
    assert!(stdout.contains("differs"));

    let (stdout, stderr, code) =
        run_ragsync(&config, &["build", "--on-schema-change", "reset"]);
    assert_eq!(code, Some(0), "reset build failed: {}", stderr);
    assert!(stdout.contains("reset: schema changed"));
    assert!(stdout.contains("3 added"));
}

#[test]
fn test_missing_state_with_populated_store() {
    let (tmp, config) = setup_test_env();
    let (_, stderr, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(0), "build failed: {}", stderr);

    fs::remove_dir_all(state_dir(&tmp)).unwrap();

    let (_, stderr, code) = run_ragsync(&config, &["build"]);
    assert_eq!(code, Some(4), "stderr: {}", stderr);

    let (_, stderr, code) = run_ragsync(&config, &["build", "--on-missing-state", "reset"]);
    assert_eq!(code, Some(0), "reset build failed: {}", stderr);
}

#[test]
fn test_stamp_records_plan() {
    let (tmp, config) = setup_test_env();
    let plan = tmp.path().join("plan.json");
    let (_, stderr, code) = run_ragsync(
        &config,
        &["build", "--plan-out", plan.to_str().unwrap()],
    );
    assert_eq!(code, Some(0), "build failed: {}", stderr);
    assert!(plan.exists());

    let (stdout, stderr, code) =
        run_ragsync(&config, &["stamp", "--plan", plan.to_str().unwrap()]);
    assert_eq!(code, Some(0), "stamp failed: {}", stderr);
    assert!(stdout.contains("count: "));

    let raw = fs::read_to_string(state_dir(&tmp).join("BUILD_STAMP.json")).unwrap();
    let stamp: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(stamp["writer"], "ragsync stamp");
    assert!(stamp["collectionCount"].as_u64().unwrap() >= 3);
    assert_eq!(stamp["plan"]["sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn test_stamp_without_store_records_count_error() {
    let (tmp, config) = setup_test_env();

    let (_, stderr, code) = run_ragsync(&config, &["stamp"]);
    assert_eq!(code, Some(0), "stamp failed: {}", stderr);

    let raw = fs::read_to_string(state_dir(&tmp).join("BUILD_STAMP.json")).unwrap();
    let stamp: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(stamp["collectionCount"].is_null());
    assert!(stamp["countError"].as_str().unwrap().contains("store not found"));
}

#[test]
fn test_invalid_config_exit_code() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        r#"[store]
path = "x.sqlite"
collection = "docs"

[chunking]
chunk_chars = 100
overlap_chars = 100

[corpus]
root = "."
"#,
    )
    .unwrap();

    let (_, stderr, code) = run_ragsync(&bad, &["build"]);
    assert_eq!(code, Some(2), "stderr: {}", stderr);
    assert!(stderr.contains("overlap_chars"));
}
