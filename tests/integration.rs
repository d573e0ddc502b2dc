use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn repa_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_repa"))
}

/// Temp dir with a config (model backend disabled) and a small local repo.
fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let repo = root.join("repo");
    fs::create_dir_all(repo.join("src/api")).unwrap();
    fs::write(repo.join("README.md"), "# Demo\n\nA tiny demo service.\n").unwrap();
    fs::write(repo.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::write(repo.join("src/main.rs"), "fn main() {}\n").unwrap();
    fs::write(repo.join("src/api/routes.rs"), "pub fn routes() {}\n").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/analyses.sqlite"

[analysis]
max_files = 10
max_chars_per_file = 2000

[llm]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("repa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, repo)
}

fn run_repa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = repa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run repa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config, _) = setup_test_env();
    let (stdout, stderr, ok) = run_repa(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/analyses.sqlite").exists());

    // Idempotent.
    let (_, stderr, ok) = run_repa(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_history_on_empty_database() {
    let (_tmp, config, _) = setup_test_env();
    run_repa(&config, &["init"]);
    let (stdout, stderr, ok) = run_repa(&config, &["history"]);
    assert!(ok, "history failed: {}", stderr);
    assert!(stdout.contains("No analyses stored."));
}

#[test]
fn test_export_unknown_scope_fails() {
    let (_tmp, config, _) = setup_test_env();
    run_repa(&config, &["init"]);
    let (stdout, stderr, ok) = run_repa(&config, &["export", "https://github.com/o/nothing"]);
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(stderr.contains("no analysis found"), "stderr: {}", stderr);
}

#[test]
fn test_analyze_missing_subfolder_fails_before_backend() {
    let (_tmp, config, repo) = setup_test_env();
    let (_, stderr, ok) = run_repa(
        &config,
        &[
            "analyze",
            repo.to_str().unwrap(),
            "--subfolder",
            "src/frontend",
        ],
    );
    assert!(!ok);
    assert!(stderr.contains("while validating"), "stderr: {}", stderr);
    assert!(stderr.contains("src/frontend"), "stderr: {}", stderr);
}

#[test]
fn test_analyze_with_disabled_backend_reports_stage() {
    let (_tmp, config, repo) = setup_test_env();
    let (_, stderr, ok) = run_repa(&config, &["analyze", repo.to_str().unwrap()]);
    assert!(!ok);
    assert!(stderr.contains("while prompting"), "stderr: {}", stderr);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_stats_after_init() {
    let (_tmp, config, _) = setup_test_env();
    run_repa(&config, &["init"]);
    let (stdout, stderr, ok) = run_repa(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Analyses:    0"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("repa.toml");
    fs::write(&config_path, "[analysis]\nmax_files = 0\n").unwrap();
    let (_, stderr, ok) = run_repa(&config_path, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("max_files"), "stderr: {}", stderr);
}

#[test]
fn test_db_path_flag_overrides_config() {
    let (tmp, config, _) = setup_test_env();
    let custom = tmp.path().join("elsewhere/custom.sqlite");
    let (_, stderr, ok) = run_repa(&config, &["--db-path", custom.to_str().unwrap(), "init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(custom.exists());
}
