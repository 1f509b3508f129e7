use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn indexer_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_codebase-indexer"))
}

struct TestEnv {
    _tmp: TempDir,
    repo: PathBuf,
    store: String,
}

fn setup_test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::create_dir_all(repo.join("node_modules/dep")).unwrap();

    fs::write(
        repo.join("src/main.go"),
        "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"hello\")\n}\n",
    )
    .unwrap();
    fs::write(
        repo.join("src/util.py"),
        "def add(a, b):\n    return a + b\n\n\ndef sub(a, b):\n    return a - b\n",
    )
    .unwrap();
    fs::write(repo.join("README.md"), "# Demo\n\nA small repository.\n").unwrap();
    fs::write(repo.join("Makefile"), "all:\n\tgo build ./...\n").unwrap();
    fs::write(repo.join("logo.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
    fs::write(repo.join("node_modules/dep/index.js"), "module.exports = {}\n").unwrap();
    fs::write(repo.join(".gitignore"), "*.log\n").unwrap();
    fs::write(repo.join("debug.log"), "noise\n").unwrap();

    let store = format!("sqlite:{}", tmp.path().join("data/idx.db").display());
    TestEnv {
        _tmp: tmp,
        repo,
        store,
    }
}

fn run_indexer(args: &[&str]) -> (String, String, Option<i32>) {
    let binary = indexer_binary();
    let output = Command::new(&binary)
        .env_remove("GIT_BRANCH")
        .env_remove("GIT_HASH")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run indexer binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code())
}

fn index(env: &TestEnv, branch: &str, commit: &str, extra: &[&str]) -> (String, String, Option<i32>) {
    let repo = env.repo.to_str().unwrap();
    let mut args = vec![
        "index",
        repo,
        "--store",
        env.store.as_str(),
        "--provider",
        "hash",
        "--progress",
        "off",
        "--branch",
        branch,
        "--commit",
        commit,
    ];
    args.extend_from_slice(extra);
    run_indexer(&args)
}

fn stats(env: &TestEnv) -> String {
    let (stdout, stderr, code) = run_indexer(&["stats", "--store", env.store.as_str()]);
    assert_eq!(code, Some(0), "stats failed: {}", stderr);
    stdout
}

fn branch_row<'a>(stats: &'a str, branch: &str) -> Option<&'a str> {
    stats
        .lines()
        .find(|l| l.trim_start().starts_with(&format!("{} ", branch)))
}

#[test]
fn test_index_then_stats() {
    let env = setup_test_env();
    let (stdout, stderr, code) = index(&env, "main", "aaaaaaaa1111", &[]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);
    assert!(stdout.contains("discovered: 4 files"), "stdout: {}", stdout);
    assert!(stdout.contains("new: 4"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks written: 4"), "stdout: {}", stdout);
    assert!(stdout.contains("ok"));

    let out = stats(&env);
    assert!(out.contains("Chunks:      4"), "stats: {}", out);
    let row = branch_row(&out, "main").expect("main row");
    assert!(row.contains("aaaaaaaa"), "row: {}", row);
}

#[test]
fn test_same_commit_is_already_indexed() {
    let env = setup_test_env();
    let (_, stderr, code) = index(&env, "main", "aaaaaaaa1111", &[]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);

    let (stdout, _, code) = index(&env, "main", "aaaaaaaa1111", &[]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("already indexed"), "stdout: {}", stdout);
}

#[test]
fn test_new_commit_replaces_old_entries() {
    let env = setup_test_env();
    let (_, stderr, code) = index(&env, "main", "aaaaaaaa1111", &[]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);

    fs::write(env.repo.join("src/new.rs"), "fn main() {}\n").unwrap();
    let (stdout, stderr, code) = index(&env, "main", "bbbbbbbb2222", &[]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);
    assert!(stdout.contains("removed: 4 superseded"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks written: 5"), "stdout: {}", stdout);

    let out = stats(&env);
    assert!(out.contains("Chunks:      5"), "stats: {}", out);
    let row = branch_row(&out, "main").expect("main row");
    assert!(row.contains("bbbbbbbb"), "row: {}", row);
    assert!(!out.contains("aaaaaaaa"), "stats: {}", out);
}

#[test]
fn test_other_branches_are_untouched() {
    let env = setup_test_env();
    assert_eq!(index(&env, "main", "aaaaaaaa1111", &[]).2, Some(0));
    assert_eq!(index(&env, "dev", "dddddddd0000", &[]).2, Some(0));
    assert_eq!(index(&env, "main", "bbbbbbbb2222", &[]).2, Some(0));

    let out = stats(&env);
    assert!(out.contains("Chunks:      8"), "stats: {}", out);
    let dev = branch_row(&out, "dev").expect("dev row");
    assert!(dev.contains("dddddddd"), "row: {}", dev);
    let main = branch_row(&out, "main").expect("main row");
    assert!(main.contains("bbbbbbbb"), "row: {}", main);
}

#[test]
fn test_without_commit_everything_is_reindexed() {
    let env = setup_test_env();
    let (_, stderr, code) = index(&env, "", "", &[]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);

    let (stdout, stderr, code) = index(&env, "", "", &[]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);
    assert!(stdout.contains("modified: 4"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks written: 4"), "stdout: {}", stdout);

    let out = stats(&env);
    assert!(out.contains("Chunks:      4"), "stats: {}", out);
}

#[test]
fn test_dry_run_writes_nothing() {
    let env = setup_test_env();
    let (stdout, stderr, code) = index(&env, "main", "aaaaaaaa1111", &["--dry-run"]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"), "stdout: {}", stdout);
    assert!(stdout.contains("estimated chunks: 4"), "stdout: {}", stdout);

    let out = stats(&env);
    assert!(out.contains("Chunks:      0"), "stats: {}", out);
}

#[test]
fn test_missing_root_fails() {
    let env = setup_test_env();
    let missing = env.repo.join("does-not-exist");
    let (_, stderr, code) = run_indexer(&[
        "index",
        missing.to_str().unwrap(),
        "--store",
        env.store.as_str(),
        "--provider",
        "hash",
    ]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("is not a directory"), "stderr: {}", stderr);
}

#[test]
fn test_file_root_fails() {
    let env = setup_test_env();
    let file = env.repo.join("README.md");
    let (_, _, code) = run_indexer(&[
        "index",
        file.to_str().unwrap(),
        "--store",
        env.store.as_str(),
        "--provider",
        "hash",
    ]);
    assert_eq!(code, Some(1));
}

#[test]
fn test_config_file_settings() {
    let env = setup_test_env();
    let config_path = env.repo.parent().unwrap().join("indexer.toml");
    fs::write(
        &config_path,
        format!(
            r#"[store]
location = "{}"
collection = "configured"

[embedding]
provider = "hash"
dims = 32

[discovery]
exclude_globs = ["**/*.md"]
"#,
            env.store
        ),
    )
    .unwrap();

    let (stdout, stderr, code) = run_indexer(&[
        "--config",
        config_path.to_str().unwrap(),
        "index",
        env.repo.to_str().unwrap(),
        "--progress",
        "off",
    ]);
    assert_eq!(code, Some(0), "index failed: {}", stderr);
    assert!(stdout.contains("discovered: 3 files"), "stdout: {}", stdout);
    assert!(stdout.contains("configured (sqlite)"), "stdout: {}", stdout);
}

#[test]
fn test_invalid_config_fails() {
    let env = setup_test_env();
    let config_path = env.repo.parent().unwrap().join("bad.toml");
    fs::write(&config_path, "[chunking]\ntarget_size = 100\noverlap = 100\n").unwrap();

    let (_, stderr, code) = run_indexer(&[
        "--config",
        config_path.to_str().unwrap(),
        "stats",
        "--store",
        env.store.as_str(),
    ]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}
