use std::process::{Command, Output};
use tempfile::TempDir;

fn run_tilewatch(dir: &TempDir, args: &[&str], config: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tilewatch"))
        .args(args)
        .current_dir(dir.path())
        .env("TILEWATCH_CONFIG", dir.path().join(config))
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run tilewatch")
}

#[test]
fn test_missing_webroot_argument() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_tilewatch(&temp_dir, &[], "absent.toml");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("<WEBROOT>"), "stderr: {stderr}");
}

#[test]
fn test_webroot_without_tiles_exits_with_config_error() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join("web/maps")).unwrap();

    let output = run_tilewatch(&temp_dir, &["web", "--port", "0"], "absent.toml");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No tile folders"), "stderr: {stderr}");
}

#[test]
fn test_nonexistent_webroot_exits_with_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let output = run_tilewatch(&temp_dir, &["does-not-exist"], "absent.toml");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Cannot resolve webroot"), "stderr: {stderr}");
}

#[test]
fn test_invalid_config_file_exits_with_config_error() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join("web/maps/overworld/tiles")).unwrap();
    std::fs::write(
        temp_dir.path().join("tilewatch.toml"),
        "[server]\nscope = \"global\"\n",
    )
    .unwrap();

    let output = run_tilewatch(&temp_dir, &["web"], "tilewatch.toml");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load configuration"), "stderr: {stderr}");
}
