use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Test context with a scratch repository root
struct TestContext {
    temp_dir: TempDir,
    repo: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let repo = temp_dir.path().join("repo");
        std::fs::create_dir_all(&repo).expect("failed to create repo");
        Self { temp_dir, repo }
    }

    fn apkrepo_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_apkrepo");
        let mut cmd = Command::new(bin_path);
        cmd.env_remove("RUST_LOG");
        cmd.env_remove("APKREPO_REPO_PATH");
        cmd.env_remove("APKREPO_REMOTE_URL");
        cmd.env("HOME", self.temp_dir.path());
        cmd
    }
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx
        .apkrepo_cmd()
        .arg("--help")
        .output()
        .expect("failed to run apkrepo");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("serve"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx
        .apkrepo_cmd()
        .arg("--version")
        .output()
        .expect("failed to run apkrepo");
    assert!(output.status.success());
}

#[test]
fn test_serve_requires_a_repository() {
    let ctx = TestContext::new();
    let output = ctx
        .apkrepo_cmd()
        .arg("serve")
        .output()
        .expect("failed to run apkrepo");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--repo-path"), "{stderr}");
}

#[test]
fn test_serve_rejects_unknown_arch() {
    let ctx = TestContext::new();
    let output = ctx
        .apkrepo_cmd()
        .args(["serve", "--default-arch", "sparc", "--repo-path"])
        .arg(&ctx.repo)
        .output()
        .expect("failed to run apkrepo");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("x86_64"), "{stderr}");
}

#[test]
fn test_build_empty_partition_then_show() {
    let ctx = TestContext::new();
    let output = ctx
        .apkrepo_cmd()
        .args(["build", "--arch", "armhf", "--repo-path"])
        .arg(&ctx.repo)
        .output()
        .expect("failed to run apkrepo");
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let archive = ctx.repo.join("armhf").join("APKINDEX.tar.gz");
    assert!(archive.is_file());

    let output = ctx
        .apkrepo_cmd()
        .arg("show")
        .arg(&archive)
        .output()
        .expect("failed to run apkrepo");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "0 records\n");
}

#[test]
fn test_show_prints_records() {
    let ctx = TestContext::new();
    let archive = ctx.temp_dir.path().join("APKINDEX.tar.gz");
    apkrepo_core::archive::write_text(
        &archive,
        "P:musl\nV:1.2.4-r2\n\nP:busybox\nV:1.36.1-r5\n\n",
    )
    .unwrap();

    let output = ctx
        .apkrepo_cmd()
        .arg("show")
        .arg(&archive)
        .output()
        .expect("failed to run apkrepo");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("P:musl\n"));
    assert!(stdout.ends_with("2 records\n"));
}

#[test]
fn test_show_corrupt_archive_fails() {
    let ctx = TestContext::new();
    let archive = ctx.temp_dir.path().join("APKINDEX.tar.gz");
    std::fs::write(&archive, b"junk").unwrap();

    let output = ctx
        .apkrepo_cmd()
        .arg("show")
        .arg(&archive)
        .output()
        .expect("failed to run apkrepo");
    assert!(!output.status.success());
}

#[test]
fn test_sign_with_missing_key_fails() {
    let ctx = TestContext::new();
    let output = ctx
        .apkrepo_cmd()
        .args(["build", "--repo-path"])
        .arg(&ctx.repo)
        .output()
        .expect("failed to run apkrepo");
    assert!(output.status.success());

    let output = ctx
        .apkrepo_cmd()
        .args(["sign", "--priv-key-file", "/nonexistent/key.rsa", "--repo-path"])
        .arg(&ctx.repo)
        .output()
        .expect("failed to run apkrepo");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("private key not found"), "{stderr}");
}
