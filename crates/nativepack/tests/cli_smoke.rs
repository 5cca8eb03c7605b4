//! CLI smoke tests for nativepack.
//!
//! Every test runs the binary inside a scratch repository (a temp directory
//! with a `.git` marker) so config discovery never escapes it.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn nativepack(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("nativepack");
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

/// Scratch repository, optionally with a `nativepack.toml`.
fn scratch_repo(config: Option<&str>) -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join(".git")).unwrap();
    if let Some(config) = config {
        fs::write(temp.path().join("nativepack.toml"), config).unwrap();
    }
    temp
}

const RELEASE_CONFIG: &str = r#"
[release]
files = ["VERSION.txt", "native/include/sdk.hpp"]
"#;

const IMPORT: &str = r#"  [global::System.Runtime.InteropServices.DllImport("SDK", EntryPoint="CSharp_Value_resize")]"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_lists_subcommands() {
    let repo = scratch_repo(None);
    nativepack(repo.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("patch-interop"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn version_flag_works() {
    let repo = scratch_repo(None);
    nativepack(repo.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nativepack"));
}

// =============================================================================
// init
// =============================================================================

#[test]
fn init_writes_starter_config_once() {
    let repo = scratch_repo(None);
    nativepack(repo.path())
        .args(["init", "--name", "demo-sdk"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote starter config"));

    let written = fs::read_to_string(repo.path().join("nativepack.toml")).unwrap();
    assert!(written.contains("name = \"demo-sdk\""));
    assert!(written.contains("[ios.simulators]"));

    nativepack(repo.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    nativepack(repo.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

// =============================================================================
// plan
// =============================================================================

#[test]
fn plan_lists_units_for_requested_host() {
    let repo = scratch_repo(None);
    nativepack(repo.path())
        .args(["plan", "--host", "macos"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 build units on a macos host"))
        .stdout(predicate::str::contains("osx (Release)"))
        .stdout(predicate::str::contains("ios-fat (Release)"))
        .stdout(predicate::str::contains("android-armeabi-v7a-c++_static"))
        .stdout(predicate::str::contains("build-ios-simulator64-release"))
        .stdout(predicate::str::contains("ios-simulator64-release.xml"));
}

#[test]
fn plan_honours_config_and_flags() {
    let repo = scratch_repo(Some("[project]\nconfiguration = \"debug\"\n\n[windows]\narchs = [\"win64\"]\n"));
    nativepack(repo.path())
        .args(["plan", "--host", "windows"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 build units"))
        .stdout(predicate::str::contains("windows-win64 (Debug)"));

    nativepack(repo.path())
        .args(["plan", "--host", "windows", "--configuration", "release"])
        .assert()
        .success()
        .stdout(predicate::str::contains("windows-win64 (Release)"));
}

#[test]
fn plan_without_units_fails() {
    let repo = scratch_repo(None);
    nativepack(repo.path())
        .args(["plan", "--host", "windows", "--platforms", "ios"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no build units"));
}

#[test]
fn invalid_config_is_reported() {
    let repo = scratch_repo(Some("[ios]\ndevices = [\"watch\"]\n"));
    nativepack(repo.path())
        .args(["plan", "--host", "macos"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("watch"));
}

// =============================================================================
// bump
// =============================================================================

fn write_release_files(repo: &Path, header: &str) {
    fs::create_dir_all(repo.join("native/include")).unwrap();
    fs::write(repo.join("VERSION.txt"), "1.2.3\n").unwrap();
    fs::write(repo.join("native/include/sdk.hpp"), header).unwrap();
}

#[test]
fn bump_replaces_the_single_occurrence() {
    let repo = scratch_repo(Some(RELEASE_CONFIG));
    write_release_files(repo.path(), "// C++ SDK version 1.2.3\n");

    nativepack(repo.path())
        .args(["bump", "--old", "1.2.3", "--new", "1.3.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Bumped 2 files from 1.2.3 to 1.3.0"));

    assert_eq!(fs::read_to_string(repo.path().join("VERSION.txt")).unwrap(), "1.3.0\n");
    assert_eq!(
        fs::read_to_string(repo.path().join("native/include/sdk.hpp")).unwrap(),
        "// C++ SDK version 1.3.0\n"
    );
}

#[test]
fn bump_rejects_invalid_versions() {
    let repo = scratch_repo(Some(RELEASE_CONFIG));
    write_release_files(repo.path(), "// C++ SDK version 1.2.3\n");

    nativepack(repo.path())
        .args(["bump", "--old", "1.2.3", "--new", "1.3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid version format"));
    assert_eq!(fs::read_to_string(repo.path().join("VERSION.txt")).unwrap(), "1.2.3\n");
}

#[test]
fn bump_with_ambiguous_file_changes_nothing() {
    let repo = scratch_repo(Some(RELEASE_CONFIG));
    write_release_files(repo.path(), "// 1.2.3\n// C++ SDK version 1.2.3\n");

    nativepack(repo.path())
        .args(["bump", "--old", "1.2.3", "--new", "2.0.0"])
        .assert()
        .failure();
    // The first file was valid but must not be written either.
    assert_eq!(fs::read_to_string(repo.path().join("VERSION.txt")).unwrap(), "1.2.3\n");
}

#[test]
fn bump_without_release_files_fails() {
    let repo = scratch_repo(None);
    nativepack(repo.path())
        .args(["bump", "--old", "1.2.3", "--new", "1.2.4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no release files configured"));
}

#[test]
fn bump_dry_run_leaves_files_alone() {
    let repo = scratch_repo(Some(RELEASE_CONFIG));
    write_release_files(repo.path(), "// C++ SDK version 1.2.3\n");

    nativepack(repo.path())
        .args(["--dry-run", "bump", "--old", "1.2.3", "--new", "1.2.4"])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(repo.path().join("VERSION.txt")).unwrap(), "1.2.3\n");
}

// =============================================================================
// patch-interop / sanitize
// =============================================================================

#[test]
fn patch_interop_is_idempotent() {
    let repo = scratch_repo(None);
    let root = repo.path().join("bindings");
    fs::create_dir_all(&root).unwrap();
    let source = root.join("SdkPINVOKE.cs");
    fs::write(
        &source,
        format!(
            "class SdkPINVOKE {{\n{}\n  public static extern void Value_resize(global::System.IntPtr jarg1);\n}}\n",
            IMPORT
        ),
    )
    .unwrap();

    nativepack(repo.path())
        .args(["patch-interop", "--root", "bindings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Patched 1 of 1 interop sources"));

    let patched = fs::read_to_string(&source).unwrap();
    assert!(patched.contains("#if (UNITY_IPHONE || UNITY_XBOX360) && !UNITY_EDITOR"));
    assert!(patched.contains("DllImport(\"__Internal\", EntryPoint=\"CSharp_Value_resize\")"));

    nativepack(repo.path())
        .args(["patch-interop", "--root", "bindings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Patched 0 of 1 interop sources"));
    assert_eq!(fs::read_to_string(&source).unwrap(), patched);
}

#[test]
fn patch_interop_missing_root_fails() {
    let repo = scratch_repo(None);
    nativepack(repo.path())
        .args(["patch-interop", "--root", "absent"])
        .assert()
        .failure();
}

#[test]
fn sanitize_normalizes_configured_roots() {
    let repo = scratch_repo(Some(
        "[whitespace]\nroots = [{ dir = \"native/source\", extensions = [\"cpp\"] }]\n",
    ));
    let source = repo.path().join("native/source");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.cpp"), "\tint a;  \r\n\r\n").unwrap();

    nativepack(repo.path())
        .arg("sanitize")
        .assert()
        .success()
        .stdout(predicate::str::contains("Normalized whitespace in 1 files"));
    assert_eq!(fs::read_to_string(source.join("a.cpp")).unwrap(), "int a;\n");
}
