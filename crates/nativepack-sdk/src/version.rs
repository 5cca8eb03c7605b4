//! Version derivation and version-declaration patching.
//!
//! The release version token comes from source control: the most recent
//! reachable tag, plus the number of commits since that tag when it is not
//! zero (`1.4.0`, `1.4.0.12`). The token is patched into a fixed set of
//! declarations; each declaration pattern must occur exactly once per file,
//! so a moved or reworded declaration stops the build instead of silently
//! shipping an unversioned artifact.

use std::fs;
use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex};
use tracing::info;

use crate::executor::{Executor, ToolCommand};
use crate::layout::Layout;
use crate::types::BuildError;

/// Version token used by dry runs that were not given an explicit version.
pub const DRY_RUN_VERSION: &str = "0.0.0-dry-run";

/// A version declaration inside one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTarget {
    pub path: PathBuf,
    /// Regular expression matching the whole declaration.
    pub pattern: String,
    /// Replacement text; `{version}` is substituted.
    pub replacement: String,
}

impl VersionTarget {
    pub fn new(path: impl Into<PathBuf>, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

/// Declarations patched by default: the native version constant, the public
/// header banner and the host-side binding banner.
pub fn default_targets(layout: &Layout) -> Vec<VersionTarget> {
    vec![
        VersionTarget::new(
            layout.native_dir.join("source/core/version.cpp"),
            r#"static const\s+std::string\s+sdk_version\s+=\s+".+?"\s*;"#,
            r#"static const std::string sdk_version = "{version}";"#,
        ),
        VersionTarget::new(
            layout.native_dir.join("include/sdk.hpp"),
            r"C\+\+ SDK version .+",
            "C++ SDK version {version}",
        ),
        VersionTarget::new(
            layout.host_project_dir.join("Assets/Sdk/Sdk.cs"),
            r"SDK for Unity version .+",
            "SDK for Unity version {version}",
        ),
    ]
}

/// `tag` for a tagged commit, `tag.distance` otherwise. A leading `v` is dropped.
pub fn version_token(tag: &str, distance: u32) -> String {
    let tag = tag.trim();
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    if distance == 0 {
        tag.to_string()
    } else {
        format!("{}.{}", tag, distance)
    }
}

/// Derives the version token from the repository at `repo_root`.
pub fn derive_version(exec: &Executor, repo_root: &Path) -> Result<String, BuildError> {
    let tag = exec.output(
        &ToolCommand::new("git")
            .args(["describe", "--tags", "--abbrev=0"])
            .current_dir(repo_root),
    )?;
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(BuildError::Config(
            "no reachable tag to derive the version from".into(),
        ));
    }

    let count = exec.output(
        &ToolCommand::new("git")
            .args(["rev-list", "--count"])
            .arg(format!("{}..HEAD", tag))
            .current_dir(repo_root),
    )?;
    let distance = count.trim().parse::<u32>().map_err(|_| {
        BuildError::Config(format!("unexpected commit count from git: {:?}", count.trim()))
    })?;

    let version = version_token(tag, distance);
    info!("derived version {} from tag {}", version, tag);
    Ok(version)
}

/// Replaces the single match of `pattern` in `text` with `replacement`.
///
/// `path` only labels the error when the pattern is found zero or several times.
pub fn patch_version_text(
    path: &Path,
    text: &str,
    pattern: &Regex,
    replacement: &str,
) -> Result<String, BuildError> {
    let found = pattern.find_iter(text).count();
    if found != 1 {
        return Err(BuildError::VersionPattern {
            path: path.to_path_buf(),
            pattern: pattern.as_str().to_string(),
            found,
        });
    }
    Ok(pattern.replace(text, NoExpand(replacement)).into_owned())
}

/// Patches `version` into one target. Returns whether the file changed.
pub fn apply_version(target: &VersionTarget, version: &str, dry_run: bool) -> Result<bool, BuildError> {
    let pattern = Regex::new(&target.pattern)?;
    let text = fs::read_to_string(&target.path).map_err(|e| BuildError::fs("read", &target.path, e))?;
    let replacement = target.replacement.replace("{version}", version);
    let patched = patch_version_text(&target.path, &text, &pattern, &replacement)?;

    if patched == text {
        return Ok(false);
    }
    if dry_run {
        info!("[dry-run] would set version {} in {}", version, target.path.display());
    } else {
        fs::write(&target.path, patched).map_err(|e| BuildError::fs("write", &target.path, e))?;
        info!("version number changed in {}", target.path.display());
    }
    Ok(true)
}

/// Patches every target, stopping at the first failure.
pub fn patch_versions(targets: &[VersionTarget], version: &str, dry_run: bool) -> Result<usize, BuildError> {
    let mut changed = 0;
    for target in targets {
        if apply_version(target, version, dry_run)? {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Fails unless `version` looks like `MAJOR.MINOR.PATCH`.
pub fn validate_semver(version: &str) -> Result<(), BuildError> {
    let parts: Vec<&str> = version.split('.').collect();
    let valid = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(BuildError::Config(format!(
            "invalid version format '{}', expected semantic versioning (e.g. 1.2.3)",
            version
        )))
    }
}

/// Byte offsets of `version` in `text` where it stands as a whole version.
///
/// `1.2.3` does not occur in `1.2.34`, `11.2.3` or `0.1.2.3`; a trailing
/// sentence dot (`1.2.3.`) is allowed.
fn version_occurrences(text: &str, version: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    text.match_indices(version)
        .map(|(start, _)| start)
        .filter(|&start| {
            let end = start + version.len();
            let before = start.checked_sub(1).map(|i| bytes[i]);
            let after = bytes.get(end).copied();
            let after_dot_digit = after == Some(b'.')
                && bytes.get(end + 1).is_some_and(|b| b.is_ascii_digit());
            !before.is_some_and(|b| b.is_ascii_digit() || b == b'.')
                && !after.is_some_and(|b| b.is_ascii_digit())
                && !after_dot_digit
        })
        .collect()
}

/// Replaces the single occurrence of version `old` with `new` in `text`.
pub fn bump_text(path: &Path, text: &str, old: &str, new: &str) -> Result<String, BuildError> {
    let found = version_occurrences(text, old);
    let [start] = found.as_slice() else {
        return Err(BuildError::VersionPattern {
            path: path.to_path_buf(),
            pattern: old.to_string(),
            found: found.len(),
        });
    };
    let end = start + old.len();
    Ok(format!("{}{}{}", &text[..*start], new, &text[end..]))
}

/// Release bump of one file from `old` to `new`.
pub fn bump_file(path: &Path, old: &str, new: &str, dry_run: bool) -> Result<(), BuildError> {
    validate_semver(old)?;
    validate_semver(new)?;
    let text = fs::read_to_string(path).map_err(|e| BuildError::fs("read", path, e))?;
    let bumped = bump_text(path, &text, old, new)?;
    if dry_run {
        info!("[dry-run] would bump {} from {} to {}", path.display(), old, new);
        return Ok(());
    }
    fs::write(path, bumped).map_err(|e| BuildError::fs("write", path, e))?;
    info!("bumped {} from {} to {}", path.display(), old, new);
    Ok(())
}

/// Creates the annotated release tag `v<version>`.
pub fn tag_release(exec: &Executor, repo_root: &Path, version: &str) -> Result<(), BuildError> {
    validate_semver(version)?;
    exec.run(
        &ToolCommand::new("git")
            .args(["tag", "-a"])
            .arg(format!("v{}", version))
            .arg("-m")
            .arg(format!("version {}", version))
            .current_dir(repo_root),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_includes_commit_distance() {
        assert_eq!(version_token("v1.4.0", 0), "1.4.0");
        assert_eq!(version_token("1.4.0\n", 12), "1.4.0.12");
    }

    #[test]
    fn declaration_must_match_exactly_once() {
        let pattern = Regex::new(r"SDK for Unity version .+").unwrap();
        let path = Path::new("Sdk.cs");

        let patched = patch_version_text(
            path,
            "// SDK for Unity version 1.2.3\nclass Sdk {}\n",
            &pattern,
            "SDK for Unity version 1.2.4",
        )
        .unwrap();
        assert_eq!(patched, "// SDK for Unity version 1.2.4\nclass Sdk {}\n");

        let none = patch_version_text(path, "class Sdk {}", &pattern, "x").unwrap_err();
        assert!(matches!(none, BuildError::VersionPattern { found: 0, .. }));

        let twice = patch_version_text(
            path,
            "SDK for Unity version 1\nSDK for Unity version 2\n",
            &pattern,
            "x",
        )
        .unwrap_err();
        assert!(matches!(twice, BuildError::VersionPattern { found: 2, .. }));
    }

    #[test]
    fn replacement_is_literal() {
        let pattern = Regex::new(r"version .+").unwrap();
        let out = patch_version_text(Path::new("x"), "version 1", &pattern, "version $1").unwrap();
        assert_eq!(out, "version $1");
    }

    #[test]
    fn native_constant_is_patched_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let target = default_targets(&layout).remove(0);
        fs::create_dir_all(target.path.parent().unwrap()).unwrap();
        fs::write(
            &target.path,
            "namespace sdk {\n    static const std::string sdk_version   =  \"0.0.1\" ;\n}\n",
        )
        .unwrap();

        assert!(apply_version(&target, "1.2.4", false).unwrap());
        assert_eq!(
            fs::read_to_string(&target.path).unwrap(),
            "namespace sdk {\n    static const std::string sdk_version = \"1.2.4\";\n}\n"
        );
        assert!(!apply_version(&target, "1.2.4", false).unwrap());
    }

    #[test]
    fn missing_declaration_file_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let targets = default_targets(&Layout::new(tmp.path()));
        assert!(matches!(
            patch_versions(&targets, "1.0.0", false),
            Err(BuildError::Fs { .. })
        ));
    }

    #[test]
    fn bump_replaces_exactly_one_occurrence() {
        let path = Path::new("package.json");
        assert_eq!(
            bump_text(path, r#"{"version": "1.2.3"}"#, "1.2.3", "1.2.4").unwrap(),
            r#"{"version": "1.2.4"}"#
        );
        assert!(matches!(
            bump_text(path, r#"{"version": "1.2.2"}"#, "1.2.3", "1.2.4"),
            Err(BuildError::VersionPattern { found: 0, .. })
        ));
        assert!(matches!(
            bump_text(path, "1.2.3 and 1.2.3", "1.2.3", "1.2.4"),
            Err(BuildError::VersionPattern { found: 2, .. })
        ));
    }

    #[test]
    fn bump_ignores_longer_versions() {
        let path = Path::new("package.json");
        for text in [
            r#"{"version": "1.2.34"}"#,
            r#"{"version": "11.2.3"}"#,
            "version 0.1.2.3",
        ] {
            assert!(
                matches!(
                    bump_text(path, text, "1.2.3", "1.2.4"),
                    Err(BuildError::VersionPattern { found: 0, .. })
                ),
                "{}",
                text
            );
        }

        assert_eq!(
            bump_text(path, "1.2.34 is older than 1.2.3.\n", "1.2.3", "1.2.4").unwrap(),
            "1.2.34 is older than 1.2.4.\n"
        );
        assert_eq!(
            bump_text(path, "v1.2.3 (1.2.30)", "1.2.3", "1.3.0").unwrap(),
            "v1.3.0 (1.2.30)"
        );
    }

    #[test]
    fn bump_validates_versions() {
        assert!(validate_semver("1.2.3").is_ok());
        assert!(validate_semver("1.2").is_err());
        assert!(validate_semver("1.2.3-beta").is_err());
        assert!(validate_semver("v1.2.3").is_err());

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("package.json");
        fs::write(&path, r#"{"version": "1.2.3"}"#).unwrap();
        assert!(matches!(
            bump_file(&path, "1.2.3", "next", false),
            Err(BuildError::Config(_))
        ));
        bump_file(&path, "1.2.3", "1.2.4", false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"version": "1.2.4"}"#);
    }

    #[test]
    fn tag_uses_v_prefix() {
        let exec = Executor::new().dry_run(true);
        tag_release(&exec, Path::new("/repo"), "1.2.4").unwrap();
        let history = exec.history();
        assert_eq!(history[0].args, vec!["tag", "-a", "v1.2.4", "-m", "version 1.2.4"]);
    }
}
