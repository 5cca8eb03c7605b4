//! Build metadata for artifact traceability.
//!
//! After installation a `build_meta.json` is written into the combined
//! deployment tree so that a shipped package can be traced back to the
//! commit, units and configuration it was built from.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::types::{BuildError, Configuration, HostOs};

/// File name of the metadata document inside the combined tree.
pub const META_FILE_NAME: &str = "build_meta.json";

/// Metadata describing one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMeta {
    /// Version token patched into the sources
    pub version: String,
    /// Names of the units that were built, in build order
    pub units: Vec<String>,
    /// Build configuration ("Debug" or "Release")
    pub configuration: String,
    /// Git commit hash (if in a git repository)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    /// Git branch name (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Whether the git working directory was dirty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
    /// Build timestamp in RFC3339 format
    pub build_time: String,
    /// Build timestamp as Unix epoch seconds
    pub build_time_unix: i64,
    /// Whether tests were run
    pub tests_run: bool,
    /// nativepack version
    pub tool_version: String,
    /// Host OS (e.g., "macos", "windows")
    pub host_os: String,
}

impl BuildMeta {
    /// Collects metadata for a run in `repo_root`.
    pub fn collect(
        repo_root: &Path,
        version: &str,
        units: Vec<String>,
        configuration: Configuration,
        tests_run: bool,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        let build_time = now
            .format(&Rfc3339)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());

        Self {
            version: version.to_string(),
            units,
            configuration: configuration.as_str().to_string(),
            commit_hash: git_commit(repo_root),
            branch: git_branch(repo_root),
            dirty: git_dirty(repo_root),
            build_time,
            build_time_unix: now.unix_timestamp(),
            tests_run,
            tool_version: crate::VERSION.to_string(),
            host_os: HostOs::current().as_str().to_string(),
        }
    }

    /// Writes the metadata as pretty JSON into `dir` and returns the path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, BuildError> {
        fs::create_dir_all(dir).map_err(|e| BuildError::fs("create directory", dir, e))?;
        let path = dir.join(META_FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| BuildError::fs("write", &path, e))?;
        info!("wrote build metadata to {}", path.display());
        Ok(path)
    }
}

fn git_stdout(repo_root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Gets the current git commit hash (short form).
pub fn git_commit(repo_root: &Path) -> Option<String> {
    git_stdout(repo_root, &["rev-parse", "--short", "HEAD"]).filter(|hash| !hash.is_empty())
}

/// Gets the current git branch name.
pub fn git_branch(repo_root: &Path) -> Option<String> {
    git_stdout(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])
        .filter(|branch| !branch.is_empty() && branch != "HEAD")
}

/// Checks if the git working directory has uncommitted changes.
pub fn git_dirty(repo_root: &Path) -> Option<bool> {
    git_stdout(repo_root, &["status", "--porcelain"]).map(|status| !status.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_json() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = BuildMeta::collect(
            tmp.path(),
            "1.4.0.12",
            vec!["osx".into(), "ios-fat".into()],
            Configuration::Release,
            false,
        );
        assert_eq!(meta.configuration, "Release");
        assert!(meta.build_time_unix > 0);
        // Outside a repository there is no commit to report.
        assert_eq!(meta.commit_hash, None);

        let path = meta.write_to(&tmp.path().join("combined")).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("commit_hash"));
        let parsed: BuildMeta = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn build_time_is_rfc3339() {
        let meta = BuildMeta::collect(Path::new("."), "1.0.0", Vec::new(), Configuration::Debug, true);
        assert!(OffsetDateTime::parse(&meta.build_time, &Rfc3339).is_ok());
    }
}
