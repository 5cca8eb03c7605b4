//! Whitespace normalization over source trees.
//!
//! Tabs become four spaces, line endings become `\n`, trailing whitespace is
//! stripped from every line and from both ends of the file, and the file ends
//! with exactly one newline. Files already in normal form are not rewritten.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::layout::Layout;
use crate::types::BuildError;

/// A directory and the file extensions normalized below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizeRoot {
    pub dir: PathBuf,
    /// Extensions without the leading dot, compared case-sensitively.
    pub extensions: Vec<String>,
}

impl SanitizeRoot {
    pub fn new<I, S>(dir: impl Into<PathBuf>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dir: dir.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|wanted| wanted == ext))
    }
}

/// Native sources, public headers, native tests and the deployment tree.
pub fn default_roots(layout: &Layout) -> Vec<SanitizeRoot> {
    vec![
        SanitizeRoot::new(layout.native_dir.join("source"), ["cpp", "hpp"]),
        SanitizeRoot::new(layout.native_dir.join("include"), ["cpp", "hpp", "h"]),
        SanitizeRoot::new(layout.native_dir.join("tests/src"), ["cpp", "hpp"]),
        SanitizeRoot::new(&layout.deployments_dir, ["cs", "cpp", "hpp", "h"]),
    ]
}

/// Returns `text` in normal form.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace('\t', "    ").replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = text.split('\n').map(str::trim_end).collect();
    let mut out = lines.join("\n").trim().to_string();
    out.push('\n');
    out
}

/// Normalizes one file. Returns whether it changed.
pub fn normalize_file(path: &Path, dry_run: bool) -> Result<bool, BuildError> {
    let bytes = fs::read(path).map_err(|e| BuildError::fs("read", path, e))?;
    let Ok(text) = String::from_utf8(bytes) else {
        debug!("skipping non UTF-8 file {}", path.display());
        return Ok(false);
    };
    let normalized = normalize_text(&text);
    if normalized == text {
        return Ok(false);
    }
    if !dry_run {
        fs::write(path, normalized).map_err(|e| BuildError::fs("write", path, e))?;
    }
    Ok(true)
}

/// Normalizes every matching file below `roots`. Missing roots are skipped.
///
/// Returns the files that changed (or would change, with `dry_run`).
pub fn sanitize(roots: &[SanitizeRoot], dry_run: bool) -> Result<Vec<PathBuf>, BuildError> {
    let mut changed = Vec::new();
    for root in roots {
        if !root.dir.exists() {
            debug!("whitespace root {} does not exist", root.dir.display());
            continue;
        }
        for entry in WalkDir::new(&root.dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || !root.matches(entry.path()) {
                continue;
            }
            if normalize_file(entry.path(), dry_run)? {
                changed.push(entry.into_path());
            }
        }
    }
    info!("normalized whitespace in {} files", changed.len());
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_form() {
        assert_eq!(
            normalize_text("\n\n\tint x;   \r\nint y;\rint z;\t\n\n\n"),
            "int x;\nint y;\nint z;\n"
        );
        assert_eq!(normalize_text(""), "\n");
        assert_eq!(normalize_text("a\n\n\nb\n"), "a\n\n\nb\n");
    }

    #[test]
    fn only_matching_files_change() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("src/a.cpp"), "int a;  \r\n").unwrap();
        fs::write(dir.join("src/b.cpp"), "int b;\n").unwrap();
        fs::write(dir.join("src/c.txt"), "text  \r\n").unwrap();

        let roots = vec![
            SanitizeRoot::new(dir.join("src"), ["cpp"]),
            SanitizeRoot::new(dir.join("absent"), ["cpp"]),
        ];
        let changed = sanitize(&roots, false).unwrap();
        assert_eq!(changed, vec![dir.join("src/a.cpp")]);
        assert_eq!(fs::read_to_string(dir.join("src/a.cpp")).unwrap(), "int a;\n");
        assert_eq!(fs::read_to_string(dir.join("src/c.txt")).unwrap(), "text  \r\n");

        assert!(sanitize(&roots, false).unwrap().is_empty());
    }

    #[test]
    fn dry_run_leaves_files_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.hpp");
        fs::write(&path, "\tint a;").unwrap();
        assert!(normalize_file(&path, true).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "\tint a;");
    }
}
