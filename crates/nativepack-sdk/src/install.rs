//! Deployment installer.
//!
//! Moves freshly built artifacts from the staging tree written by a unit's
//! install target into the combined deployment tree. Files below a library
//! directory get the owning unit's `<name>-<configuration>` token injected
//! into their file name, so same-named libraries from different units never
//! overwrite each other in the flat destination directory.
//!
//! Symlinks are moved as links. A link to a sibling library is pointed at
//! the sibling's tokenized name.
//!
//! Installation is a move. A failed walk leaves the staging tree partially
//! emptied, so the owning unit has to be rebuilt rather than reinstalled.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use crate::layout::ensure_within;
use crate::types::{BuildError, Configuration};

/// OS metadata files that are never installed.
pub const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Directory names whose files are treated as libraries.
pub const LIBRARY_DIRS: &[&str] = &["lib", "lib64", "libs"];

/// One artifact relocated by [`install_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Whether the file name was tokenized.
    pub library: bool,
}

/// Token identifying the unit that owns an artifact.
pub fn artifact_token(name: &str, configuration: Configuration) -> String {
    format!("{}-{}", name, configuration.lowercase())
}

/// Injects `-<token>` into `file_name` before its extension.
///
/// The extension starts at the first dot that is not the leading character,
/// so `libfoo.so.1` becomes `libfoo-<token>.so.1`.
pub fn tokenized_file_name(file_name: &str, token: &str) -> String {
    let split = file_name
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '.')
        .map(|(i, _)| i);
    match split {
        Some(i) => format!("{}-{}{}", &file_name[..i], token, &file_name[i..]),
        None => format!("{}-{}", file_name, token),
    }
}

/// Whether `relative` lives below a library output directory.
pub fn is_library_path(relative: &Path) -> bool {
    relative
        .parent()
        .map(|dir| {
            dir.components().any(|c| match c {
                Component::Normal(name) => name
                    .to_str()
                    .is_some_and(|name| LIBRARY_DIRS.contains(&name)),
                _ => false,
            })
        })
        .unwrap_or(false)
}

/// Destination path of `relative` inside the combined tree.
pub fn destination_for(relative: &Path, token: &str) -> PathBuf {
    if !is_library_path(relative) {
        return relative.to_path_buf();
    }
    match relative.file_name().and_then(|n| n.to_str()) {
        Some(name) => relative.with_file_name(tokenized_file_name(name, token)),
        None => relative.to_path_buf(),
    }
}

/// Moves every file below `src` into `dst`, tokenizing library names.
///
/// Destination directories are created lazily. Returns the relocated
/// artifacts in walk order (sorted by file name, so runs are reproducible).
pub fn install_tree(src: &Path, dst: &Path, token: &str) -> Result<Vec<InstalledArtifact>, BuildError> {
    if !src.exists() {
        info!("nothing to install: {} does not exist", src.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        if !file_type.is_file() && !file_type.is_symlink() {
            continue;
        }
        let ignored = entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_FILES.contains(&name));
        if !ignored {
            files.push(entry.into_path());
        }
    }

    let mut installed = Vec::with_capacity(files.len());
    for source in files {
        let relative = source.strip_prefix(src).map_err(|_| BuildError::PathEscape {
            path: source.clone(),
            root: src.to_path_buf(),
        })?;
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BuildError::PathEscape {
                path: source.clone(),
                root: src.to_path_buf(),
            });
        }

        let destination = dst.join(destination_for(relative, token));
        ensure_within(dst, &destination)?;

        info!(
            "    {} => {}",
            relative.display(),
            destination
                .strip_prefix(dst)
                .unwrap_or(&destination)
                .display()
        );
        if fs::symlink_metadata(&source).is_ok_and(|m| m.file_type().is_symlink()) {
            move_link(&source, &destination, is_library_path(relative).then_some(token))?;
        } else {
            move_file(&source, &destination)?;
        }

        installed.push(InstalledArtifact {
            library: is_library_path(relative),
            source,
            destination,
        });
    }

    Ok(installed)
}

/// Copies `source` to `destination`, which must lie inside `root`.
///
/// Used where one artifact is intentionally delivered to two places.
pub fn deliver_copy(source: &Path, destination: &Path, root: &Path) -> Result<(), BuildError> {
    ensure_within(root, destination)?;
    ensure_parent(destination)?;
    fs::copy(source, destination).map_err(|e| BuildError::fs("copy", source, e))?;
    info!("    {} => {}", source.display(), destination.display());
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), BuildError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| BuildError::fs("create directory", parent, e))?;
    }
    Ok(())
}

fn clear_destination(destination: &Path) -> Result<(), BuildError> {
    ensure_parent(destination)?;
    if fs::symlink_metadata(destination).is_ok() {
        fs::remove_file(destination).map_err(|e| BuildError::fs("replace", destination, e))?;
    }
    Ok(())
}

fn move_file(source: &Path, destination: &Path) -> Result<(), BuildError> {
    clear_destination(destination)?;
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    // Cross-device moves fall back to copy + remove.
    fs::copy(source, destination).map_err(|e| BuildError::fs("copy", source, e))?;
    fs::remove_file(source).map_err(|e| BuildError::fs("remove", source, e))
}

/// Link target after installation.
///
/// With a `token`, a link to a sibling file (`libfoo.so -> libfoo.so.1`)
/// points at the sibling's tokenized name.
fn relinked_target(target: &Path, token: Option<&str>) -> PathBuf {
    let sibling = match target.components().collect::<Vec<_>>().as_slice() {
        [Component::Normal(name)] => name.to_str(),
        _ => None,
    };
    match (token, sibling) {
        (Some(token), Some(name)) => PathBuf::from(tokenized_file_name(name, token)),
        _ => target.to_path_buf(),
    }
}

/// Recreates the symlink `source` at `destination` and removes the original.
#[cfg(unix)]
fn move_link(source: &Path, destination: &Path, token: Option<&str>) -> Result<(), BuildError> {
    let target = fs::read_link(source).map_err(|e| BuildError::fs("read link", source, e))?;
    clear_destination(destination)?;
    std::os::unix::fs::symlink(relinked_target(&target, token), destination)
        .map_err(|e| BuildError::fs("link", destination, e))?;
    fs::remove_file(source).map_err(|e| BuildError::fs("remove", source, e))
}

#[cfg(not(unix))]
fn move_link(source: &Path, destination: &Path, _token: Option<&str>) -> Result<(), BuildError> {
    move_file(source, destination)
}
