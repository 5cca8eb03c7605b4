//! Filesystem layout shared by every build unit.
//!
//! All paths are absolute. Build units never change the process working
//! directory; they hand these paths to the tools they invoke.
//!
//! ```text
//! <repo>/
//! ├── native/                      # native sources and public headers
//! │   └── build/                   # top-level CMakeLists.txt, build-<name>-<configuration>/, JUnit-*.xml
//! │       └── toolchains/          # CMake toolchain files
//! └── deployments/
//!     ├── native/                  # staging tree written by the install target
//!     ├── combined/                # combined deployment tree
//!     └── UnityProject/            # host project (plugins, generated bindings)
//! ```

use std::path::{Component, Path, PathBuf};

use crate::types::BuildError;

/// Absolute paths used by build units, the installer and the patchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Repository root every relative configuration path is resolved against.
    pub repo_root: PathBuf,
    /// Root of the native sources and headers.
    pub native_dir: PathBuf,
    /// Directory handed to the project generator as the source tree.
    pub source_dir: PathBuf,
    /// Parent of every unit build directory and test report.
    pub build_root: PathBuf,
    /// Directory holding the CMake toolchain files.
    pub toolchains_dir: PathBuf,
    /// Root of the deployment trees.
    pub deployments_dir: PathBuf,
    /// Host project directory consumed by the packaging step.
    pub host_project_dir: PathBuf,
    /// Plugin directory inside the host project receiving merged iOS libraries.
    pub plugin_dir: PathBuf,
    /// Root of the generated interop sources.
    pub interop_root: PathBuf,
}

impl Layout {
    /// Creates the default layout rooted at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let native = repo_root.join("native");
        let build_root = native.join("build");
        let deployments_dir = repo_root.join("deployments");
        let host_project_dir = deployments_dir.join("UnityProject");
        Self {
            source_dir: build_root.clone(),
            toolchains_dir: build_root.join("toolchains"),
            build_root,
            plugin_dir: host_project_dir.join("Assets/Plugins/iOS"),
            interop_root: host_project_dir.join("Assets/Sdk/detail"),
            host_project_dir,
            deployments_dir,
            repo_root,
            native_dir: native,
        }
    }

    /// Tree the build tool's install target writes into.
    pub fn staging_dir(&self) -> PathBuf {
        self.deployments_dir.join("native")
    }

    /// Combined deployment tree aggregating every unit's artifacts.
    pub fn combined_dir(&self) -> PathBuf {
        self.deployments_dir.join("combined")
    }

    /// Library directory inside the combined tree.
    pub fn combined_lib_dir(&self) -> PathBuf {
        self.combined_dir().join("lib")
    }

    /// Resolves a configured path against the repository root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repo_root.join(path)
        }
    }
}

/// Lexically normalizes `path`, resolving `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Fails with [`BuildError::PathEscape`] unless `path` lies inside `root`.
pub fn ensure_within(root: &Path, path: &Path) -> Result<(), BuildError> {
    if normalize(path).starts_with(normalize(root)) {
        Ok(())
    } else {
        Err(BuildError::PathEscape {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}
