//! Common utilities shared between the platform build variants.
//!
//! This module owns the naming conventions every unit follows
//! (`build-<name>-<configuration>` directories, `JUnit-<name>-<configuration>.xml`
//! reports), the project-generator and build-tool command shapes, and the
//! install step shared by all single-architecture units.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::executor::{Executor, ToolCommand};
use crate::install::{InstalledArtifact, artifact_token, install_tree};
use crate::layout::Layout;
use crate::types::{BuildError, Configuration};

/// Identity of a build unit: a unique name plus its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId {
    name: String,
    configuration: Configuration,
}

impl UnitId {
    pub fn new(name: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            name: name.into(),
            configuration,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn configuration(&self) -> Configuration {
        self.configuration
    }

    /// `build-<name>-<configuration>`
    pub fn build_dir_name(&self) -> String {
        format!("build-{}-{}", self.name, self.configuration.lowercase())
    }

    /// `JUnit-<name>-<configuration>.xml`
    pub fn report_name(&self) -> String {
        format!("JUnit-{}-{}.xml", self.name, self.configuration.lowercase())
    }

    /// Private build directory of this unit.
    pub fn build_dir(&self, layout: &Layout) -> PathBuf {
        layout.build_root.join(self.build_dir_name())
    }

    /// Test report written by this unit's test step.
    pub fn report_path(&self, layout: &Layout) -> PathBuf {
        layout.build_root.join(self.report_name())
    }

    /// Token injected into installed library names.
    pub fn token(&self) -> String {
        artifact_token(&self.name, self.configuration)
    }
}

/// Location of the compiled test binary inside a unit's build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestBinary {
    /// Directory relative to the build directory, e.g. `bin/sdk`.
    pub subdir: PathBuf,
    /// Executable name without extension.
    pub name: String,
}

impl Default for TestBinary {
    fn default() -> Self {
        Self {
            subdir: PathBuf::from("bin/sdk"),
            name: "SdkTests".to_string(),
        }
    }
}

/// Everything a build unit needs besides its own identity.
#[derive(Debug)]
pub struct BuildContext {
    pub exec: Executor,
    pub layout: Layout,
    /// Interop binding generator handed to the project generator.
    pub swig: Option<PathBuf>,
    /// Android NDK root.
    pub android_ndk: Option<PathBuf>,
    pub test_binary: TestBinary,
    /// Parallel jobs passed to build tools that need an explicit value.
    pub build_jobs: usize,
    /// CoreSimulator device directory; `~/Library/Developer/CoreSimulator/Devices` when unset.
    pub simulator_devices_dir: Option<PathBuf>,
}

impl BuildContext {
    pub fn new(exec: Executor, layout: Layout) -> Self {
        let build_jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8);
        Self {
            exec,
            layout,
            swig: None,
            android_ndk: None,
            test_binary: TestBinary::default(),
            build_jobs,
            simulator_devices_dir: None,
        }
    }

    pub fn swig(mut self, swig: impl Into<PathBuf>) -> Self {
        self.swig = Some(swig.into());
        self
    }

    pub fn android_ndk(mut self, ndk: impl Into<PathBuf>) -> Self {
        self.android_ndk = Some(ndk.into());
        self
    }

    pub fn simulator_devices_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.simulator_devices_dir = Some(dir.into());
        self
    }

    pub fn test_binary(mut self, test_binary: TestBinary) -> Self {
        self.test_binary = test_binary;
        self
    }

    /// `-DSWIG_EXECUTABLE=...`, falling back to a bare `swig`.
    pub(crate) fn swig_define(&self) -> OsString {
        let mut define = OsString::from("-DSWIG_EXECUTABLE=");
        match &self.swig {
            Some(path) => define.push(path),
            None => define.push("swig"),
        }
        define
    }

    /// `-DCMAKE_TOOLCHAIN_FILE=<toolchains>/<file>`
    pub(crate) fn toolchain_define(&self, file: &str) -> OsString {
        let mut define = OsString::from("-DCMAKE_TOOLCHAIN_FILE=");
        define.push(self.layout.toolchains_dir.join(file));
        define
    }

    /// Creates `dir` (and parents) unless running dry.
    pub(crate) fn create_dir(&self, dir: &Path) -> Result<(), BuildError> {
        if self.exec.is_dry_run() {
            return Ok(());
        }
        fs::create_dir_all(dir).map_err(|e| BuildError::fs("create directory", dir, e))
    }

    /// Removes `path` if present unless running dry.
    pub(crate) fn remove_path(&self, path: &Path) -> Result<(), BuildError> {
        if self.exec.is_dry_run() || !path.exists() {
            return Ok(());
        }
        if path.is_dir() {
            fs::remove_dir_all(path).map_err(|e| BuildError::fs("remove", path, e))
        } else {
            fs::remove_file(path).map_err(|e| BuildError::fs("remove", path, e))
        }
    }
}

/// Project generator invocation: `cmake <args...> <source_dir>` inside `build_dir`.
pub fn cmake_generate(ctx: &BuildContext, build_dir: &Path, args: Vec<OsString>) -> ToolCommand {
    ToolCommand::new("cmake")
        .args(args)
        .arg(&ctx.layout.source_dir)
        .current_dir(build_dir)
}

/// Build tool invocation: `cmake --build <build_dir> --config <configuration>`.
pub fn cmake_build(build_dir: &Path, configuration: Configuration) -> ToolCommand {
    ToolCommand::new("cmake")
        .arg("--build")
        .arg(build_dir)
        .arg("--config")
        .arg(configuration.as_str())
        .current_dir(build_dir)
}

/// `--gtest_output=xml:<report>`
pub fn gtest_output_arg(report: impl AsRef<Path>) -> OsString {
    let mut arg = OsString::from("--gtest_output=xml:");
    arg.push(report.as_ref());
    arg
}

/// Creates the unit's build directory and runs the project generator in it.
///
/// Re-running against an existing directory reconfigures it.
pub fn generate_in(
    ctx: &BuildContext,
    id: &UnitId,
    args: Vec<OsString>,
) -> Result<(), BuildError> {
    let build_dir = id.build_dir(&ctx.layout);
    info!("[{}] generating project in {}", id.name(), build_dir.display());
    ctx.create_dir(&build_dir)?;
    ctx.exec.run(&cmake_generate(ctx, &build_dir, args))
}

/// Runs the build tool for a single-architecture unit.
pub fn build_in(ctx: &BuildContext, id: &UnitId, extra: &[String]) -> Result<(), BuildError> {
    let build_dir = id.build_dir(&ctx.layout);
    info!("[{}] building {}", id.name(), id.configuration());
    let mut cmd = cmake_build(&build_dir, id.configuration());
    if !extra.is_empty() {
        cmd = cmd.arg("--").args(extra);
    }
    ctx.exec.run(&cmd)
}

/// Installs a single-architecture unit into the combined deployment tree.
///
/// The staging tree is cleared first so the walk only sees artifacts the
/// install target just produced for this unit.
pub fn install_unit(ctx: &BuildContext, id: &UnitId) -> Result<Vec<InstalledArtifact>, BuildError> {
    let staging = ctx.layout.staging_dir();
    let combined = ctx.layout.combined_dir();
    let build_dir = id.build_dir(&ctx.layout);

    info!("[{}] installing into {}", id.name(), combined.display());
    ctx.remove_path(&staging)?;
    ctx.exec
        .run(&cmake_build(&build_dir, id.configuration()).args(["--target", "install"]))?;

    if ctx.exec.is_dry_run() {
        info!("[dry-run] would move {} into {}", staging.display(), combined.display());
        return Ok(Vec::new());
    }
    install_tree(&staging, &combined, &id.token())
}

/// Removes the unit's build directory and any stale report.
pub fn clean_unit(ctx: &BuildContext, id: &UnitId) -> Result<(), BuildError> {
    info!("[{}] cleaning", id.name());
    ctx.remove_path(&id.build_dir(&ctx.layout))?;
    ctx.remove_path(&id.report_path(&ctx.layout))
}
