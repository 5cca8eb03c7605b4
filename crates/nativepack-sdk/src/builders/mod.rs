//! Build units for every supported platform family.
//!
//! A build unit owns one (platform variant, configuration) lifecycle:
//!
//! 1. **generate_project** - create the private build directory and run the project generator
//! 2. **build** - run the build tool for the unit's configuration
//! 3. **run_tests** - run the test binary locally, in a simulator or on a device
//! 4. **install** - move artifacts into the combined deployment tree
//!
//! ## Units
//!
//! | Unit | Platform | Tests |
//! |------|----------|-------|
//! | [`IosBuild`] | iOS device / simulators | `xcrun simctl spawn` (simulators only) |
//! | [`IosFatBuild`] | iOS, merged with `lipo` | delegated to children |
//! | [`AndroidBuild`] | Android, per ABI and STL | pushed with `adb` |
//! | [`OsxBuild`] | macOS | local binary |
//! | [`WindowsBuild`] | Windows, per architecture | local binary (not ARM) |
//!
//! The set of variants is closed, so dispatch goes through the [`BuildUnit`]
//! enum rather than trait objects.
//!
//! ## Example
//!
//! ```ignore
//! use nativepack_sdk::builders::{BuildContext, BuildUnit, OsxBuild};
//! use nativepack_sdk::{Configuration, Executor, Layout};
//!
//! let ctx = BuildContext::new(Executor::new().dry_run(true), Layout::new("."));
//! let unit = BuildUnit::Osx(OsxBuild::new(Configuration::Release));
//! let reports = unit.run(&ctx)?;
//! # Ok::<(), nativepack_sdk::BuildError>(())
//! ```

pub mod android;
pub mod common;
pub mod desktop;
pub mod fat;
pub mod ios;

use std::path::PathBuf;

use tracing::warn;

use crate::install::InstalledArtifact;
use crate::types::{BuildError, Configuration, Platforms};

pub use android::AndroidBuild;
pub use common::{BuildContext, TestBinary, UnitId};
pub use desktop::{OsxBuild, WindowsArch, WindowsBuild};
pub use fat::{FatLibrary, IosFatBuild};
pub use ios::{IosBuild, IosDeviceType, SimDevice, SimState, SimulatorSession};

/// Result of one unit's test step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    /// Tests ran and wrote a machine-readable report.
    Passed { report: PathBuf },
    /// Tests could not run here; the run continues.
    Skipped { reason: String },
}

/// Test outcome attributed to a unit name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub unit: String,
    pub outcome: TestOutcome,
}

/// One selected build unit.
#[derive(Debug, Clone)]
pub enum BuildUnit {
    Ios(IosBuild),
    IosFat(IosFatBuild),
    Osx(OsxBuild),
    Android(AndroidBuild),
    Windows(WindowsBuild),
}

impl BuildUnit {
    pub fn id(&self) -> &UnitId {
        match self {
            BuildUnit::Ios(u) => u.id(),
            BuildUnit::IosFat(u) => u.id(),
            BuildUnit::Osx(u) => u.id(),
            BuildUnit::Android(u) => u.id(),
            BuildUnit::Windows(u) => u.id(),
        }
    }

    pub fn name(&self) -> &str {
        self.id().name()
    }

    pub fn configuration(&self) -> Configuration {
        self.id().configuration()
    }

    /// Platform family this unit belongs to.
    pub fn family(&self) -> Platforms {
        match self {
            BuildUnit::Ios(_) | BuildUnit::IosFat(_) => Platforms::Ios,
            BuildUnit::Osx(_) => Platforms::Osx,
            BuildUnit::Android(_) => Platforms::Android,
            BuildUnit::Windows(_) => Platforms::Windows,
        }
    }

    /// External executables this unit needs besides the common ones.
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            BuildUnit::Ios(_) => &["xcodebuild", "xcrun"],
            BuildUnit::IosFat(_) => &["xcodebuild", "xcrun", "lipo"],
            BuildUnit::Osx(_) => &["xcodebuild"],
            BuildUnit::Android(_) => &["adb"],
            BuildUnit::Windows(_) => &[],
        }
    }

    /// Build directories owned by this unit, children included.
    pub fn build_dirs(&self, ctx: &BuildContext) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let BuildUnit::IosFat(fat) = self {
            dirs.extend(fat.children().iter().map(|c| c.id().build_dir(&ctx.layout)));
        }
        dirs.push(self.id().build_dir(&ctx.layout));
        dirs
    }

    pub fn generate_project(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        match self {
            BuildUnit::Ios(u) => u.generate_project(ctx),
            BuildUnit::IosFat(u) => u.generate_project(ctx),
            BuildUnit::Osx(u) => u.generate_project(ctx),
            BuildUnit::Android(u) => u.generate_project(ctx),
            BuildUnit::Windows(u) => u.generate_project(ctx),
        }
    }

    pub fn build(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        match self {
            BuildUnit::Ios(u) => u.build(ctx),
            BuildUnit::IosFat(u) => u.build(ctx),
            BuildUnit::Osx(u) => u.build(ctx),
            BuildUnit::Android(u) => u.build(ctx),
            BuildUnit::Windows(u) => u.build(ctx),
        }
    }

    /// Runs the unit's tests.
    ///
    /// A missing device or simulator is reported as a skip; every other
    /// error is fatal.
    pub fn run_tests(&self, ctx: &BuildContext) -> Result<Vec<TestReport>, BuildError> {
        let single = |outcome: Result<TestOutcome, BuildError>| -> Result<Vec<TestReport>, BuildError> {
            let outcome = match outcome {
                Err(BuildError::DeviceUnavailable(reason)) => TestOutcome::Skipped { reason },
                other => other?,
            };
            Ok(vec![TestReport {
                unit: self.name().to_string(),
                outcome,
            }])
        };

        let reports = match self {
            BuildUnit::Ios(u) => single(u.run_tests(ctx))?,
            BuildUnit::IosFat(u) => u
                .run_tests(ctx)?
                .into_iter()
                .map(|(unit, outcome)| TestReport { unit, outcome })
                .collect(),
            BuildUnit::Osx(u) => single(u.run_tests(ctx))?,
            BuildUnit::Android(u) => single(u.run_tests(ctx))?,
            BuildUnit::Windows(u) => single(u.run_tests(ctx))?,
        };

        for report in &reports {
            if let TestOutcome::Skipped { reason } = &report.outcome {
                warn!("[{}] skipping tests: {}", report.unit, reason);
            }
        }
        Ok(reports)
    }

    pub fn install(&self, ctx: &BuildContext) -> Result<Vec<InstalledArtifact>, BuildError> {
        match self {
            BuildUnit::Ios(u) => u.install(ctx),
            BuildUnit::IosFat(u) => u.install(ctx),
            BuildUnit::Osx(u) => u.install(ctx),
            BuildUnit::Android(u) => u.install(ctx),
            BuildUnit::Windows(u) => u.install(ctx),
        }
    }

    pub fn clean(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        match self {
            BuildUnit::Ios(u) => u.clean(ctx),
            BuildUnit::IosFat(u) => u.clean(ctx),
            BuildUnit::Osx(u) => u.clean(ctx),
            BuildUnit::Android(u) => u.clean(ctx),
            BuildUnit::Windows(u) => u.clean(ctx),
        }
    }

    /// generate → build → tests; a failing step stops the sequence.
    pub fn run(&self, ctx: &BuildContext) -> Result<Vec<TestReport>, BuildError> {
        self.generate_project(ctx)?;
        self.build(ctx)?;
        self.run_tests(ctx)
    }
}
