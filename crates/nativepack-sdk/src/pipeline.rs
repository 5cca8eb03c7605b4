//! Build orchestration.
//!
//! The pipeline selects the build units the host can produce, validates every
//! required executable before touching the filesystem, and then runs:
//!
//! ```text
//! version patch → generate (all) → build (all) → tests → whitespace
//!   → install (all) → interop patch → whitespace → build metadata → package
//! ```
//!
//! Generate and build may fan out over worker threads since every unit owns a
//! private build directory. Tests and installation always run sequentially:
//! devices are shared, and every unit installs into the same combined tree.

use std::path::PathBuf;

use rayon::prelude::*;
use tracing::info;

use crate::builders::{
    AndroidBuild, BuildContext, BuildUnit, FatLibrary, IosBuild, IosDeviceType, IosFatBuild,
    OsxBuild, TestReport, WindowsArch, WindowsBuild,
};
use crate::install::InstalledArtifact;
use crate::interop::{InteropOptions, PatchSummary, patch_interop};
use crate::layout::Layout;
use crate::meta::BuildMeta;
use crate::package::{PackageOptions, export_package};
use crate::types::{BuildError, Configuration, HostOs, Platforms};
use crate::version::{DRY_RUN_VERSION, VersionTarget, default_targets, derive_version, patch_versions};
use crate::whitespace::{SanitizeRoot, default_roots, sanitize};

/// Executables every run needs.
pub const BASE_TOOLS: &[&str] = &["cmake", "swig", "git"];

/// Which units to build, and how each platform family is split into units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSelection {
    pub platforms: Platforms,
    pub configuration: Configuration,
    pub host: HostOs,
    /// iOS device classes merged into the fat libraries, in merge order.
    pub ios_devices: Vec<IosDeviceType>,
    /// Simulator device name used to test each simulator class.
    pub ios_simulators: Vec<(IosDeviceType, String)>,
    pub fat_libraries: Vec<FatLibrary>,
    pub android_abis: Vec<String>,
    pub android_stls: Vec<String>,
    pub windows_archs: Vec<WindowsArch>,
    pub windows_generator: String,
}

impl UnitSelection {
    pub fn new(platforms: Platforms, configuration: Configuration, host: HostOs) -> Self {
        Self {
            platforms,
            configuration,
            host,
            ios_devices: vec![
                IosDeviceType::Os,
                IosDeviceType::Simulator,
                IosDeviceType::Simulator64,
            ],
            ios_simulators: vec![
                (IosDeviceType::Simulator, "iPhone 4s".to_string()),
                (IosDeviceType::Simulator64, "iPhone 6".to_string()),
            ],
            fat_libraries: default_fat_libraries(),
            android_abis: vec!["armeabi-v7a".to_string(), "x86".to_string()],
            android_stls: vec!["c++_static".to_string()],
            windows_archs: vec![WindowsArch::Win32, WindowsArch::Win64],
            windows_generator: crate::builders::desktop::DEFAULT_VS_GENERATOR.to_string(),
        }
    }
}

/// The core library goes to the combined tree; the binding library only to
/// the host project's plugin directory.
pub fn default_fat_libraries() -> Vec<FatLibrary> {
    vec![
        FatLibrary::new("libsdk.a"),
        FatLibrary::new("libSdkBindings.a")
            .deploy(false)
            .plugin_name("SdkBindings.a"),
    ]
}

fn ios_unit(selection: &UnitSelection, device_type: IosDeviceType) -> IosBuild {
    let unit = IosBuild::new(device_type, selection.configuration);
    match selection
        .ios_simulators
        .iter()
        .find(|(kind, _)| *kind == device_type)
    {
        Some((_, name)) => unit.simulator(name.clone()),
        None => unit,
    }
}

/// Units the host can build for the requested platforms, in build order.
pub fn select_units(selection: &UnitSelection) -> Result<Vec<BuildUnit>, BuildError> {
    let wants = |family| selection.platforms.includes(family);
    let configuration = selection.configuration;
    let mut units = Vec::new();

    let android = |units: &mut Vec<BuildUnit>| {
        for abi in &selection.android_abis {
            for stl in &selection.android_stls {
                units.push(BuildUnit::Android(AndroidBuild::new(
                    abi.clone(),
                    stl.clone(),
                    configuration,
                )));
            }
        }
    };

    match selection.host {
        HostOs::MacOs => {
            if wants(Platforms::Osx) {
                units.push(BuildUnit::Osx(OsxBuild::new(configuration)));
            }
            if wants(Platforms::Ios) {
                let children = selection
                    .ios_devices
                    .iter()
                    .map(|device| ios_unit(selection, *device))
                    .collect();
                units.push(BuildUnit::IosFat(IosFatBuild::new(
                    configuration,
                    children,
                    selection.fat_libraries.clone(),
                )));
            }
            if wants(Platforms::Android) {
                android(&mut units);
            }
        }
        HostOs::Windows => {
            if wants(Platforms::Windows) {
                for arch in &selection.windows_archs {
                    units.push(BuildUnit::Windows(
                        WindowsBuild::new(*arch, configuration).generator(&selection.windows_generator),
                    ));
                }
            }
        }
        HostOs::Linux => {
            if wants(Platforms::Android) {
                android(&mut units);
            }
        }
        HostOs::Other => {}
    }

    if units.is_empty() {
        return Err(BuildError::Config(format!(
            "no build units for platforms '{}' on a {} host",
            selection.platforms.as_str(),
            selection.host.as_str()
        )));
    }
    Ok(units)
}

/// Every executable `units` need, without duplicates.
pub fn required_tools(units: &[BuildUnit]) -> Vec<&'static str> {
    let mut tools: Vec<&'static str> = BASE_TOOLS.to_vec();
    for tool in units.iter().flat_map(|u| u.required_tools().iter().copied()) {
        if !tools.contains(&tool) {
            tools.push(tool);
        }
    }
    tools
}

/// Everything one pipeline run needs besides the build context.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub selection: UnitSelection,
    pub run_tests: bool,
    /// Units generated and built concurrently.
    pub jobs: usize,
    /// Explicit version; derived from source control when `None`.
    pub sdk_version: Option<String>,
    pub version_targets: Vec<VersionTarget>,
    pub interop: InteropOptions,
    pub sanitize_roots: Vec<SanitizeRoot>,
    /// Package export settings; `None` skips packaging.
    pub package: Option<PackageOptions>,
}

impl PipelineOptions {
    /// Defaults for `layout`.
    pub fn new(layout: &Layout, selection: UnitSelection) -> Self {
        Self {
            selection,
            run_tests: true,
            jobs: 1,
            sdk_version: None,
            version_targets: default_targets(layout),
            interop: InteropOptions::new(&layout.interop_root),
            sanitize_roots: default_roots(layout),
            package: Some(PackageOptions::new(layout)),
        }
    }
}

/// What a pipeline run produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub version: String,
    pub units: Vec<String>,
    pub tests: Vec<TestReport>,
    pub installed: Vec<InstalledArtifact>,
    /// `None` when the interop patch was skipped.
    pub interop: Option<PatchSummary>,
    pub meta: Option<PathBuf>,
    pub package: Option<PathBuf>,
}

/// Runs `step` for every unit, on up to `jobs` worker threads.
///
/// With a single job the units run in order on the calling thread.
fn for_each_unit<F>(units: &[BuildUnit], jobs: usize, step: F) -> Result<(), BuildError>
where
    F: Fn(&BuildUnit) -> Result<(), BuildError> + Send + Sync,
{
    if jobs <= 1 || units.len() <= 1 {
        return units.iter().try_for_each(step);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.min(units.len()))
        .build()
        .map_err(|e| BuildError::Config(format!("failed to start build workers: {}", e)))?;
    pool.install(|| units.par_iter().try_for_each(|unit| step(unit)))
}

/// The full build orchestration.
#[derive(Debug)]
pub struct Pipeline {
    ctx: BuildContext,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(ctx: BuildContext, options: PipelineOptions) -> Self {
        Self { ctx, options }
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Runs every step; the first failure stops the run.
    pub fn run(&mut self) -> Result<PipelineReport, BuildError> {
        let units = select_units(&self.options.selection)?;
        let tools = required_tools(&units);
        let found = self.ctx.exec.require(&tools)?;
        if self.ctx.swig.is_none()
            && let Some((_, swig)) = found.iter().find(|(name, _)| name == "swig")
        {
            self.ctx.swig = Some(swig.clone());
        }

        let ctx = &self.ctx;
        let options = &self.options;
        let dry_run = ctx.exec.is_dry_run();
        let jobs = options.jobs.max(1);

        let version = match &options.sdk_version {
            Some(version) => version.clone(),
            None if dry_run => DRY_RUN_VERSION.to_string(),
            None => derive_version(&ctx.exec, &ctx.layout.repo_root)?,
        };
        patch_versions(&options.version_targets, &version, dry_run)?;

        let names: Vec<String> = units.iter().map(|u| u.name().to_string()).collect();
        info!("building {} units: {}", units.len(), names.join(", "));

        for_each_unit(&units, jobs, |unit| unit.generate_project(ctx))?;
        for_each_unit(&units, jobs, |unit| unit.build(ctx))?;

        let mut tests = Vec::new();
        if options.run_tests {
            for unit in &units {
                tests.extend(unit.run_tests(ctx)?);
            }
        } else {
            info!("skipping tests");
        }

        sanitize(&options.sanitize_roots, dry_run)?;

        let mut installed = Vec::new();
        for unit in &units {
            installed.extend(unit.install(ctx)?);
        }

        let interop = if dry_run && !options.interop.root.exists() {
            info!(
                "[dry-run] interop root {} does not exist yet, skipping patch",
                options.interop.root.display()
            );
            None
        } else {
            Some(patch_interop(options.interop.clone(), dry_run)?)
        };

        sanitize(&options.sanitize_roots, dry_run)?;

        let meta = if dry_run {
            None
        } else {
            let meta = BuildMeta::collect(
                &ctx.layout.repo_root,
                &version,
                names.clone(),
                options.selection.configuration,
                options.run_tests,
            );
            Some(meta.write_to(&ctx.layout.combined_dir())?)
        };

        let package = match &options.package {
            Some(package) => Some(export_package(&ctx.exec, package, &version)?),
            None => None,
        };

        Ok(PipelineReport {
            version,
            units: names,
            tests,
            installed,
            interop,
            meta,
            package,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::TestOutcome;
    use crate::executor::Executor;

    fn selection(platforms: Platforms, host: HostOs) -> UnitSelection {
        UnitSelection::new(platforms, Configuration::Release, host)
    }

    fn names(units: &[BuildUnit]) -> Vec<&str> {
        units.iter().map(|u| u.name()).collect()
    }

    #[test]
    fn mac_host_builds_desktop_ios_and_android() {
        let units = select_units(&selection(Platforms::All, HostOs::MacOs)).unwrap();
        assert_eq!(
            names(&units),
            vec![
                "osx",
                "ios-fat",
                "android-armeabi-v7a-c++_static",
                "android-x86-c++_static"
            ]
        );
        let ios = select_units(&selection(Platforms::Ios, HostOs::MacOs)).unwrap();
        assert_eq!(names(&ios), vec!["ios-fat"]);
    }

    #[test]
    fn windows_host_builds_both_architectures() {
        let units = select_units(&selection(Platforms::All, HostOs::Windows)).unwrap();
        assert_eq!(names(&units), vec!["windows-win32", "windows-win64"]);
    }

    #[test]
    fn unsupported_selection_is_an_error() {
        let err = select_units(&selection(Platforms::Ios, HostOs::Windows)).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
        assert!(select_units(&selection(Platforms::All, HostOs::Other)).is_err());
    }

    #[test]
    fn tools_are_collected_once() {
        let units = select_units(&selection(Platforms::All, HostOs::MacOs)).unwrap();
        assert_eq!(
            required_tools(&units),
            vec!["cmake", "swig", "git", "xcodebuild", "xcrun", "lipo", "adb"]
        );
    }

    #[test]
    fn missing_tool_stops_before_any_directory_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let exec = Executor::new().with_search_path(Vec::new());
        let options = PipelineOptions::new(&layout, selection(Platforms::All, HostOs::Windows));
        let mut pipeline = Pipeline::new(BuildContext::new(exec, layout.clone()), options);

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, BuildError::MissingTool { ref tool } if tool == "cmake"));
        assert!(!layout.build_root.exists());
        assert!(!layout.deployments_dir.exists());
        assert!(pipeline.context().exec.history().is_empty());
    }

    #[cfg(unix)]
    fn fake_tools(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            crate::executor::write_stub_tool(dir.path(), name, "exit 0");
        }
        dir
    }

    #[cfg(unix)]
    #[test]
    fn dry_run_sequences_every_step() {
        let tools = fake_tools(&["cmake", "swig", "git", "xcodebuild", "xcrun", "lipo", "adb"]);
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let exec = Executor::new()
            .dry_run(true)
            .with_search_path(vec![tools.path().to_path_buf()]);
        let ctx = BuildContext::new(exec, layout.clone()).android_ndk("/opt/ndk");

        let mut options = PipelineOptions::new(&layout, selection(Platforms::All, HostOs::MacOs));
        options.version_targets = Vec::new();
        options.package = None;
        options.sdk_version = Some("1.2.3".to_string());

        let mut pipeline = Pipeline::new(ctx, options);
        let report = pipeline.run().unwrap();
        assert_eq!(report.version, "1.2.3");
        assert_eq!(report.units.len(), 4);
        assert!(report.interop.is_none());
        assert!(report.meta.is_none());

        let skipped: Vec<&str> = report
            .tests
            .iter()
            .filter(|r| matches!(r.outcome, TestOutcome::Skipped { .. }))
            .map(|r| r.unit.as_str())
            .collect();
        assert_eq!(
            skipped,
            vec!["ios-os", "ios-simulator", "ios-simulator64", "android-x86-c++_static"]
        );

        let history = pipeline.context().exec.history();
        let is_install = |args: &[String]| args.ends_with(&["--target".to_string(), "install".to_string()]);
        let first_install = history.iter().position(|i| is_install(&i.args)).unwrap();
        let last_pull = history.iter().rposition(|i| i.args.first().is_some_and(|a| a == "pull")).unwrap();
        assert!(last_pull < first_install);
        assert_eq!(history.iter().filter(|i| is_install(&i.args)).count(), 6);
        assert!(history[0].args[0].starts_with("-G"));

        // Dry runs never create directories.
        assert!(!layout.build_root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn parallel_jobs_run_every_unit() {
        let tools = fake_tools(&["cmake", "swig", "git"]);
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let exec = Executor::new()
            .dry_run(true)
            .with_search_path(vec![tools.path().to_path_buf()]);

        let mut options = PipelineOptions::new(&layout, selection(Platforms::Windows, HostOs::Windows));
        options.jobs = 4;
        options.run_tests = false;
        options.version_targets = Vec::new();
        options.package = None;

        let mut pipeline = Pipeline::new(BuildContext::new(exec, layout), options);
        let report = pipeline.run().unwrap();
        assert_eq!(report.version, DRY_RUN_VERSION);
        assert!(report.tests.is_empty());

        let history = pipeline.context().exec.history();
        let mut generated: Vec<String> = history
            .iter()
            .filter(|i| i.args.first().is_some_and(|a| a.starts_with("-G")))
            .map(|i| i.args[0].clone())
            .collect();
        generated.sort();
        assert_eq!(
            generated,
            vec!["-GVisual Studio 14 2015", "-GVisual Studio 14 2015 Win64"]
        );
        // Installation stays sequential and in unit order.
        let installs: Vec<String> = history
            .iter()
            .filter(|i| i.args.last().is_some_and(|a| a == "install"))
            .map(|i| i.args[1].clone())
            .collect();
        assert!(installs[0].ends_with("build-windows-win32-release"));
        assert!(installs[1].ends_with("build-windows-win64-release"));
    }
}
