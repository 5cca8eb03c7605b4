//! Configuration file support for nativepack.
//!
//! This module provides support for `nativepack.toml` configuration files,
//! which describe where the native sources live, which platform variants are
//! built and how the generated bindings and release files are post-processed.
//!
//! ## Example Configuration
//!
//! ```toml
//! [project]
//! name = "sdk"
//! configuration = "release"
//!
//! [android]
//! abis = ["armeabi-v7a", "x86"]
//! stls = ["c++_static"]
//!
//! [ios]
//! devices = ["os", "simulator", "simulator64"]
//!
//! [ios.simulators]
//! simulator = "iPhone 4s"
//! simulator64 = "iPhone 6"
//!
//! [release]
//! files = ["native/include/sdk.hpp"]
//! ```
//!
//! ## Configuration Discovery
//!
//! The CLI looks for `nativepack.toml` in the current directory and every
//! parent directory, stopping at the repository root. The directory holding
//! the file is the root all relative paths are resolved against.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use nativepack_sdk::builders::{FatLibrary, IosDeviceType, WindowsArch};
use nativepack_sdk::{
    Configuration, HostOs, InteropOptions, Layout, PackageOptions, PipelineOptions, Platforms,
    SanitizeRoot, UnitSelection, VersionTarget,
};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "nativepack.toml";

/// Build configuration as spelled on the command line and in the config file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum ConfigurationArg {
    Debug,
    #[default]
    Release,
}

impl From<ConfigurationArg> for Configuration {
    fn from(arg: ConfigurationArg) -> Self {
        match arg {
            ConfigurationArg::Debug => Configuration::Debug,
            ConfigurationArg::Release => Configuration::Release,
        }
    }
}

/// Platform selector as spelled on the command line and in the config file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum PlatformsArg {
    #[default]
    All,
    Ios,
    Android,
    Osx,
    Windows,
}

impl From<PlatformsArg> for Platforms {
    fn from(arg: PlatformsArg) -> Self {
        match arg {
            PlatformsArg::All => Platforms::All,
            PlatformsArg::Ios => Platforms::Ios,
            PlatformsArg::Android => Platforms::Android,
            PlatformsArg::Osx => Platforms::Osx,
            PlatformsArg::Windows => Platforms::Windows,
        }
    }
}

/// Root configuration structure for `nativepack.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativepackConfig {
    /// Project layout and defaults.
    pub project: ProjectConfig,

    /// Android units.
    pub android: AndroidConfig,

    /// iOS units and fat libraries.
    pub ios: IosConfig,

    /// Windows units.
    pub windows: WindowsConfig,

    /// Interop binding post-processing.
    pub interop: InteropConfig,

    /// Version declarations patched before every build.
    pub version: VersionConfig,

    /// Files touched by `nativepack bump`.
    pub release: ReleaseConfig,

    /// Whitespace normalization roots.
    pub whitespace: WhitespaceConfig,

    /// Host application package export.
    pub package: PackageConfig,
}

/// Project layout. Relative paths are resolved against the directory that
/// holds the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name, used for display only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Directory handed to the project generator (default: `native/build`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,

    /// Root of the per-unit build directories (default: `native/build`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<PathBuf>,

    /// Toolchain files (default: `<build_dir>/toolchains`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchains_dir: Option<PathBuf>,

    /// Deployment tree (default: `deployments`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployments_dir: Option<PathBuf>,

    /// Default platform selection.
    pub platforms: PlatformsArg,

    /// Default build configuration.
    pub configuration: ConfigurationArg,

    /// Units generated and built concurrently (default: 1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

/// Android configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// ABIs to build, one unit per ABI and STL.
    pub abis: Vec<String>,

    /// C++ runtimes to build against.
    pub stls: Vec<String>,
}

impl Default for AndroidConfig {
    fn default() -> Self {
        let defaults = default_selection();
        Self {
            abis: defaults.android_abis,
            stls: defaults.android_stls,
        }
    }
}

/// One library merged across the iOS device classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatLibraryConfig {
    /// Library file name, e.g. `libsdk.a`.
    pub name: String,

    /// Whether the merged library goes into the combined deployment tree.
    #[serde(default = "default_true")]
    pub deploy: bool,

    /// File name inside the host project's plugin directory, if copied there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl From<&FatLibraryConfig> for FatLibrary {
    fn from(config: &FatLibraryConfig) -> Self {
        let library = FatLibrary::new(&config.name).deploy(config.deploy);
        match &config.plugin_name {
            Some(name) => library.plugin_name(name),
            None => library,
        }
    }
}

/// iOS configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IosConfig {
    /// Device classes merged into the fat libraries, in merge order.
    pub devices: Vec<String>,

    /// Simulator device name per device class.
    pub simulators: BTreeMap<String, String>,

    /// Libraries merged into fat binaries.
    pub fat_libraries: Vec<FatLibraryConfig>,

    /// Host project plugin directory (default: `<host project>/Assets/Plugins/iOS`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,
}

impl Default for IosConfig {
    fn default() -> Self {
        let defaults = default_selection();
        Self {
            devices: defaults
                .ios_devices
                .iter()
                .map(|d| d.as_str().to_string())
                .collect(),
            simulators: defaults
                .ios_simulators
                .iter()
                .map(|(kind, name)| (kind.as_str().to_string(), name.clone()))
                .collect(),
            fat_libraries: defaults
                .fat_libraries
                .iter()
                .map(|lib| FatLibraryConfig {
                    name: lib.name.clone(),
                    deploy: lib.deploy,
                    plugin_name: lib.plugin_name.clone(),
                })
                .collect(),
            plugin_dir: None,
        }
    }
}

/// Windows configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    /// Visual Studio generator name without the architecture suffix.
    pub generator: String,

    /// Architectures to build, one unit each.
    pub archs: Vec<String>,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        let defaults = default_selection();
        Self {
            generator: defaults.windows_generator,
            archs: defaults
                .windows_archs
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        }
    }
}

/// Interop configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteropConfig {
    /// Generated binding sources (default: `<host project>/Assets/Sdk/detail`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Prefix the binding generator puts on every exported entry point.
    pub prefix: String,

    /// Library name resolving to the statically linked process image.
    pub sentinel_library: String,

    /// Preprocessor condition selecting static linkage.
    pub static_condition: String,

    /// Legacy identifiers rewritten to their canonical names.
    pub renames: BTreeMap<String, String>,
}

impl Default for InteropConfig {
    fn default() -> Self {
        let defaults = InteropOptions::new("");
        Self {
            root: None,
            prefix: defaults.prefix,
            sentinel_library: defaults.sentinel_library,
            static_condition: defaults.static_condition,
            renames: BTreeMap::new(),
        }
    }
}

/// A version declaration: file, regular expression and replacement template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionTargetConfig {
    pub path: PathBuf,
    pub pattern: String,
    /// `{version}` is substituted.
    pub replacement: String,
}

/// Version configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// Declarations to patch; the built-in set when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<VersionTargetConfig>>,
}

/// Release configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Files containing the release version exactly once.
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitespaceRootConfig {
    pub dir: PathBuf,
    pub extensions: Vec<String>,
}

/// Whitespace configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitespaceConfig {
    /// Directories to normalize; the built-in set when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Vec<WhitespaceRootConfig>>,
}

/// Package configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Host application executable (default: per host OS, or `$UNITY`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,

    /// Host project directory (default: `<deployments>/UnityProject`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_project: Option<PathBuf>,

    /// Asset folders exported into the package.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,

    /// Package path; `{version}` is substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Log file written by the host application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_selection() -> UnitSelection {
    UnitSelection::new(Platforms::All, Configuration::Release, HostOs::current())
}

impl NativepackConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: NativepackConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from `start_dir`.
    ///
    /// The search stops at the first directory containing `.git`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Saves the configuration to the specified file path.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Path layout rooted at `repo_root` with the configured overrides applied.
    pub fn layout(&self, repo_root: &Path) -> Layout {
        let mut layout = Layout::new(repo_root);
        let project = &self.project;

        if let Some(build_dir) = &project.build_dir {
            layout.build_root = layout.resolve(build_dir);
            layout.source_dir = layout.build_root.clone();
            layout.toolchains_dir = layout.build_root.join("toolchains");
        }
        if let Some(source_dir) = &project.source_dir {
            layout.source_dir = layout.resolve(source_dir);
        }
        if let Some(toolchains_dir) = &project.toolchains_dir {
            layout.toolchains_dir = layout.resolve(toolchains_dir);
        }
        if let Some(deployments_dir) = &project.deployments_dir {
            layout.deployments_dir = layout.resolve(deployments_dir);
            layout.host_project_dir = layout.deployments_dir.join("UnityProject");
        }
        if let Some(host_project) = &self.package.host_project {
            layout.host_project_dir = layout.resolve(host_project);
        }
        layout.plugin_dir = match &self.ios.plugin_dir {
            Some(dir) => layout.resolve(dir),
            None => layout.host_project_dir.join("Assets/Plugins/iOS"),
        };
        layout.interop_root = match &self.interop.root {
            Some(root) => layout.resolve(root),
            None => layout.host_project_dir.join("Assets/Sdk/detail"),
        };
        layout
    }

    /// Unit selection for `platforms` and `configuration` on `host`.
    pub fn selection(
        &self,
        platforms: Platforms,
        configuration: Configuration,
        host: HostOs,
    ) -> Result<UnitSelection> {
        let mut selection = UnitSelection::new(platforms, configuration, host);

        selection.ios_devices = self
            .ios
            .devices
            .iter()
            .map(|name| parse_device(name))
            .collect::<Result<_>>()?;
        selection.ios_simulators = self
            .ios
            .simulators
            .iter()
            .map(|(kind, name)| Ok((parse_device(kind)?, name.clone())))
            .collect::<Result<_>>()?;
        selection.fat_libraries = self.ios.fat_libraries.iter().map(FatLibrary::from).collect();

        selection.android_abis = self.android.abis.clone();
        selection.android_stls = self.android.stls.clone();

        selection.windows_generator = self.windows.generator.clone();
        selection.windows_archs = self
            .windows
            .archs
            .iter()
            .map(|name| {
                WindowsArch::parse(name)
                    .with_context(|| format!("unknown Windows architecture '{}' in [windows]", name))
            })
            .collect::<Result<_>>()?;

        Ok(selection)
    }

    /// Interop patcher options for `layout`.
    pub fn interop_options(&self, layout: &Layout) -> InteropOptions {
        let mut options = InteropOptions::new(&layout.interop_root);
        options.prefix = self.interop.prefix.clone();
        options.sentinel_library = self.interop.sentinel_library.clone();
        options.static_condition = self.interop.static_condition.clone();
        options.renames = self
            .interop
            .renames
            .iter()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        options
    }

    /// Version declarations to patch, resolved against `layout`.
    pub fn version_targets(&self, layout: &Layout) -> Vec<VersionTarget> {
        match &self.version.targets {
            Some(targets) => targets
                .iter()
                .map(|t| VersionTarget::new(layout.resolve(&t.path), &t.pattern, &t.replacement))
                .collect(),
            None => nativepack_sdk::version::default_targets(layout),
        }
    }

    /// Whitespace roots, resolved against `layout`.
    pub fn sanitize_roots(&self, layout: &Layout) -> Vec<SanitizeRoot> {
        match &self.whitespace.roots {
            Some(roots) => roots
                .iter()
                .map(|r| SanitizeRoot::new(layout.resolve(&r.dir), r.extensions.clone()))
                .collect(),
            None => nativepack_sdk::whitespace::default_roots(layout),
        }
    }

    /// Release files, resolved against `layout`.
    pub fn release_files(&self, layout: &Layout) -> Vec<PathBuf> {
        self.release.files.iter().map(|f| layout.resolve(f)).collect()
    }

    /// Package export options for `layout`.
    pub fn package_options(&self, layout: &Layout) -> PackageOptions {
        let mut options = PackageOptions::new(layout);
        if let Some(executable) = &self.package.executable {
            options.executable = executable.clone();
        }
        if !self.package.assets.is_empty() {
            options.assets = self.package.assets.clone();
        }
        if let Some(output) = &self.package.output {
            options.output = layout.resolve(output);
        }
        if let Some(log_file) = &self.package.log_file {
            options.log_file = layout.resolve(log_file);
        }
        options
    }

    /// Complete pipeline options for `layout` and `selection`.
    pub fn pipeline_options(&self, layout: &Layout, selection: UnitSelection) -> PipelineOptions {
        let mut options = PipelineOptions::new(layout, selection);
        options.jobs = self.project.jobs.unwrap_or(1);
        options.version_targets = self.version_targets(layout);
        options.interop = self.interop_options(layout);
        options.sanitize_roots = self.sanitize_roots(layout);
        options.package = Some(self.package_options(layout));
        options
    }

    /// Generates a starter configuration file as a formatted TOML string.
    ///
    /// This includes comments explaining each configuration option.
    pub fn generate_starter_toml(project_name: &str) -> String {
        format!(
            r#"# nativepack configuration file
# CLI flags override these settings when provided.
# Relative paths are resolved against the directory holding this file.

[project]
name = "{project_name}"

# Default platform selection: all, ios, android, osx or windows
platforms = "all"

# Default build configuration: debug or release
configuration = "release"

# Units generated and built concurrently (default: 1)
# jobs = 4

# Layout overrides
# build_dir = "native/build"
# deployments_dir = "deployments"

[android]
abis = ["armeabi-v7a", "x86"]
stls = ["c++_static"]

[ios]
# Device classes merged into fat libraries, in merge order
devices = ["os", "simulator", "simulator64"]

[ios.simulators]
simulator = "iPhone 4s"
simulator64 = "iPhone 6"

[[ios.fat_libraries]]
name = "libsdk.a"

[[ios.fat_libraries]]
name = "libSdkBindings.a"
deploy = false
plugin_name = "SdkBindings.a"

[windows]
generator = "Visual Studio 14 2015"
archs = ["win32", "win64"]

[interop]
# root = "deployments/UnityProject/Assets/Sdk/detail"
prefix = "CSharp_"

# Legacy identifiers rewritten to their canonical names
[interop.renames]

[release]
# Files containing the release version exactly once
files = []

[package]
# executable = "/Applications/Unity/Unity.app/Contents/MacOS/Unity"
assets = ["Assets/Sdk", "Assets/Plugins"]
"#,
            project_name = project_name,
        )
    }
}

fn parse_device(name: &str) -> Result<IosDeviceType> {
    match IosDeviceType::parse(name) {
        Some(device) => Ok(device),
        None => bail!(
            "unknown iOS device class '{}' in [ios], expected os, simulator or simulator64",
            name
        ),
    }
}

/// Configuration resolver that merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<NativepackConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a new resolver by discovering and loading configuration.
    pub fn new() -> Result<Self> {
        match NativepackConfig::discover()? {
            Some((config, path)) => Ok(Self {
                config: Some(config),
                config_path: Some(path),
            }),
            None => Ok(Self::default()),
        }
    }

    /// The loaded configuration, or the defaults.
    pub fn config(&self) -> NativepackConfig {
        self.config.clone().unwrap_or_default()
    }

    /// Directory holding the config file, else `fallback`.
    pub fn repo_root(&self, fallback: &Path) -> PathBuf {
        self.config_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| fallback.to_path_buf())
    }

    /// Resolves a CLI value, using config as fallback.
    ///
    /// # Returns
    ///
    /// The resolved value, preferring CLI over config over default.
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&NativepackConfig) -> Option<T>,
    {
        cli_value
            .or_else(|| self.config.as_ref().and_then(config_getter))
            .unwrap_or(default)
    }
}
