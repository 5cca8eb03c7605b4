//! # nativepack
//!
//! Command-line tool for building one native SDK for every platform and
//! packaging it for a host application.
//!
//! ## Overview
//!
//! `nativepack` is the CLI over [`nativepack_sdk`]. It handles:
//!
//! - **Building** - generates and builds every platform variant the host can produce
//! - **Testing** - runs the native test binary locally, on simulators and on attached devices
//! - **Packaging** - merges iOS libraries, installs artifacts and exports the host package
//! - **Releasing** - bumps the release version across the configured files
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter nativepack.toml
//! nativepack init
//!
//! # See what would be built on this host
//! nativepack plan
//!
//! # Build, test and package everything
//! nativepack build --jobs 4
//!
//! # Preview the commands without running them
//! nativepack --dry-run build --platforms android
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `build` | Full pipeline: version patch, build, test, install, interop patch, package |
//! | `plan` | List the build units selected for this host |
//! | `clean` | Remove the build directories of the selected units |
//! | `patch-interop` | Patch the generated interop bindings only |
//! | `bump` | Replace the release version in the configured files |
//! | `sanitize` | Normalize whitespace in the configured source trees |
//! | `init` | Write a starter `nativepack.toml` |
//!
//! ## Environment
//!
//! `.env.local` in the repository root is loaded first. `ANDROID_NDK` points
//! at the NDK, `ANDROID_SDK/platform-tools` is searched for `adb`, and `UNITY`
//! overrides the host application executable.
//!
//! ## CLI Flags
//!
//! Global flags available on all commands:
//!
//! - **`--dry-run`** - Record and log every command without running it or touching files
//! - **`--verbose` / `-v`** - Enable debug logging including every command line
//!
//! ## Modules
//!
//! - [`config`] - Configuration file support for `nativepack.toml`

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use nativepack_sdk::{
    BuildContext, BuildUnit, Configuration, Executor, HostOs, Layout, Pipeline, Platforms,
    TestOutcome, select_units,
};
use tracing_subscriber::EnvFilter;

pub mod config;

use config::{CONFIG_FILE_NAME, ConfigResolver, ConfigurationArg, NativepackConfig, PlatformsArg};

/// CLI orchestrator for building, merging and packaging native SDK libraries.
#[derive(Parser, Debug)]
#[command(name = "nativepack", author, version, about = "Native SDK build orchestrator", long_about = None)]
struct Cli {
    /// Print what would be done without actually doing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print verbose output including all commands
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, test, install and package every selected unit.
    Build {
        #[arg(long, value_enum, help = "Platforms to build (default: all)")]
        platforms: Option<PlatformsArg>,
        #[arg(long, help = "Skip running the native tests")]
        no_test: bool,
        #[arg(long, value_enum, help = "Build configuration (default: release)")]
        configuration: Option<ConfigurationArg>,
        #[arg(long, help = "Units generated and built concurrently (default: 1)")]
        jobs: Option<usize>,
        #[arg(long, help = "Skip the host application package export")]
        no_package: bool,
        #[arg(long, help = "Version to stamp instead of deriving it from git tags")]
        sdk_version: Option<String>,
    },
    /// List the build units selected for this host.
    Plan {
        #[arg(long, value_enum)]
        platforms: Option<PlatformsArg>,
        #[arg(long, value_enum)]
        configuration: Option<ConfigurationArg>,
        #[arg(long, value_enum, help = "Plan for another host OS (default: this one)")]
        host: Option<HostArg>,
    },
    /// Remove the build directories of the selected units.
    Clean {
        #[arg(long, value_enum)]
        platforms: Option<PlatformsArg>,
        #[arg(long, value_enum)]
        configuration: Option<ConfigurationArg>,
    },
    /// Patch the generated interop bindings for static and dynamic linking.
    PatchInterop {
        #[arg(long, help = "Binding source directory (default: from nativepack.toml)")]
        root: Option<PathBuf>,
    },
    /// Replace the release version in every configured release file.
    Bump {
        #[arg(long, help = "Current version (MAJOR.MINOR.PATCH)")]
        old: String,
        #[arg(long, help = "New version (MAJOR.MINOR.PATCH)")]
        new: String,
        #[arg(long, help = "Create the annotated tag v<new> afterwards")]
        tag: bool,
    },
    /// Normalize whitespace in the configured source trees.
    Sanitize,
    /// Write a starter configuration file.
    Init {
        #[arg(long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,
        #[arg(long, help = "Project name (default: current directory name)")]
        name: Option<String>,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[clap(rename_all = "lowercase")]
enum HostArg {
    Macos,
    Windows,
    Linux,
}

impl From<HostArg> for HostOs {
    fn from(arg: HostArg) -> Self {
        match arg {
            HostArg::Macos => HostOs::MacOs,
            HostArg::Windows => HostOs::Windows,
            HostArg::Linux => HostOs::Linux,
        }
    }
}

/// Everything a subcommand needs from the environment and config file.
struct Session {
    resolver: ConfigResolver,
    config: NativepackConfig,
    layout: Layout,
    dry_run: bool,
    verbose: bool,
}

impl Session {
    fn load(dry_run: bool, verbose: bool) -> Result<Self> {
        let resolver = ConfigResolver::new()?;
        let cwd = env::current_dir().context("Failed to get current directory")?;
        let fallback = find_repo_root(&cwd).unwrap_or(cwd);
        let repo_root = resolver.repo_root(&fallback);
        match &resolver.config_path {
            Some(path) => tracing::debug!("using config {}", path.display()),
            None => tracing::debug!("no {} found, using defaults", CONFIG_FILE_NAME),
        }
        let config = resolver.config();
        let layout = config.layout(&repo_root);
        Ok(Self {
            resolver,
            config,
            layout,
            dry_run,
            verbose,
        })
    }

    fn executor(&self) -> Executor {
        let mut exec = Executor::new().dry_run(self.dry_run).verbose(self.verbose);
        if let Some(sdk) = env::var_os("ANDROID_SDK").filter(|v| !v.is_empty()) {
            exec = exec.with_search_dir(PathBuf::from(sdk).join("platform-tools"));
        }
        exec
    }

    fn context(&self) -> BuildContext {
        let ctx = BuildContext::new(self.executor(), self.layout.clone());
        match env::var_os("ANDROID_NDK").filter(|v| !v.is_empty()) {
            Some(ndk) => ctx.android_ndk(PathBuf::from(ndk)),
            None => ctx,
        }
    }

    fn platforms(&self, cli: Option<PlatformsArg>) -> Platforms {
        self.resolver
            .resolve(cli, |c| Some(c.project.platforms), PlatformsArg::All)
            .into()
    }

    fn configuration(&self, cli: Option<ConfigurationArg>) -> Configuration {
        self.resolver
            .resolve(cli, |c| Some(c.project.configuration), ConfigurationArg::Release)
            .into()
    }

    fn units(
        &self,
        platforms: Option<PlatformsArg>,
        configuration: Option<ConfigurationArg>,
        host: HostOs,
    ) -> Result<Vec<BuildUnit>> {
        let selection = self.config.selection(
            self.platforms(platforms),
            self.configuration(configuration),
            host,
        )?;
        Ok(select_units(&selection)?)
    }
}

/// Parses arguments and runs the selected subcommand.
pub fn run() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (dry_run, verbose) = (cli.dry_run, cli.verbose);
    let session = move || Session::load(dry_run, verbose);

    match cli.command {
        Command::Build {
            platforms,
            no_test,
            configuration,
            jobs,
            no_package,
            sdk_version,
        } => cmd_build(
            &session()?,
            BuildArgs {
                platforms,
                configuration,
                jobs,
                run_tests: !no_test,
                package: !no_package,
                sdk_version,
            },
        ),
        Command::Plan {
            platforms,
            configuration,
            host,
        } => cmd_plan(
            &session()?,
            platforms,
            configuration,
            host.map(HostOs::from).unwrap_or_else(HostOs::current),
        ),
        Command::Clean {
            platforms,
            configuration,
        } => cmd_clean(&session()?, platforms, configuration),
        Command::PatchInterop { root } => cmd_patch_interop(&session()?, root),
        Command::Bump { old, new, tag } => cmd_bump(&session()?, &old, &new, tag),
        Command::Sanitize => cmd_sanitize(&session()?),
        Command::Init { output, name, force } => cmd_init(&output, name, force, dry_run),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when run() is embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

struct BuildArgs {
    platforms: Option<PlatformsArg>,
    configuration: Option<ConfigurationArg>,
    jobs: Option<usize>,
    run_tests: bool,
    package: bool,
    sdk_version: Option<String>,
}

fn cmd_build(session: &Session, args: BuildArgs) -> Result<()> {
    let selection = session.config.selection(
        session.platforms(args.platforms),
        session.configuration(args.configuration),
        HostOs::current(),
    )?;
    let mut options = session.config.pipeline_options(&session.layout, selection);
    options.jobs = session.resolver.resolve(args.jobs, |c| c.project.jobs, 1);
    options.run_tests = args.run_tests;
    options.sdk_version = args.sdk_version;
    if !args.package {
        options.package = None;
    }

    let mut pipeline = Pipeline::new(session.context(), options);
    let report = pipeline.run().context("build pipeline failed")?;

    println!(
        "Built {} units as version {}: {}",
        report.units.len(),
        report.version,
        report.units.join(", ")
    );
    for test in &report.tests {
        match &test.outcome {
            TestOutcome::Passed { report } => {
                println!("  tests {}: passed ({})", test.unit, report.display())
            }
            TestOutcome::Skipped { reason } => {
                println!("  tests {}: skipped ({})", test.unit, reason)
            }
        }
    }
    println!(
        "Installed {} artifacts into {}",
        report.installed.len(),
        session.layout.combined_dir().display()
    );
    if let Some(interop) = &report.interop {
        println!(
            "Patched {} of {} interop sources",
            interop.changed.len(),
            interop.scanned
        );
    }
    if let Some(meta) = &report.meta {
        println!("Build metadata written to {}", meta.display());
    }
    if let Some(package) = &report.package {
        println!("Package exported to {}", package.display());
    }
    if session.dry_run {
        println!(
            "[dry-run] recorded {} commands",
            pipeline.context().exec.history().len()
        );
    }
    Ok(())
}

fn cmd_plan(
    session: &Session,
    platforms: Option<PlatformsArg>,
    configuration: Option<ConfigurationArg>,
    host: HostOs,
) -> Result<()> {
    let units = session.units(platforms, configuration, host)?;
    let ctx = BuildContext::new(Executor::new().dry_run(true), session.layout.clone());

    println!("{} build units on a {} host:", units.len(), host.as_str());
    for unit in &units {
        println!("  {} ({})", unit.name(), unit.configuration());
        for dir in unit.build_dirs(&ctx) {
            println!("    build:  {}", dir.display());
        }
        match unit {
            BuildUnit::IosFat(fat) => {
                for child in fat.children() {
                    println!("    report: {}", child.id().report_path(&ctx.layout).display());
                }
            }
            _ => println!("    report: {}", unit.id().report_path(&ctx.layout).display()),
        }
    }
    Ok(())
}

fn cmd_clean(
    session: &Session,
    platforms: Option<PlatformsArg>,
    configuration: Option<ConfigurationArg>,
) -> Result<()> {
    let units = session.units(platforms, configuration, HostOs::current())?;
    let ctx = session.context();
    for unit in &units {
        unit.clean(&ctx)
            .with_context(|| format!("cleaning {}", unit.name()))?;
    }
    println!("Cleaned {} build units", units.len());
    Ok(())
}

fn cmd_patch_interop(session: &Session, root: Option<PathBuf>) -> Result<()> {
    let mut options = session.config.interop_options(&session.layout);
    if let Some(root) = root {
        options.root = root;
    }
    let root = options.root.clone();
    let summary = nativepack_sdk::interop::patch_interop(options, session.dry_run)
        .with_context(|| format!("patching interop sources under {}", root.display()))?;
    let verb = if session.dry_run { "Would patch" } else { "Patched" };
    println!(
        "{} {} of {} interop sources ({} entry points)",
        verb,
        summary.changed.len(),
        summary.scanned,
        summary.entry_points
    );
    for path in &summary.changed {
        println!("  {}", path.display());
    }
    Ok(())
}

fn cmd_bump(session: &Session, old: &str, new: &str, tag: bool) -> Result<()> {
    use nativepack_sdk::version::{bump_file, bump_text, tag_release, validate_semver};

    validate_semver(old)?;
    validate_semver(new)?;
    let files = session.config.release_files(&session.layout);
    if files.is_empty() {
        bail!(
            "no release files configured; list them under [release] files in {}",
            CONFIG_FILE_NAME
        );
    }

    // Every file must hold the old version exactly once before any is written.
    for path in &files {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read release file: {:?}", path))?;
        bump_text(path, &text, old, new)?;
    }
    for path in &files {
        bump_file(path, old, new, session.dry_run)?;
    }
    println!("Bumped {} files from {} to {}", files.len(), old, new);

    if tag {
        tag_release(&session.executor(), &session.layout.repo_root, new)?;
        println!("Tagged v{}", new);
    }
    Ok(())
}

fn cmd_sanitize(session: &Session) -> Result<()> {
    let roots = session.config.sanitize_roots(&session.layout);
    let changed = nativepack_sdk::whitespace::sanitize(&roots, session.dry_run)?;
    let verb = if session.dry_run { "Would normalize" } else { "Normalized" };
    println!("{} whitespace in {} files", verb, changed.len());
    for path in &changed {
        println!("  {}", path.display());
    }
    Ok(())
}

fn cmd_init(output: &Path, name: Option<String>, force: bool, dry_run: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{:?} already exists; pass --force to overwrite", output);
    }
    let name = match name {
        Some(name) => name,
        None => env::current_dir()
            .ok()
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "sdk".to_string()),
    };
    if dry_run {
        println!("[dry-run] would write {:?}", output);
        return Ok(());
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    fs::write(output, NativepackConfig::generate_starter_toml(&name))
        .with_context(|| format!("Failed to write config file: {:?}", output))?;
    println!("Wrote starter config to {:?}", output);
    Ok(())
}

fn load_dotenv() {
    if let Ok(cwd) = env::current_dir()
        && let Some(root) = find_repo_root(&cwd)
    {
        let _ = dotenvy::from_path(root.join(".env.local"));
    }
}

/// Nearest ancestor holding a config file or a `.git` directory.
fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|candidate| is_repo_root(candidate))
        .map(Path::to_path_buf)
}

fn is_repo_root(candidate: &Path) -> bool {
    candidate.join(CONFIG_FILE_NAME).is_file() || candidate.join(".git").exists()
}
