//! Host application package export.
//!
//! The final deployment tree is packaged by the host application itself, run
//! headless in batch mode against the host project.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::executor::{Executor, ToolCommand};
use crate::layout::Layout;
use crate::types::{BuildError, HostOs};

/// Environment variable overriding the host application executable.
pub const HOST_APP_ENV: &str = "UNITY";

/// Settings for one package export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOptions {
    /// Host application executable.
    pub executable: PathBuf,
    /// Host project directory.
    pub project_dir: PathBuf,
    /// Asset folders (relative to the project) included in the package.
    pub assets: Vec<String>,
    /// Output package path; `{version}` is substituted.
    pub output: PathBuf,
    /// Log file written by the host application.
    pub log_file: PathBuf,
}

impl PackageOptions {
    /// Defaults for `layout` on the current host.
    pub fn new(layout: &Layout) -> Self {
        Self {
            executable: default_executable(HostOs::current()),
            project_dir: layout.host_project_dir.clone(),
            assets: vec!["Assets/Sdk".to_string(), "Assets/Plugins".to_string()],
            output: layout.deployments_dir.join("Sdk-{version}.unitypackage"),
            log_file: layout.build_root.join("UnityPackageExport.log"),
        }
    }

    /// Output path with `version` substituted.
    pub fn output_for(&self, version: &str) -> PathBuf {
        PathBuf::from(
            self.output
                .to_string_lossy()
                .replace("{version}", version),
        )
    }
}

/// Default host application location, honouring the override variable.
pub fn default_executable(host: HostOs) -> PathBuf {
    if let Some(path) = std::env::var_os(HOST_APP_ENV)
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    match host {
        HostOs::Windows => PathBuf::from("c:/Program Files/Unity/Editor/Unity.exe"),
        _ => PathBuf::from("/Applications/Unity/Unity.app/Contents/MacOS/Unity"),
    }
}

/// Batch-mode export command for `version`.
pub fn export_command(options: &PackageOptions, version: &str) -> ToolCommand {
    ToolCommand::new(&options.executable)
        .args(["-quit", "-batchmode", "-nographics", "-projectPath"])
        .arg(&options.project_dir)
        .arg("-exportPackage")
        .args(&options.assets)
        .arg(options.output_for(version))
        .arg("-logFile")
        .arg(&options.log_file)
        .current_dir(&options.project_dir)
}

/// Exports the package and returns its path.
pub fn export_package(exec: &Executor, options: &PackageOptions, version: &str) -> Result<PathBuf, BuildError> {
    if !exec.is_dry_run() && !Path::new(&options.executable).exists() {
        return Err(BuildError::MissingTool {
            tool: options.executable.display().to_string(),
        });
    }
    let output = options.output_for(version);
    info!("exporting package {}", output.display());
    exec.run(&export_command(options, version))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PackageOptions {
        let layout = Layout::new("/repo");
        PackageOptions {
            executable: PathBuf::from("/opt/unity/Unity"),
            ..PackageOptions::new(&layout)
        }
    }

    #[test]
    fn output_substitutes_version() {
        assert_eq!(
            options().output_for("1.4.0.12"),
            PathBuf::from("/repo/deployments/Sdk-1.4.0.12.unitypackage")
        );
    }

    #[test]
    fn export_runs_host_in_batch_mode() {
        let exec = Executor::new().dry_run(true);
        let output = export_package(&exec, &options(), "1.2.3").unwrap();
        assert_eq!(output, PathBuf::from("/repo/deployments/Sdk-1.2.3.unitypackage"));

        let history = exec.history();
        assert_eq!(history[0].program, "/opt/unity/Unity");
        assert_eq!(
            history[0].args,
            vec![
                "-quit",
                "-batchmode",
                "-nographics",
                "-projectPath",
                "/repo/deployments/UnityProject",
                "-exportPackage",
                "Assets/Sdk",
                "Assets/Plugins",
                "/repo/deployments/Sdk-1.2.3.unitypackage",
                "-logFile",
                "/repo/native/build/UnityPackageExport.log",
            ]
        );
    }

    #[test]
    fn missing_host_application_is_reported() {
        let exec = Executor::new();
        let mut options = options();
        options.executable = PathBuf::from("/definitely/not/Unity");
        assert!(matches!(
            export_package(&exec, &options, "1.2.3"),
            Err(BuildError::MissingTool { .. })
        ));
    }
}
