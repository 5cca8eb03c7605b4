//! External tool execution.
//!
//! Every subprocess the SDK starts (project generator, build tool, merge tool,
//! device control, source control, host application) goes through an
//! [`Executor`]. Commands carry explicit absolute working directories instead of
//! changing the process working directory.
//!
//! In dry-run mode nothing is executed: invocations are logged and recorded in
//! the executor's history, which is also how tests observe argument order.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::types::BuildError;

/// A single external command: program, arguments and working directory.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Runs the command inside `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    fn to_command(&self, path_env: Option<&OsStr>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        if let Some(path) = path_env {
            cmd.env("PATH", path);
        }
        cmd
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// A recorded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl From<&ToolCommand> for Invocation {
    fn from(cmd: &ToolCommand) -> Self {
        Self {
            program: cmd.program(),
            args: cmd.arg_strings(),
            cwd: cmd.cwd.clone(),
        }
    }
}

/// Runs external tools and raises on non-zero exit.
#[derive(Debug)]
pub struct Executor {
    dry_run: bool,
    verbose: bool,
    search_path: Vec<PathBuf>,
    history: Mutex<Vec<Invocation>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Creates an executor searching the current `PATH`.
    pub fn new() -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self {
            dry_run: false,
            verbose: false,
            search_path,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Records and logs commands instead of running them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Streams tool output to the terminal instead of capturing it.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Appends a directory to the executable search path.
    ///
    /// The extended path is also passed to every spawned command.
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if !self.search_path.contains(&dir) {
            self.search_path.push(dir);
        }
        self
    }

    /// Replaces the executable search path entirely.
    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = dirs;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Returns every invocation seen so far, in order.
    pub fn history(&self) -> Vec<Invocation> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, cmd: &ToolCommand) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Invocation::from(cmd));
    }

    fn path_env(&self) -> Option<OsString> {
        std::env::join_paths(&self.search_path).ok()
    }

    /// Runs `cmd` to completion, failing on non-zero exit.
    pub fn run(&self, cmd: &ToolCommand) -> Result<(), BuildError> {
        self.record(cmd);
        if self.dry_run {
            info!("[dry-run] {}", cmd);
            return Ok(());
        }
        debug!("running {}", cmd);

        let path_env = self.path_env();
        let mut command = cmd.to_command(path_env.as_deref());

        if self.verbose {
            let status = command.status().map_err(|source| BuildError::Spawn {
                command: cmd.to_string(),
                source,
            })?;
            if !status.success() {
                return Err(BuildError::Toolchain {
                    command: cmd.to_string(),
                    status: status.to_string(),
                    output: "See the tool output above.".to_string(),
                });
            }
            return Ok(());
        }

        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| BuildError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(BuildError::Toolchain {
                command: cmd.to_string(),
                status: output.status.to_string(),
                output: format!(
                    "Stdout:\n{}\n\nStderr:\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(())
    }

    /// Runs `cmd` and returns its stdout.
    ///
    /// In dry-run mode the command is recorded and an empty string is returned.
    pub fn output(&self, cmd: &ToolCommand) -> Result<String, BuildError> {
        self.record(cmd);
        if self.dry_run {
            info!("[dry-run] {}", cmd);
            return Ok(String::new());
        }
        debug!("querying {}", cmd);

        let path_env = self.path_env();
        let output = cmd
            .to_command(path_env.as_deref())
            .stdin(Stdio::null())
            .output()
            .map_err(|source| BuildError::Spawn {
                command: cmd.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(BuildError::Toolchain {
                command: cmd.to_string(),
                status: output.status.to_string(),
                output: format!("Stderr:\n{}", String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Locates `name` on the search path.
    ///
    /// Names containing a path separator are checked as given.
    pub fn find_executable(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.components().count() > 1 {
            return is_executable(direct).then(|| direct.to_path_buf());
        }

        self.search_path.iter().find_map(|dir| {
            executable_candidates(dir, name)
                .into_iter()
                .find(|candidate| is_executable(candidate))
        })
    }

    /// Resolves every tool in `names`, failing on the first one that is missing.
    ///
    /// This check is performed even in dry-run mode.
    pub fn require(&self, names: &[&str]) -> Result<Vec<(String, PathBuf)>, BuildError> {
        let mut found = Vec::with_capacity(names.len());
        for name in names {
            let location = self
                .find_executable(name)
                .ok_or_else(|| BuildError::MissingTool {
                    tool: name.to_string(),
                })?;
            info!("{} is at {}", name, location.display());
            found.push((name.to_string(), location));
        }
        Ok(found)
    }
}

fn executable_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut candidates = vec![dir.join(name)];
    if cfg!(windows) && Path::new(name).extension().is_none() {
        candidates.push(dir.join(format!("{}.exe", name)));
        candidates.push(dir.join(format!("{}.bat", name)));
        candidates.push(dir.join(format!("{}.cmd", name)));
    }
    candidates
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Writes an executable shell script named `name` into `dir`.
#[cfg(all(test, unix))]
pub(crate) fn write_stub_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
