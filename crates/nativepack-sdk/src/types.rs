//! Core types for nativepack-sdk.
//!
//! This module defines the fundamental types used throughout the SDK:
//!
//! - [`BuildError`] - Error types for toolchain, install and patching operations
//! - [`Configuration`] - Build configuration (Debug or Release)
//! - [`Platforms`] - Platform subset requested by the caller
//! - [`HostOs`] - Host operating system the orchestrator runs on

use std::fmt;
use std::path::PathBuf;

/// Error types for nativepack-sdk operations.
///
/// Every variant is fatal for the pipeline except [`BuildError::DeviceUnavailable`],
/// which device-dependent test steps turn into a skip.
///
/// # Example
///
/// ```ignore
/// use nativepack_sdk::{BuildError, Executor};
///
/// match Executor::new().require(&["cmake"]) {
///     Ok(found) => println!("cmake at {:?}", found[0].1),
///     Err(BuildError::MissingTool { tool }) => eprintln!("install {}", tool),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A required external executable could not be found.
    ///
    /// Raised before any build directory is created.
    #[error("could not find `{tool}` executable. Install {tool}, add it to PATH and try again")]
    MissingTool { tool: String },

    /// An external command could not be started at all.
    #[error("failed to start `{command}`: {source}. Ensure the tool is installed and available on PATH")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An external command exited with a non-zero status.
    ///
    /// `output` holds the tool's stdout and stderr verbatim.
    #[error("`{command}` failed ({status})\n\n{output}")]
    Toolchain {
        command: String,
        status: String,
        output: String,
    },

    /// No attached or reachable device/emulator for a device-dependent test step.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A version declaration pattern was not found exactly once.
    #[error(
        "expected exactly one version declaration matching `{pattern}` in {}, found {found}",
        path.display()
    )]
    VersionPattern {
        path: PathBuf,
        pattern: String,
        found: usize,
    },

    /// A computed destination escapes its expected root directory.
    #[error("refusing to write {} outside of {}", path.display(), root.display())]
    PathEscape { path: PathBuf, root: PathBuf },

    /// A filesystem operation on a known path failed.
    #[error("failed to {action} {}: {source}", path.display())]
    Fs {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),

    /// Walking a directory tree failed.
    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// A configured or generated pattern did not compile.
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Build metadata could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}. Check nativepack.toml or CLI flags")]
    Config(String),
}

impl BuildError {
    /// Shorthand for [`BuildError::Fs`].
    pub(crate) fn fs(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Fs {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Build configuration, fixed for the lifetime of a build unit.
///
/// # Example
///
/// ```
/// use nativepack_sdk::Configuration;
///
/// assert_eq!(Configuration::Release.as_str(), "Release");
/// assert_eq!(Configuration::Release.lowercase(), "release");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Configuration {
    /// Unoptimized build with debug info.
    Debug,
    /// Optimized build.
    Release,
}

impl Configuration {
    /// Returns the spelling the project generator and build tool expect.
    pub fn as_str(&self) -> &'static str {
        match self {
            Configuration::Debug => "Debug",
            Configuration::Release => "Release",
        }
    }

    /// Returns the spelling used in directory and file names.
    pub fn lowercase(&self) -> &'static str {
        match self {
            Configuration::Debug => "debug",
            Configuration::Release => "release",
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform subset requested for a run.
///
/// # Example
///
/// ```
/// use nativepack_sdk::Platforms;
///
/// assert!(Platforms::All.includes(Platforms::Ios));
/// assert!(Platforms::Ios.includes(Platforms::Ios));
/// assert!(!Platforms::Android.includes(Platforms::Ios));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platforms {
    /// Every platform the host can build.
    All,
    /// iOS device and simulators, merged into fat libraries.
    Ios,
    /// Android, one unit per ABI and STL.
    Android,
    /// macOS desktop.
    Osx,
    /// Windows desktop, one unit per architecture.
    Windows,
}

impl Platforms {
    /// Returns the string representation of the selector.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platforms::All => "all",
            Platforms::Ios => "ios",
            Platforms::Android => "android",
            Platforms::Osx => "osx",
            Platforms::Windows => "windows",
        }
    }

    /// Whether this selection covers `family`.
    pub fn includes(&self, family: Platforms) -> bool {
        *self == Platforms::All || *self == family
    }
}

/// Host operating system families the orchestrator knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MacOs,
    Windows,
    Linux,
    Other,
}

impl HostOs {
    /// Detects the host this binary was compiled for.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => HostOs::MacOs,
            "windows" => HostOs::Windows,
            "linux" => HostOs::Linux,
            _ => HostOs::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostOs::MacOs => "macos",
            HostOs::Windows => "windows",
            HostOs::Linux => "linux",
            HostOs::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_spellings() {
        assert_eq!(Configuration::Debug.as_str(), "Debug");
        assert_eq!(Configuration::Debug.lowercase(), "debug");
        assert_eq!(Configuration::Release.to_string(), "Release");
    }

    #[test]
    fn platform_selection() {
        assert!(Platforms::All.includes(Platforms::Windows));
        assert!(!Platforms::Osx.includes(Platforms::Ios));
        assert_eq!(Platforms::Android.as_str(), "android");
    }

    #[test]
    fn missing_tool_message_names_the_tool() {
        let err = BuildError::MissingTool {
            tool: "lipo".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`lipo`"));
        assert!(msg.contains("PATH"));
    }

    #[test]
    fn toolchain_error_keeps_output() {
        let err = BuildError::Toolchain {
            command: "cmake --build .".into(),
            status: "exit status: 2".into(),
            output: "Stderr:\nerror: no such target".into(),
        };
        assert!(err.to_string().contains("error: no such target"));
    }
}
