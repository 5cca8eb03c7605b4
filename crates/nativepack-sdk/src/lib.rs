//! Native SDK build orchestration
//!
//! `nativepack-sdk` drives the build of one native source tree for several
//! platforms and CPU architectures, and assembles the results into a single
//! package for a host environment. Compilation itself is delegated to an
//! external project generator and build tool; this crate sequences them,
//! merges per-architecture outputs, relocates artifacts and post-processes the
//! generated interop bindings.
//!
//! # Architecture
//!
//! - **Executor**: runs one external tool and fails on non-zero exit ([`Executor`])
//! - **Build units**: one (platform variant, configuration) lifecycle each ([`builders`])
//! - **Fat binaries**: per-architecture iOS libraries merged with `lipo` ([`builders::IosFatBuild`])
//! - **Installer**: moves artifacts into the combined deployment tree ([`install`])
//! - **Interop patcher**: rewrites generated bindings for static and dynamic linking ([`interop`])
//! - **Pipeline**: selects units for the host and sequences everything ([`Pipeline`])
//!
//! # Example
//!
//! ```ignore
//! use nativepack_sdk::{
//!     BuildContext, Configuration, Executor, HostOs, Layout, Pipeline, PipelineOptions,
//!     Platforms, UnitSelection,
//! };
//!
//! fn main() -> Result<(), nativepack_sdk::BuildError> {
//!     let layout = Layout::new(".");
//!     let selection = UnitSelection::new(Platforms::All, Configuration::Release, HostOs::current());
//!     let options = PipelineOptions::new(&layout, selection);
//!     let ctx = BuildContext::new(Executor::new().dry_run(true), layout);
//!
//!     let report = Pipeline::new(ctx, options).run()?;
//!     println!("built {} units as version {}", report.units.len(), report.version);
//!     Ok(())
//! }
//! ```

pub mod builders;
pub mod executor;
pub mod install;
pub mod interop;
pub mod layout;
pub mod meta;
pub mod package;
pub mod pipeline;
pub mod types;
pub mod version;
pub mod whitespace;

pub use builders::{BuildContext, BuildUnit, TestOutcome, TestReport, UnitId};
pub use executor::{Executor, Invocation, ToolCommand};
pub use install::InstalledArtifact;
pub use interop::{EntryPointTable, InteropOptions, InteropPatcher, PatchSummary};
pub use layout::Layout;
pub use meta::BuildMeta;
pub use package::PackageOptions;
pub use pipeline::{Pipeline, PipelineOptions, PipelineReport, UnitSelection, select_units};
pub use types::{BuildError, Configuration, HostOs, Platforms};
pub use version::VersionTarget;
pub use whitespace::SanitizeRoot;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
