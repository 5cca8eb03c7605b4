//! Fat-binary composite build
//!
//! Runs the full lifecycle of several single-architecture iOS units and merges
//! their static libraries into one multi-architecture library with `lipo`.
//! Children are always visited in the order they were given, which is also
//! the order of the merge tool's inputs.

use std::path::PathBuf;

use tracing::info;

use super::TestOutcome;
use super::common::{BuildContext, UnitId, clean_unit};
use super::ios::IosBuild;
use crate::executor::ToolCommand;
use crate::install::{InstalledArtifact, deliver_copy, tokenized_file_name};
use crate::types::{BuildError, Configuration};

/// A library merged by [`IosFatBuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatLibrary {
    /// File name shared by every child's single-architecture output, e.g. `libsdk.a`.
    pub name: String,
    /// Whether the merged library is delivered to the combined deployment tree.
    pub deploy: bool,
    /// File name inside the host project's plugin directory, if delivered there.
    pub plugin_name: Option<String>,
}

impl FatLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deploy: true,
            plugin_name: None,
        }
    }

    pub fn deploy(mut self, deploy: bool) -> Self {
        self.deploy = deploy;
        self
    }

    pub fn plugin_name(mut self, name: impl Into<String>) -> Self {
        self.plugin_name = Some(name.into());
        self
    }
}

/// Composite unit merging several iOS device classes.
#[derive(Debug, Clone)]
pub struct IosFatBuild {
    id: UnitId,
    children: Vec<IosBuild>,
    libraries: Vec<FatLibrary>,
}

impl IosFatBuild {
    pub fn new(configuration: Configuration, children: Vec<IosBuild>, libraries: Vec<FatLibrary>) -> Self {
        Self {
            id: UnitId::new("ios-fat", configuration),
            children,
            libraries,
        }
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn children(&self) -> &[IosBuild] {
        &self.children
    }

    pub fn libraries(&self) -> &[FatLibrary] {
        &self.libraries
    }

    /// Path of the merged `library` in the composite's own build directory.
    pub fn merged_path(&self, ctx: &BuildContext, library: &str) -> PathBuf {
        self.id.build_dir(&ctx.layout).join(library)
    }

    pub fn generate_project(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        for child in &self.children {
            child.generate_project(ctx)?;
        }
        Ok(())
    }

    pub fn build(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        for child in &self.children {
            child.build(ctx)?;
        }
        for library in &self.libraries {
            self.fatify(ctx, &library.name)?;
        }
        Ok(())
    }

    /// Runs every child's tests; the first fatal error aborts the composite.
    pub fn run_tests(&self, ctx: &BuildContext) -> Result<Vec<(String, TestOutcome)>, BuildError> {
        let mut outcomes = Vec::with_capacity(self.children.len());
        for child in &self.children {
            let outcome = match child.run_tests(ctx) {
                Err(BuildError::DeviceUnavailable(reason)) => TestOutcome::Skipped { reason },
                other => other?,
            };
            outcomes.push((child.id().name().to_string(), outcome));
        }
        Ok(outcomes)
    }

    /// Merges one single-architecture `library` from every child into the
    /// composite's build directory.
    pub fn fatify(&self, ctx: &BuildContext, library: &str) -> Result<PathBuf, BuildError> {
        let output = self.merged_path(ctx, library);
        info!("[{}] merging {} from {} architectures", self.id.name(), library, self.children.len());
        ctx.create_dir(&self.id.build_dir(&ctx.layout))?;

        let mut cmd = ToolCommand::new("lipo").arg("-create");
        for child in &self.children {
            cmd = cmd.arg(child.artifact_path(ctx, library));
        }
        ctx.exec.run(
            &cmd.arg("-output")
                .arg(&output)
                .current_dir(self.id.build_dir(&ctx.layout)),
        )?;
        Ok(output)
    }

    /// Installs every child, then delivers the merged libraries.
    ///
    /// A merged library may be delivered to both the combined deployment tree
    /// and the host project's plugin directory.
    pub fn install(&self, ctx: &BuildContext) -> Result<Vec<InstalledArtifact>, BuildError> {
        let mut installed = Vec::new();
        for child in &self.children {
            installed.extend(child.install(ctx)?);
        }

        let combined = ctx.layout.combined_dir();
        for library in &self.libraries {
            let merged = self.fatify(ctx, &library.name)?;

            let mut destinations = Vec::new();
            if library.deploy {
                let name = tokenized_file_name(&library.name, &self.id.token());
                destinations.push((ctx.layout.combined_lib_dir().join(name), combined.clone()));
            }
            if let Some(plugin_name) = &library.plugin_name {
                destinations.push((
                    ctx.layout.plugin_dir.join(plugin_name),
                    ctx.layout.host_project_dir.clone(),
                ));
            }

            for (destination, root) in destinations {
                if ctx.exec.is_dry_run() {
                    info!("[dry-run] would copy {} to {}", merged.display(), destination.display());
                    continue;
                }
                deliver_copy(&merged, &destination, &root)?;
                installed.push(InstalledArtifact {
                    source: merged.clone(),
                    destination,
                    library: true,
                });
            }
        }
        Ok(installed)
    }

    pub fn clean(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        for child in &self.children {
            child.clean(ctx)?;
        }
        clean_unit(ctx, &self.id)
    }
}
