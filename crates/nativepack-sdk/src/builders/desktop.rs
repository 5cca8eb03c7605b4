//! Desktop build automation (macOS and Windows).
//!
//! Desktop units run their test binary directly on the host.

use std::ffi::OsString;
use std::path::PathBuf;

use super::TestOutcome;
use super::common::{
    BuildContext, UnitId, build_in, clean_unit, generate_in, gtest_output_arg, install_unit,
};
use crate::executor::ToolCommand;
use crate::install::InstalledArtifact;
use crate::types::{BuildError, Configuration};

/// Default Visual Studio generator; architecture suffixes are appended to it.
pub const DEFAULT_VS_GENERATOR: &str = "Visual Studio 14 2015";

/// macOS desktop build unit.
#[derive(Debug, Clone)]
pub struct OsxBuild {
    id: UnitId,
}

impl OsxBuild {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            id: UnitId::new("osx", configuration),
        }
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn generate_project(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        generate_in(
            ctx,
            &self.id,
            vec![
                "-GXcode".into(),
                format!("-DCMAKE_BUILD_TYPE={}", self.id.configuration().as_str()).into(),
                ctx.swig_define(),
            ],
        )
    }

    pub fn build(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        build_in(ctx, &self.id, &[])
    }

    pub fn run_tests(&self, ctx: &BuildContext) -> Result<TestOutcome, BuildError> {
        let binary = self.test_binary_path(ctx);
        run_local_tests(ctx, &self.id, binary)
    }

    pub fn install(&self, ctx: &BuildContext) -> Result<Vec<InstalledArtifact>, BuildError> {
        install_unit(ctx, &self.id)
    }

    pub fn clean(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        clean_unit(ctx, &self.id)
    }

    /// `<build>/<subdir>/<Configuration>/<name>`
    pub fn test_binary_path(&self, ctx: &BuildContext) -> PathBuf {
        self.id
            .build_dir(&ctx.layout)
            .join(&ctx.test_binary.subdir)
            .join(self.id.configuration().as_str())
            .join(&ctx.test_binary.name)
    }
}

/// Windows target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowsArch {
    Win32,
    Win64,
    Arm,
}

impl WindowsArch {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowsArch::Win32 => "win32",
            WindowsArch::Win64 => "win64",
            WindowsArch::Arm => "arm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "win32" => Some(WindowsArch::Win32),
            "win64" => Some(WindowsArch::Win64),
            "arm" => Some(WindowsArch::Arm),
            _ => None,
        }
    }

    /// Suffix appended to the Visual Studio generator name.
    fn generator_suffix(&self) -> &'static str {
        match self {
            WindowsArch::Win32 => "",
            WindowsArch::Win64 => " Win64",
            WindowsArch::Arm => " ARM",
        }
    }
}

/// Windows desktop build unit for one architecture.
#[derive(Debug, Clone)]
pub struct WindowsBuild {
    id: UnitId,
    arch: WindowsArch,
    generator: String,
}

impl WindowsBuild {
    pub fn new(arch: WindowsArch, configuration: Configuration) -> Self {
        Self {
            id: UnitId::new(format!("windows-{}", arch.as_str()), configuration),
            arch,
            generator: DEFAULT_VS_GENERATOR.to_string(),
        }
    }

    /// Overrides the base Visual Studio generator name.
    pub fn generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = generator.into();
        self
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn arch(&self) -> WindowsArch {
        self.arch
    }

    pub fn generate_project(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        let mut args: Vec<OsString> = vec![
            format!("-G{}{}", self.generator, self.arch.generator_suffix()).into(),
            format!("-DCMAKE_BUILD_TYPE={}", self.id.configuration().as_str()).into(),
        ];
        if self.arch == WindowsArch::Arm {
            args.push("-DCMAKE_SYSTEM_NAME=WindowsPhone".into());
            args.push("-DCMAKE_SYSTEM_VERSION=8.1".into());
        }
        args.push(ctx.swig_define());
        generate_in(ctx, &self.id, args)
    }

    pub fn build(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        build_in(ctx, &self.id, &[])
    }

    pub fn run_tests(&self, ctx: &BuildContext) -> Result<TestOutcome, BuildError> {
        if self.arch == WindowsArch::Arm {
            return Ok(TestOutcome::Skipped {
                reason: "ARM binaries cannot run on the build host".into(),
            });
        }
        let binary = self.test_binary_path(ctx);
        run_local_tests(ctx, &self.id, binary)
    }

    pub fn install(&self, ctx: &BuildContext) -> Result<Vec<InstalledArtifact>, BuildError> {
        install_unit(ctx, &self.id)
    }

    pub fn clean(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        clean_unit(ctx, &self.id)
    }

    /// `<build>/<subdir>/<Configuration>/<name>.exe`
    pub fn test_binary_path(&self, ctx: &BuildContext) -> PathBuf {
        self.id
            .build_dir(&ctx.layout)
            .join(&ctx.test_binary.subdir)
            .join(self.id.configuration().as_str())
            .join(format!("{}.exe", ctx.test_binary.name))
    }
}

fn run_local_tests(ctx: &BuildContext, id: &UnitId, binary: PathBuf) -> Result<TestOutcome, BuildError> {
    let report = id.report_path(&ctx.layout);
    ctx.exec.run(
        &ToolCommand::new(binary)
            .arg(gtest_output_arg(&report))
            .current_dir(id.build_dir(&ctx.layout)),
    )?;
    Ok(TestOutcome::Passed { report })
}
