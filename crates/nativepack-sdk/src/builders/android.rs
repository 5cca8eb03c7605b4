//! Android build automation
//!
//! One [`AndroidBuild`] per (ABI, STL) pair, configured through the NDK's CMake
//! toolchain file. Tests cannot run on the host: the test binary is pushed to
//! an attached device or emulator with `adb`, executed there and its report
//! pulled back.

use std::path::PathBuf;

use tracing::{info, warn};

use super::TestOutcome;
use super::common::{
    BuildContext, UnitId, build_in, clean_unit, generate_in, gtest_output_arg, install_unit,
};
use crate::executor::{Executor, ToolCommand};
use crate::install::InstalledArtifact;
use crate::types::{BuildError, Configuration};

/// Directory on the device receiving pushed test binaries.
pub const DEVICE_TMP_DIR: &str = "/data/local/tmp";

/// Android build unit for one ABI and C++ runtime.
#[derive(Debug, Clone)]
pub struct AndroidBuild {
    id: UnitId,
    abi: String,
    stl: String,
}

impl AndroidBuild {
    pub fn new(abi: impl Into<String>, stl: impl Into<String>, configuration: Configuration) -> Self {
        let abi = abi.into();
        let stl = stl.into();
        Self {
            id: UnitId::new(format!("android-{}-{}", abi, stl), configuration),
            abi,
            stl,
        }
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn abi(&self) -> &str {
        &self.abi
    }

    pub fn stl(&self) -> &str {
        &self.stl
    }

    /// Only ARM builds linked against a static runtime run on the test devices.
    pub fn can_run_tests(&self) -> bool {
        self.abi.contains("arm") && self.stl.contains("_static")
    }

    pub fn generate_project(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        let ndk = ctx.android_ndk.as_ref().ok_or_else(|| {
            BuildError::Config("ANDROID_NDK is not set; point it at the Android NDK root".into())
        })?;

        let mut ndk_define = std::ffi::OsString::from("-DANDROID_NDK=");
        ndk_define.push(ndk);

        generate_in(
            ctx,
            &self.id,
            vec![
                format!("-DCMAKE_BUILD_TYPE={}", self.id.configuration().as_str()).into(),
                ctx.toolchain_define("android.toolchain.cmake"),
                ndk_define,
                format!("-DANDROID_ABI={}", self.abi).into(),
                format!("-DANDROID_STL={}", self.stl).into(),
                "-DANDROID_NOEXECSTACK=OFF".into(),
                ctx.swig_define(),
            ],
        )
    }

    pub fn build(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        build_in(ctx, &self.id, &[format!("-j{}", ctx.build_jobs)])
    }

    pub fn run_tests(&self, ctx: &BuildContext) -> Result<TestOutcome, BuildError> {
        if !self.can_run_tests() {
            return Ok(TestOutcome::Skipped {
                reason: format!("{} with {} cannot run on the test devices", self.abi, self.stl),
            });
        }

        let devices = attached_devices(&ctx.exec)?;
        if devices.is_empty() && !ctx.exec.is_dry_run() {
            return Err(BuildError::DeviceUnavailable(
                "no Android device or emulator attached".into(),
            ));
        }

        let remote_dir = format!("{}/{}", DEVICE_TMP_DIR, self.id.build_dir_name());
        let name = &ctx.test_binary.name;
        let binary = self.test_binary_path(ctx);
        let report_name = self.id.report_name();
        let report = self.id.report_path(&ctx.layout);

        let session = DeviceSession::new(&ctx.exec, remote_dir.clone());
        ctx.exec
            .run(&ToolCommand::new("adb").args(["shell", "mkdir", "-p"]).arg(&remote_dir))?;
        ctx.exec
            .run(&ToolCommand::new("adb").arg("push").arg(&binary).arg(&remote_dir))?;

        let mut remote = format!("cd {} && ./{} ", remote_dir, name);
        remote.push_str(&gtest_output_arg(&report_name).to_string_lossy());
        ctx.exec
            .run(&ToolCommand::new("adb").arg("shell").arg(remote))?;

        ctx.exec.run(
            &ToolCommand::new("adb")
                .arg("pull")
                .arg(format!("{}/{}", remote_dir, report_name))
                .arg(&report),
        )?;
        drop(session);

        Ok(TestOutcome::Passed { report })
    }

    pub fn install(&self, ctx: &BuildContext) -> Result<Vec<InstalledArtifact>, BuildError> {
        install_unit(ctx, &self.id)
    }

    pub fn clean(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        clean_unit(ctx, &self.id)
    }

    /// Location of the compiled test binary on the host.
    pub fn test_binary_path(&self, ctx: &BuildContext) -> PathBuf {
        self.id
            .build_dir(&ctx.layout)
            .join(&ctx.test_binary.subdir)
            .join(&ctx.test_binary.name)
    }
}

/// Serial numbers of devices reported as ready by `adb devices`.
pub fn parse_adb_devices(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let (serial, state) = line.split_once('\t')?;
            (state.trim() == "device").then(|| serial.trim().to_string())
        })
        .collect()
}

fn attached_devices(exec: &Executor) -> Result<Vec<String>, BuildError> {
    let listing = exec.output(&ToolCommand::new("adb").arg("devices"))?;
    Ok(parse_adb_devices(&listing))
}

/// Removes pushed test files from the device when dropped.
struct DeviceSession<'a> {
    exec: &'a Executor,
    remote_dir: String,
}

impl<'a> DeviceSession<'a> {
    fn new(exec: &'a Executor, remote_dir: String) -> Self {
        info!("using device directory {}", remote_dir);
        Self { exec, remote_dir }
    }
}

impl Drop for DeviceSession<'_> {
    fn drop(&mut self) {
        let cmd = ToolCommand::new("adb")
            .args(["shell", "rm", "-rf"])
            .arg(&self.remote_dir);
        if let Err(e) = self.exec.run(&cmd) {
            warn!("failed to remove {} from device: {}", self.remote_dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::BuildUnit;
    use crate::layout::Layout;

    fn dry_context() -> BuildContext {
        BuildContext::new(Executor::new().dry_run(true), Layout::new("/repo"))
            .android_ndk("/opt/ndk")
    }

    #[test]
    fn unit_name_encodes_abi_and_stl() {
        let unit = AndroidBuild::new("armeabi-v7a", "c++_static", Configuration::Release);
        assert_eq!(unit.id().name(), "android-armeabi-v7a-c++_static");
        assert!(unit.can_run_tests());
        assert!(!AndroidBuild::new("x86", "c++_static", Configuration::Release).can_run_tests());
        assert!(!AndroidBuild::new("armeabi-v7a", "c++_shared", Configuration::Release).can_run_tests());
    }

    #[test]
    fn generate_passes_ndk_defines() {
        let ctx = dry_context();
        let unit = AndroidBuild::new("x86", "c++_static", Configuration::Debug);
        unit.generate_project(&ctx).unwrap();

        let history = ctx.exec.history();
        let args = &history[0].args;
        assert_eq!(args[0], "-DCMAKE_BUILD_TYPE=Debug");
        assert!(args.contains(
            &"-DCMAKE_TOOLCHAIN_FILE=/repo/native/build/toolchains/android.toolchain.cmake".to_string()
        ));
        assert!(args.contains(&"-DANDROID_NDK=/opt/ndk".to_string()));
        assert!(args.contains(&"-DANDROID_ABI=x86".to_string()));
        assert!(args.contains(&"-DANDROID_STL=c++_static".to_string()));
        assert!(args.contains(&"-DANDROID_NOEXECSTACK=OFF".to_string()));
    }

    #[test]
    fn generate_without_ndk_is_a_config_error() {
        let ctx = BuildContext::new(Executor::new().dry_run(true), Layout::new("/repo"));
        let unit = AndroidBuild::new("x86", "c++_static", Configuration::Debug);
        assert!(matches!(unit.generate_project(&ctx), Err(BuildError::Config(_))));
        assert!(ctx.exec.history().is_empty());
    }

    #[test]
    fn build_passes_job_count() {
        let mut ctx = dry_context();
        ctx.build_jobs = 6;
        AndroidBuild::new("x86", "c++_static", Configuration::Release)
            .build(&ctx)
            .unwrap();
        let history = ctx.exec.history();
        let args = &history[0].args;
        assert_eq!(args[args.len() - 2..], ["--", "-j6"]);
    }

    #[test]
    fn parses_adb_device_listing() {
        let listing = "* daemon started successfully *\nList of devices attached\nemulator-5554\tdevice\n0123456789ABCDEF\tunauthorized\nR58M\tdevice\n\n";
        assert_eq!(parse_adb_devices(listing), vec!["emulator-5554", "R58M"]);
        assert!(parse_adb_devices("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn test_run_pushes_runs_pulls_and_cleans_up() {
        let ctx = dry_context();
        let unit = AndroidBuild::new("armeabi-v7a", "c++_static", Configuration::Release);
        let outcome = unit.run_tests(&ctx).unwrap();
        assert!(matches!(outcome, TestOutcome::Passed { .. }));

        let history = ctx.exec.history();
        let steps: Vec<&str> = history.iter().map(|i| i.args[0].as_str()).collect();
        assert_eq!(steps, vec!["devices", "shell", "push", "shell", "pull", "shell"]);
        assert!(history[3].args[1].starts_with(
            "cd /data/local/tmp/build-android-armeabi-v7a-c++_static-release && ./SdkTests --gtest_output=xml:JUnit-"
        ));
        assert_eq!(history[5].args[1..3], ["rm", "-rf"]);
    }

    /// Context whose only tool is an `adb` running `script`.
    #[cfg(unix)]
    fn adb_context(tools: &std::path::Path, script: &str) -> BuildContext {
        crate::executor::write_stub_tool(tools, "adb", script);
        BuildContext::new(
            Executor::new().with_search_path(vec![tools.to_path_buf()]),
            Layout::new("/repo"),
        )
    }

    #[cfg(unix)]
    #[test]
    fn no_attached_device_is_a_skip() {
        let tools = tempfile::tempdir().unwrap();
        let ctx = adb_context(
            tools.path(),
            "[ \"$1\" = devices ] && printf 'List of devices attached\\n\\n'\nexit 0",
        );
        let unit = BuildUnit::Android(AndroidBuild::new(
            "armeabi-v7a",
            "c++_static",
            Configuration::Release,
        ));

        let reports = unit.run_tests(&ctx).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].unit, "android-armeabi-v7a-c++_static");
        assert!(matches!(reports[0].outcome, TestOutcome::Skipped { .. }));

        let steps: Vec<String> = ctx.exec.history().into_iter().map(|i| i.args[0].clone()).collect();
        assert_eq!(steps, vec!["devices"]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_remote_run_still_cleans_device() {
        let tools = tempfile::tempdir().unwrap();
        let ctx = adb_context(
            tools.path(),
            "case \"$1\" in\n\
             devices) printf 'List of devices attached\\nemulator-5554\\tdevice\\n\\n' ;;\n\
             shell) case \"$2\" in mkdir|rm) exit 0 ;; *) exit 1 ;; esac ;;\n\
             esac\n\
             exit 0",
        );
        let unit = AndroidBuild::new("armeabi-v7a", "c++_static", Configuration::Release);

        let err = unit.run_tests(&ctx).unwrap_err();
        assert!(matches!(err, BuildError::Toolchain { .. }));

        let history = ctx.exec.history();
        let steps: Vec<&str> = history.iter().map(|i| i.args[0].as_str()).collect();
        assert_eq!(steps, vec!["devices", "shell", "push", "shell", "shell"]);
        assert_eq!(history[4].args[1..3], ["rm", "-rf"]);
    }

    #[test]
    fn unsupported_abi_skips_without_touching_devices() {
        let ctx = dry_context();
        let outcome = AndroidBuild::new("x86", "c++_static", Configuration::Release)
            .run_tests(&ctx)
            .unwrap();
        assert!(matches!(outcome, TestOutcome::Skipped { .. }));
        assert!(ctx.exec.history().is_empty());
    }
}
