//! iOS build automation
//!
//! One [`IosBuild`] per device class (device, 32-bit simulator, 64-bit
//! simulator). Tests run inside a simulator through `xcrun simctl`; the
//! simulator is booted on demand and returned to its original state
//! afterwards by [`SimulatorSession`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use super::common::{
    BuildContext, UnitId, build_in, clean_unit, generate_in, gtest_output_arg, install_unit,
};
use super::TestOutcome;
use crate::executor::{Executor, ToolCommand};
use crate::install::InstalledArtifact;
use crate::types::{BuildError, Configuration};

/// iOS device class a unit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IosDeviceType {
    /// Physical device (`iphoneos`).
    Os,
    /// 32-bit simulator.
    Simulator,
    /// 64-bit simulator.
    Simulator64,
}

impl IosDeviceType {
    /// Value of the toolchain's `IOS_PLATFORM` variable.
    pub fn platform_define(&self) -> &'static str {
        match self {
            IosDeviceType::Os => "OS",
            IosDeviceType::Simulator => "SIMULATOR",
            IosDeviceType::Simulator64 => "SIMULATOR64",
        }
    }

    /// SDK suffix of the Xcode output directory (`<Configuration>-<sdk>`).
    pub fn sdk(&self) -> &'static str {
        match self {
            IosDeviceType::Os => "iphoneos",
            IosDeviceType::Simulator | IosDeviceType::Simulator64 => "iphonesimulator",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IosDeviceType::Os => "os",
            IosDeviceType::Simulator => "simulator",
            IosDeviceType::Simulator64 => "simulator64",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "os" => Some(IosDeviceType::Os),
            "simulator" => Some(IosDeviceType::Simulator),
            "simulator64" => Some(IosDeviceType::Simulator64),
            _ => None,
        }
    }
}

/// Single-architecture iOS build unit.
#[derive(Debug, Clone)]
pub struct IosBuild {
    id: UnitId,
    device_type: IosDeviceType,
    /// Simulator device name used for tests, e.g. "iPhone 6".
    simulator: Option<String>,
}

impl IosBuild {
    pub fn new(device_type: IosDeviceType, configuration: Configuration) -> Self {
        Self {
            id: UnitId::new(format!("ios-{}", device_type.as_str()), configuration),
            device_type,
            simulator: None,
        }
    }

    /// Sets the simulator device tests run on.
    pub fn simulator(mut self, name: impl Into<String>) -> Self {
        self.simulator = Some(name.into());
        self
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn device_type(&self) -> IosDeviceType {
        self.device_type
    }

    /// Xcode output directory holding this unit's libraries.
    pub fn output_dir(&self, ctx: &BuildContext) -> PathBuf {
        self.id.build_dir(&ctx.layout).join(format!(
            "{}-{}",
            self.id.configuration().as_str(),
            self.device_type.sdk()
        ))
    }

    /// Path of the single-architecture `library` produced by this unit.
    pub fn artifact_path(&self, ctx: &BuildContext, library: &str) -> PathBuf {
        self.output_dir(ctx).join(library)
    }

    pub fn generate_project(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        let configuration = self.id.configuration();
        generate_in(
            ctx,
            &self.id,
            vec![
                "-GXcode".into(),
                format!("-DCMAKE_BUILD_TYPE={}", configuration.as_str()).into(),
                ctx.toolchain_define("iOS.cmake"),
                format!("-DIOS_PLATFORM={}", self.device_type.platform_define()).into(),
                ctx.swig_define(),
            ],
        )
    }

    pub fn build(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        build_in(ctx, &self.id, &[])
    }

    pub fn run_tests(&self, ctx: &BuildContext) -> Result<TestOutcome, BuildError> {
        let Some(device_name) = self.simulator.as_deref() else {
            return Ok(TestOutcome::Skipped {
                reason: format!(
                    "cannot run tests on {} automatically, consider running them manually",
                    self.device_type.sdk()
                ),
            });
        };

        let devices = list_simulators(&ctx.exec)?;
        let device = devices
            .iter()
            .find(|d| d.name == device_name)
            .ok_or_else(|| {
                BuildError::DeviceUnavailable(format!("no simulator named '{}'", device_name))
            })?;

        let binary = self.test_app_binary(ctx);
        let report_name = self.id.report_name();
        {
            let session = SimulatorSession::acquire(&ctx.exec, device)?;
            ctx.exec.run(
                &ToolCommand::new("xcrun")
                    .args(["simctl", "spawn"])
                    .arg(session.udid())
                    .arg(&binary)
                    .arg(gtest_output_arg(&report_name))
                    .current_dir(&ctx.layout.build_root),
            )?;
        }

        let report = self.id.report_path(&ctx.layout);
        if !ctx.exec.is_dry_run() {
            let produced = simulator_data_dir(ctx, &device.udid)?.join(&report_name);
            if let Some(parent) = report.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BuildError::fs("create directory", parent, e))?;
            }
            std::fs::copy(&produced, &report).map_err(|e| BuildError::fs("copy", &produced, e))?;
        }
        Ok(TestOutcome::Passed { report })
    }

    pub fn install(&self, ctx: &BuildContext) -> Result<Vec<InstalledArtifact>, BuildError> {
        install_unit(ctx, &self.id)
    }

    pub fn clean(&self, ctx: &BuildContext) -> Result<(), BuildError> {
        clean_unit(ctx, &self.id)
    }

    fn test_app_binary(&self, ctx: &BuildContext) -> PathBuf {
        let name = &ctx.test_binary.name;
        self.id
            .build_dir(&ctx.layout)
            .join(&ctx.test_binary.subdir)
            .join(format!(
                "{}-{}",
                self.id.configuration().as_str(),
                self.device_type.sdk()
            ))
            .join(format!("{}.app", name))
            .join(name)
    }
}

/// Boot state of a simulator device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// The device is unknown to the simulator runtime or not usable yet.
    Absent,
    Shutdown,
    Booted,
}

/// A simulator device as listed by `xcrun simctl list devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    pub name: String,
    pub udid: String,
    pub state: SimState,
}

fn device_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s+(?P<name>.+) \((?P<udid>[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12})\) \((?P<state>[A-Za-z ]+)\)\s*$",
        )
        .expect("simctl device pattern is valid")
    })
}

/// Parses the output of `xcrun simctl list devices`.
///
/// Devices in transitional states ("Shutting Down", "Creating", "Booting")
/// cannot be booted or used and are reported as [`SimState::Absent`].
pub fn parse_simctl_devices(listing: &str) -> Vec<SimDevice> {
    device_line()
        .captures_iter(listing)
        .map(|caps| SimDevice {
            name: caps["name"].trim().to_string(),
            udid: caps["udid"].to_string(),
            state: match &caps["state"] {
                "Booted" => SimState::Booted,
                "Shutdown" => SimState::Shutdown,
                _ => SimState::Absent,
            },
        })
        .collect()
}

/// Lists the simulator devices known to the host.
pub fn list_simulators(exec: &Executor) -> Result<Vec<SimDevice>, BuildError> {
    let listing = exec.output(&ToolCommand::new("xcrun").args(["simctl", "list", "devices"]))?;
    Ok(parse_simctl_devices(&listing))
}

fn simulator_data_dir(ctx: &BuildContext, udid: &str) -> Result<PathBuf, BuildError> {
    let devices = match &ctx.simulator_devices_dir {
        Some(dir) => dir.clone(),
        None => {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                BuildError::Config("HOME is not set; cannot locate simulator data".into())
            })?;
            Path::new(&home).join("Library/Developer/CoreSimulator/Devices")
        }
    };
    Ok(devices.join(udid).join("data"))
}

/// A simulator held booted for the duration of a test run.
///
/// Dropping the session restores the state the device was found in: a
/// simulator this session booted is shut down again, one that was already
/// running is left alone.
#[derive(Debug)]
pub struct SimulatorSession<'a> {
    exec: &'a Executor,
    udid: String,
    initial: SimState,
    current: SimState,
}

impl<'a> SimulatorSession<'a> {
    /// Boots `device` if needed.
    pub fn acquire(exec: &'a Executor, device: &SimDevice) -> Result<Self, BuildError> {
        let mut session = Self {
            exec,
            udid: device.udid.clone(),
            initial: device.state,
            current: device.state,
        };
        match device.state {
            SimState::Absent => {
                return Err(BuildError::DeviceUnavailable(format!(
                    "simulator {} is not available",
                    device.name
                )));
            }
            SimState::Shutdown => {
                info!("booting simulator {} ({})", device.name, device.udid);
                session.simctl("boot")?;
                session.current = SimState::Booted;
            }
            SimState::Booted => {}
        }
        Ok(session)
    }

    pub fn udid(&self) -> &str {
        &self.udid
    }

    pub fn state(&self) -> SimState {
        self.current
    }

    fn simctl(&self, action: &str) -> Result<(), BuildError> {
        self.exec.run(
            &ToolCommand::new("xcrun")
                .args(["simctl", action])
                .arg(&self.udid),
        )
    }
}

impl Drop for SimulatorSession<'_> {
    fn drop(&mut self) {
        if self.initial == SimState::Shutdown && self.current == SimState::Booted {
            match self.simctl("shutdown") {
                Ok(()) => self.current = SimState::Shutdown,
                Err(e) => warn!("failed to shut down simulator {}: {}", self.udid, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    const LISTING: &str = "\
== Devices ==
-- iOS 9.3 --
    iPhone 4s (1C6B9C2F-7D64-4F4B-9B8A-2E8F3C1D0A11) (Shutdown)
    iPhone 6 (8A2B5E7D-0F3C-4B6A-A1D2-3C4E5F6A7B8C) (Booted)
    iPad Pro (9.7-inch) (0D9E8F7A-6B5C-4D3E-2F1A-0B9C8D7E6F5A) (Shutting Down)
-- Unavailable: com.apple.CoreSimulator.SimRuntime.iOS-8-1 --
    iPhone 5 (11111111-2222-3333-4444-555555555555) (Shutdown) (unavailable, runtime profile not found)
";

    #[test]
    fn parses_simctl_listing() {
        let devices = parse_simctl_devices(LISTING);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].name, "iPhone 4s");
        assert_eq!(devices[0].state, SimState::Shutdown);
        assert_eq!(devices[1].udid, "8A2B5E7D-0F3C-4B6A-A1D2-3C4E5F6A7B8C");
        assert_eq!(devices[1].state, SimState::Booted);
        assert_eq!(devices[2].name, "iPad Pro (9.7-inch)");
        assert_eq!(devices[2].state, SimState::Absent);
    }

    #[test]
    fn transitional_device_is_not_booted() {
        let exec = Executor::new().dry_run(true);
        let device = &parse_simctl_devices(LISTING)[2];
        let err = SimulatorSession::acquire(&exec, device).unwrap_err();
        assert!(matches!(err, BuildError::DeviceUnavailable(_)));
        assert!(exec.history().is_empty());
    }

    #[test]
    fn session_boots_and_restores_shutdown_device() {
        let exec = Executor::new().dry_run(true);
        let device = &parse_simctl_devices(LISTING)[0];
        {
            let session = SimulatorSession::acquire(&exec, device).unwrap();
            assert_eq!(session.state(), SimState::Booted);
        }
        let actions: Vec<String> = exec.history().into_iter().map(|i| i.args[1].clone()).collect();
        assert_eq!(actions, vec!["boot", "shutdown"]);
    }

    #[test]
    fn session_leaves_booted_device_running() {
        let exec = Executor::new().dry_run(true);
        let device = &parse_simctl_devices(LISTING)[1];
        drop(SimulatorSession::acquire(&exec, device).unwrap());
        assert!(exec.history().is_empty());
    }

    #[test]
    fn absent_device_is_unavailable() {
        let exec = Executor::new().dry_run(true);
        let device = SimDevice {
            name: "iPhone 99".into(),
            udid: "00000000-0000-0000-0000-000000000000".into(),
            state: SimState::Absent,
        };
        let err = SimulatorSession::acquire(&exec, &device).unwrap_err();
        assert!(matches!(err, BuildError::DeviceUnavailable(_)));
    }

    #[cfg(unix)]
    const UDID: &str = "1C6B9C2F-7D64-4F4B-9B8A-2E8F3C1D0A11";

    /// Context whose `xcrun` lists one shut down "iPhone 15" and whose
    /// `simctl spawn` exits with `spawn_status`.
    #[cfg(unix)]
    fn simulator_context(tmp: &Path, spawn_status: i32) -> BuildContext {
        let tools = tmp.join("tools");
        std::fs::create_dir_all(&tools).unwrap();
        crate::executor::write_stub_tool(
            &tools,
            "xcrun",
            &format!(
                "case \"$2\" in\n\
                 list) printf '%s\\n' '== Devices ==' '-- iOS 17.2 --' '    iPhone 15 ({UDID}) (Shutdown)' ;;\n\
                 spawn) exit {spawn_status} ;;\n\
                 esac\n\
                 exit 0"
            ),
        );
        let layout = Layout::new(tmp.join("repo"));
        std::fs::create_dir_all(&layout.build_root).unwrap();
        BuildContext::new(Executor::new().with_search_path(vec![tools]), layout)
            .simulator_devices_dir(tmp.join("devices"))
    }

    #[cfg(unix)]
    fn simctl_actions(exec: &Executor) -> Vec<String> {
        exec.history().into_iter().map(|i| i.args[1].clone()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn simulator_run_boots_spawns_and_shuts_down() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = simulator_context(tmp.path(), 0);
        let unit = IosBuild::new(IosDeviceType::Simulator64, Configuration::Release).simulator("iPhone 15");

        let produced = tmp.path().join("devices").join(UDID).join("data");
        std::fs::create_dir_all(&produced).unwrap();
        std::fs::write(produced.join(unit.id().report_name()), "<testsuites/>").unwrap();

        let outcome = unit.run_tests(&ctx).unwrap();
        let report = unit.id().report_path(&ctx.layout);
        assert_eq!(outcome, TestOutcome::Passed { report: report.clone() });
        assert_eq!(std::fs::read_to_string(report).unwrap(), "<testsuites/>");
        assert_eq!(simctl_actions(&ctx.exec), vec!["list", "boot", "spawn", "shutdown"]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_spawn_still_shuts_simulator_down() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = simulator_context(tmp.path(), 1);
        let unit = IosBuild::new(IosDeviceType::Simulator64, Configuration::Release).simulator("iPhone 15");

        let err = unit.run_tests(&ctx).unwrap_err();
        assert!(matches!(err, BuildError::Toolchain { .. }));
        assert_eq!(simctl_actions(&ctx.exec), vec!["list", "boot", "spawn", "shutdown"]);
    }

    #[cfg(unix)]
    #[test]
    fn unknown_simulator_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = simulator_context(tmp.path(), 0);
        let unit = IosBuild::new(IosDeviceType::Simulator64, Configuration::Release).simulator("iPhone 4s");

        let err = unit.run_tests(&ctx).unwrap_err();
        assert!(matches!(err, BuildError::DeviceUnavailable(_)));
        assert_eq!(simctl_actions(&ctx.exec), vec!["list"]);
    }

    #[test]
    fn device_builds_skip_tests() {
        let ctx = BuildContext::new(Executor::new().dry_run(true), Layout::new("/repo"));
        let unit = IosBuild::new(IosDeviceType::Os, Configuration::Release);
        let outcome = unit.run_tests(&ctx).unwrap();
        assert!(matches!(outcome, TestOutcome::Skipped { .. }));
        assert!(ctx.exec.history().is_empty());
    }

    #[test]
    fn generate_passes_platform_and_toolchain() {
        let ctx = BuildContext::new(Executor::new().dry_run(true), Layout::new("/repo"))
            .swig("/usr/local/bin/swig");
        let unit = IosBuild::new(IosDeviceType::Simulator64, Configuration::Release);
        unit.generate_project(&ctx).unwrap();

        let history = ctx.exec.history();
        let args = &history[0].args;
        assert_eq!(args[0], "-GXcode");
        assert!(args.contains(&"-DIOS_PLATFORM=SIMULATOR64".to_string()));
        assert!(args.contains(&"-DCMAKE_BUILD_TYPE=Release".to_string()));
        assert!(args.contains(
            &"-DCMAKE_TOOLCHAIN_FILE=/repo/native/build/toolchains/iOS.cmake".to_string()
        ));
        assert!(args.contains(&"-DSWIG_EXECUTABLE=/usr/local/bin/swig".to_string()));
        assert_eq!(args.last().unwrap(), "/repo/native/build");
        assert_eq!(
            history[0].cwd.as_deref(),
            Some(Path::new("/repo/native/build/build-ios-simulator64-release"))
        );
    }

    #[test]
    fn artifacts_live_in_sdk_output_dir() {
        let ctx = BuildContext::new(Executor::new().dry_run(true), Layout::new("/repo"));
        let unit = IosBuild::new(IosDeviceType::Os, Configuration::Debug);
        assert_eq!(
            unit.artifact_path(&ctx, "libcore.a"),
            Path::new("/repo/native/build/build-ios-os-debug/Debug-iphoneos/libcore.a")
        );
    }
}
