//! Android device backend driven through the stock shell tools
//!
//! Runs on the device itself with shell (or root) privileges. Activity and
//! power state come from `dumpsys`, process control combines `am` with
//! direct signals to the package's PIDs.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use super::{DeviceControl, PlatformError};

/// Battery state parsed from `dumpsys battery`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryInfo {
    pub level: i32,
    pub charging: bool,
}

/// Device backend built on `am`, `pm`, `dumpsys`, `svc` and `input`
pub struct ShellDevice {
    system: Mutex<System>,
}

impl Default for ShellDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellDevice {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Process identifier as Android names it: the first command line word,
    /// which is the package (or `package:service`) for app processes
    fn process_identifiers(&self) -> Vec<(u32, String)> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );

        system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let identifier = process
                    .cmd()
                    .first()
                    .map(|arg| arg.to_string_lossy().to_string())
                    .filter(|arg| !arg.is_empty())
                    .unwrap_or_else(|| process.name().to_string_lossy().to_string());
                (pid.as_u32(), identifier)
            })
            .collect()
    }
}

/// Run a shell tool and return its stdout, failing on a non-zero exit
fn run(program: &str, args: &[&str]) -> Result<String, PlatformError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| PlatformError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(PlatformError::CommandFailed {
            program: format!("{} {}", program, args.join(" ")),
            status: output.status.code(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// SIGKILL every pid. A pid that already exited counts as killed; other
/// failures are logged and the first one is returned after all pids were tried.
fn kill_pids(pids: impl IntoIterator<Item = u32>, package: &str) -> Result<(), PlatformError> {
    let mut first_error = None;
    for pid in pids {
        log::info!("Killing pid {} ({})", pid, package);
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                log::warn!("Killing pid {} ({}) failed: {}", pid, package, err);
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Extract the package of the resumed activity from `dumpsys activity activities`
pub fn parse_resumed_package(dump: &str) -> Option<String> {
    dump.lines()
        .filter(|line| {
            let line = line.trim_start();
            line.starts_with("mResumedActivity")
                || line.starts_with("topResumedActivity")
                || line.starts_with("ResumedActivity")
        })
        .find_map(|line| {
            line.split_whitespace()
                .find(|token| token.contains('/'))
                .and_then(|component| component.split('/').next())
                .map(|package| package.trim_matches(|c| c == '{' || c == '}').to_string())
                .filter(|package| !package.is_empty())
        })
}

/// Level and charging state from `dumpsys battery`
pub fn parse_battery(dump: &str) -> Option<BatteryInfo> {
    let mut level = None;
    let mut charging = false;

    for line in dump.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "level" => level = value.parse::<i32>().ok(),
            "AC powered" | "USB powered" | "Wireless powered" | "Dock powered" => {
                charging |= value == "true";
            }
            // BatteryManager.BATTERY_STATUS_CHARGING
            "status" => charging |= value == "2",
            _ => {}
        }
    }

    level.map(|level| BatteryInfo { level, charging })
}

/// Interactivity from `dumpsys power`
pub fn parse_interactive(dump: &str) -> bool {
    dump.lines().map(str::trim).any(|line| {
        line == "mWakefulness=Awake"
            || line == "mInteractive=true"
            || line.starts_with("Display Power: state=ON")
    })
}

/// First `versionName=` entry from `dumpsys package <pkg>`
pub fn parse_version_name(dump: &str) -> Option<String> {
    dump.lines()
        .filter_map(|line| line.trim().strip_prefix("versionName="))
        .map(|version| version.trim().to_string())
        .find(|version| !version.is_empty())
}

impl DeviceControl for ShellDevice {
    fn foreground_application(&self) -> Option<String> {
        match run("dumpsys", &["activity", "activities"]) {
            Ok(dump) => parse_resumed_package(&dump),
            Err(err) => {
                log::error!("Foreground lookup failed: {}", err);
                None
            }
        }
    }

    fn running_processes(&self) -> HashSet<String> {
        self.process_identifiers()
            .into_iter()
            .map(|(_, identifier)| identifier)
            .collect()
    }

    fn kill_process(&self, package: &str) -> Result<(), PlatformError> {
        // Stops the app components; the process itself may linger
        if let Err(err) = run("am", &["force-stop", package]) {
            log::warn!("am force-stop {} failed: {}", package, err);
        }

        let pids = self
            .process_identifiers()
            .into_iter()
            .filter(|(_, identifier)| identifier == package)
            .map(|(pid, _)| pid);
        kill_pids(pids, package)
    }

    fn launch_application(&self, package: &str, activity: &str) -> Result<(), PlatformError> {
        let component = format!("{}/{}", package, activity);
        run("am", &["start", "-a", "android.intent.action.MAIN", "-n", &component]).map(|_| ())
    }

    fn is_package_installed(&self, package: &str) -> bool {
        run("pm", &["path", package])
            .map(|out| out.lines().any(|line| line.starts_with("package:")))
            .unwrap_or(false)
    }

    fn is_device_interactive(&self) -> bool {
        run("dumpsys", &["power"])
            .map(|dump| parse_interactive(&dump))
            .unwrap_or(false)
    }

    fn battery_level(&self) -> i32 {
        run("dumpsys", &["battery"])
            .ok()
            .and_then(|dump| parse_battery(&dump))
            .map(|info| info.level)
            .unwrap_or(-1)
    }

    fn is_charging(&self) -> bool {
        run("dumpsys", &["battery"])
            .ok()
            .and_then(|dump| parse_battery(&dump))
            .map(|info| info.charging)
            .unwrap_or(false)
    }

    fn installed_version(&self, package: &str) -> Option<String> {
        run("dumpsys", &["package", package])
            .ok()
            .and_then(|dump| parse_version_name(&dump))
    }

    fn reboot_device(&self) -> Result<(), PlatformError> {
        run("svc", &["power", "reboot"]).map(|_| ())
    }

    fn pulse_wake_screen(&self, duration: Duration) -> Result<(), PlatformError> {
        log::debug!("Wake pulse for {}ms", duration.as_millis());
        run("input", &["keyevent", "KEYCODE_WAKEUP"]).map(|_| ())
    }
}
