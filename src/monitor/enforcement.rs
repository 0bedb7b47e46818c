//! Per-tick enforcement decision
//!
//! One tick runs, in order: the reboot check, the wake pulse, the telemetry
//! check and finally the foreground decision. The target is the only app this
//! loop ever launches; intruders are killed once the target holds the
//! foreground again.

use std::time::Duration;

use super::session::SessionState;
use crate::constants::{TOKEN_HEADER, UNKNOWN_VERSION, WAKE_PULSE_MS};
use crate::daemon::config::WatchdogConfig;
use crate::daemon::logging::WatchdogLogger;
use crate::models::TelemetryPayload;
use crate::platform::DeviceControl;

/// Collaborators and the config snapshot a tick runs against
pub struct TickContext<'a> {
    pub device: &'a dyn DeviceControl,
    pub config: &'a WatchdogConfig,
    pub logger: &'a WatchdogLogger,
}

/// What the foreground decision did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A reboot is in progress; nothing else was evaluated
    Rebooting,
    /// No target package configured
    NoTarget,
    /// The target holds the foreground
    Settled { killed: Option<String> },
    TargetNotInstalled,
    /// A whitelisted app holds the foreground
    Tolerated { app: String, target_killed: bool },
    Launched { killed: Option<String> },
    LaunchFailed,
    /// A launch was due but auto-launch is off
    LaunchDisabled,
}

/// Telemetry send decided by a tick, performed off the tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPush {
    pub url: String,
    pub token: String,
    pub payload: TelemetryPayload,
}

impl TelemetryPush {
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![(TOKEN_HEADER.to_string(), self.token.clone())]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub woke: bool,
    pub telemetry: Option<TelemetryPush>,
}

impl TickReport {
    fn new(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            woke: false,
            telemetry: None,
        }
    }
}

/// Run one enforcement tick at `now` (ms since epoch)
pub fn run_tick(ctx: &TickContext<'_>, session: &mut SessionState, now: i64) -> TickReport {
    if check_reboot(ctx, session, now) {
        return TickReport::new(TickOutcome::Rebooting);
    }

    let woke = ctx.config.allow_wakeup && check_wakeup(ctx, session, now);

    let telemetry = if ctx.config.allow_send_runtime {
        check_runtime_send(ctx, session, now)
    } else {
        None
    };

    TickReport {
        outcome: enforce_foreground(ctx, session, now),
        woke,
        telemetry,
    }
}

/// True when the rest of the tick must be skipped
fn check_reboot(ctx: &TickContext<'_>, session: &mut SessionState, now: i64) -> bool {
    if session.is_rebooting() {
        return true;
    }
    if !ctx.config.allow_reboot || now < session.reboot_at {
        return false;
    }

    if session.request_reboot() {
        ctx.logger.log_reboot();
        if let Err(err) = ctx.device.reboot_device() {
            let retry_at = session.abandon_reboot(now);
            ctx.logger.log_error(
                &format!("Reboot failed: {}, next attempt in {}s", err, (retry_at - now) / 1000),
                Some("reboot"),
            );
            return false;
        }
    }
    true
}

fn check_wakeup(ctx: &TickContext<'_>, session: &mut SessionState, now: i64) -> bool {
    if now < session.next_wakeup_at {
        return false;
    }

    if let Err(err) = ctx.device.pulse_wake_screen(Duration::from_millis(WAKE_PULSE_MS)) {
        ctx.logger.log_error(&format!("Wake pulse failed: {}", err), Some("wakeup"));
    } else {
        log::info!("WAKEUP!");
    }

    let next = session.reschedule_wakeup(ctx.config, now);
    log::info!("Next wakeup in {}s", (next - now) / 1000);
    true
}

/// Decide whether telemetry is due. The schedule advances whenever a send is
/// attempted, whatever its result.
fn check_runtime_send(
    ctx: &TickContext<'_>,
    session: &mut SessionState,
    now: i64,
) -> Option<TelemetryPush> {
    let token = session.auth_token.clone()?;
    if now < session.next_runtime_send_at || ctx.device.is_device_interactive() {
        return None;
    }
    let url = ctx.config.runtime_api_url()?.to_string();

    let firmware = ctx
        .config
        .target_package
        .as_deref()
        .and_then(|package| ctx.device.installed_version(package))
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string());

    let payload = TelemetryPayload {
        battery: ctx.device.battery_level(),
        firmware,
        charging: ctx.device.is_charging(),
    };

    let next = session.reschedule_runtime_send(ctx.config, now);
    log::info!("Next runtime send in {}s", (next - now) / 1000);

    Some(TelemetryPush { url, token, payload })
}

fn enforce_foreground(ctx: &TickContext<'_>, session: &mut SessionState, now: i64) -> TickOutcome {
    let config = ctx.config;
    let Some(target) = config.target_package.as_deref() else {
        return TickOutcome::NoTarget;
    };

    let foreground = ctx.device.foreground_application();

    if foreground.as_deref() == Some(target) {
        let killed = clear_previous_foreground(ctx, session.last_foreground_app.take(), target);
        return TickOutcome::Settled { killed };
    }

    session.last_foreground_app = foreground.clone();

    if !ctx.device.is_package_installed(target) {
        ctx.logger
            .log_error(&format!("Target package {} is not installed!", target), Some("enforcement"));
        return TickOutcome::TargetNotInstalled;
    }

    if let Some(app) = foreground.as_deref() {
        if session.whitelist.check(app, now) {
            let mut target_killed = false;
            if ctx.device.is_process_running(target) && !config.is_kill_exempt(app) {
                target_killed = kill_app(ctx, target, "whitelisted app holds the foreground");
            }

            let left = session.whitelist.expiry(app).map(|expiry| expiry - now).unwrap_or(0);
            log::info!("{} is whitelisted, milliseconds left: {}", app, left);
            return TickOutcome::Tolerated {
                app: app.to_string(),
                target_killed,
            };
        }
    }

    if !ctx.device.is_process_running(target) {
        log::info!("{} process not running", target);
    }

    if !config.allow_start_launcher {
        return TickOutcome::LaunchDisabled;
    }
    let Some(activity) = config.target_activity.as_deref() else {
        return TickOutcome::LaunchDisabled;
    };

    log::info!("Active app: {}", foreground.as_deref().unwrap_or("none"));
    if !launch_target(ctx, target, activity) {
        return TickOutcome::LaunchFailed;
    }

    // The intruder stays recorded so the settle tick can finish it off
    let killed = clear_previous_foreground(ctx, session.last_foreground_app.clone(), target);
    TickOutcome::Launched { killed }
}

/// Launch the target and kill the recorded background app.
///
/// Used when the remote service revokes the foreground app; honours the
/// auto-launch toggle like the tick does.
pub fn relaunch_target(ctx: &TickContext<'_>, session: &mut SessionState) -> Option<TickOutcome> {
    let target = ctx.config.target_package.as_deref()?;
    let activity = ctx.config.target_activity.as_deref()?;

    if !ctx.config.allow_start_launcher {
        return Some(TickOutcome::LaunchDisabled);
    }
    if !launch_target(ctx, target, activity) {
        return Some(TickOutcome::LaunchFailed);
    }

    let killed = clear_previous_foreground(ctx, session.last_foreground_app.take(), target);
    Some(TickOutcome::Launched { killed })
}

fn launch_target(ctx: &TickContext<'_>, target: &str, activity: &str) -> bool {
    ctx.logger.log_launch(target, activity);
    match ctx.device.launch_application(target, activity) {
        Ok(()) => true,
        Err(err) => {
            ctx.logger
                .log_error(&format!("Launch of {} failed: {}", target, err), Some("launch"));
            false
        }
    }
}

/// Kill a previously seen background app if it is still alive and is not
/// part of the target. Returns the killed package.
fn clear_previous_foreground(
    ctx: &TickContext<'_>,
    app: Option<String>,
    target: &str,
) -> Option<String> {
    let app = app?;
    if app.contains(target) || !ctx.device.is_process_running(&app) {
        return None;
    }

    kill_app(ctx, &app, "left the foreground to the target").then_some(app)
}

/// Kill unless killing is disabled or the package is exempt
fn kill_app(ctx: &TickContext<'_>, package: &str, reason: &str) -> bool {
    if !ctx.config.allow_kill_apps || ctx.config.is_kill_exempt(package) {
        log::debug!("Not killing {}: killing disabled or package exempt", package);
        return false;
    }

    ctx.logger.log_kill(package, reason);
    match ctx.device.kill_process(package) {
        Ok(()) => true,
        Err(err) => {
            ctx.logger
                .log_error(&format!("Kill of {} failed: {}", package, err), Some("kill"));
            false
        }
    }
}
