//! Daemon runtime for the kiosk watchdog
//!
//! Wires the device, HTTP, token and config backends into a [`Watchdog`] and
//! drives it:
//! - enforcement loop on the configured fixed-rate interval
//! - remote app-status poll on its own fixed-rate interval
//! - IPC server for command batches, reloads and status queries
//! - SIGHUP triggers a config reload; SIGINT/SIGTERM stop the service

pub mod config;
pub mod ipc;
pub mod logging;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};

use crate::constants::{
    APP_SUBSYSTEM, CONFIG_FILE_NAME, FALLBACK_STATE_DIR, HTTP_TIMEOUT_SECS, IPC_SOCKET_PATH,
    REMOTE_POLL_INTERVAL_SECS, TOKEN_FILE_NAME,
};
use crate::daemon::ipc::IpcServer;
use crate::daemon::logging::{LogLevel, WatchdogLogger};
use crate::monitor::schedule::fixed_rate;
use crate::monitor::{Capabilities, PollOutcome, Watchdog};
use crate::platform::{FileConfigSource, FileTokenStore, ReqwestHttp, ShellDevice};

/// Where the daemon reads and writes its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
    pub token_path: PathBuf,
    pub remote_poll_interval: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            socket_path: PathBuf::from(IPC_SOCKET_PATH),
            token_path: default_token_path(),
            remote_poll_interval: Duration::from_secs(REMOTE_POLL_INTERVAL_SECS),
        }
    }
}

/// Default kiosk config location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_SUBSYSTEM))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_STATE_DIR))
        .join(CONFIG_FILE_NAME)
}

/// Default auth token location
pub fn default_token_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_SUBSYSTEM))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_STATE_DIR))
        .join(TOKEN_FILE_NAME)
}

/// Run the watchdog in the foreground until interrupted
pub async fn run_daemon(settings: DaemonSettings) -> Result<()> {
    let logger = WatchdogLogger::new(APP_SUBSYSTEM, LogLevel::Info);
    logger.log_startup(&settings.config_path, std::process::id());

    let caps = Capabilities {
        device: Arc::new(ShellDevice::new()),
        http: Arc::new(ReqwestHttp::new(Duration::from_secs(HTTP_TIMEOUT_SECS))?),
        tokens: Arc::new(FileTokenStore::new(&settings.token_path)),
        config_source: Arc::new(FileConfigSource),
    };
    let watchdog = Watchdog::start(caps, settings.config_path.clone(), logger.clone());

    let mut ipc_server = IpcServer::new(settings.socket_path.clone());
    ipc_server.bind()?;
    log::info!("Control socket listening on {}", ipc_server.socket_path().display());

    let poll_task = tokio::spawn(run_poll_loop(
        Arc::clone(&watchdog),
        settings.remote_poll_interval,
    ));
    let reload_task = tokio::spawn(run_reload_on_hangup(Arc::clone(&watchdog)));

    let reason = tokio::select! {
        reason = shutdown_signal() => reason,
        _ = run_enforcement_loop(Arc::clone(&watchdog)) => "Enforcement loop ended",
        result = ipc_server.serve(Arc::clone(&watchdog)) => {
            if let Err(e) = result {
                logger.log_error(&format!("{:#}", e), Some("ipc"));
            }
            "IPC server ended"
        }
    };

    logger.log_shutdown(reason);
    poll_task.abort();
    reload_task.abort();
    ipc_server.stop()?;

    Ok(())
}

/// Fixed-rate enforcement loop. The timer is rebuilt when a reload changes
/// the check interval.
pub async fn run_enforcement_loop(watchdog: Arc<Watchdog>) {
    let mut period = watchdog.config().check_interval();
    let mut interval = fixed_rate(period, true);

    loop {
        interval.tick().await;

        match watchdog.enforcement_tick().await {
            Ok(report) => log::debug!("Tick: {:?}", report.outcome),
            Err(e) => watchdog
                .logger()
                .log_error(&format!("{:#}", e), Some("enforcement")),
        }

        let current = watchdog.config().check_interval();
        if current != period {
            log::info!("Check interval changed from {:?} to {:?}", period, current);
            period = current;
            interval = fixed_rate(period, false);
        }
    }
}

/// Each fire spawns its own poll so a slow request never delays the timer;
/// the in-flight guard turns overlapping fires into no-ops.
pub async fn run_poll_loop(watchdog: Arc<Watchdog>, period: Duration) {
    let mut interval = fixed_rate(period, true);

    loop {
        interval.tick().await;

        let watchdog = Arc::clone(&watchdog);
        tokio::spawn(async move {
            match watchdog.remote_poll().await {
                PollOutcome::Revoked { app, relaunch } => {
                    log::info!("Remote poll revoked {}: {:?}", app, relaunch)
                }
                outcome => log::debug!("Remote poll: {:?}", outcome),
            }
        });
    }
}

async fn run_reload_on_hangup(watchdog: Arc<Watchdog>) -> Result<()> {
    let mut hangup = unix_signal(SignalKind::hangup())?;
    while hangup.recv().await.is_some() {
        log::info!("Reloading watchdog config...");
        watchdog.reload_config();
    }
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    let mut terminate = match unix_signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("SIGTERM handler unavailable: {}", e);
            let _ = signal::ctrl_c().await;
            return "Received interrupt";
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => "Received interrupt",
        _ = terminate.recv() => "Received SIGTERM",
    }
}
