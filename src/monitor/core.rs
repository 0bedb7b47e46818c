//! Watchdog core shared by the enforcement loop, the remote poll and the
//! command processor
//!
//! Session state sits behind one async mutex. The enforcement tick and the
//! poll response handler take it from blocking threads since every device
//! call they make is synchronous; the command processor takes it from the
//! IPC task. The config snapshot is swapped atomically on reload.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use super::commands::apply_batch;
use super::enforcement::{run_tick, TelemetryPush, TickContext, TickReport};
use super::remote_poll::{apply_statuses, parse_app_statuses, InFlightGuard, PollOutcome};
use super::schedule::now_millis;
use super::session::SessionState;
use crate::constants::{TELEMETRY_CONTENT_TYPE, TOKEN_HEADER};
use crate::daemon::config::{ConfigHandle, ReloadOutcome, WatchdogConfig};
use crate::daemon::logging::WatchdogLogger;
use crate::models::{BatchSummary, CommandEntry, StatusReport};
use crate::platform::{ConfigSource, DeviceControl, HttpClient, PlatformError, TokenStore};

/// External collaborators the core drives
#[derive(Clone)]
pub struct Capabilities {
    pub device: Arc<dyn DeviceControl>,
    pub http: Arc<dyn HttpClient>,
    pub tokens: Arc<dyn TokenStore>,
    pub config_source: Arc<dyn ConfigSource>,
}

pub struct Watchdog {
    caps: Capabilities,
    config: ConfigHandle,
    config_path: PathBuf,
    session: Mutex<SessionState>,
    poll_in_flight: AtomicBool,
    logger: WatchdogLogger,
    started_at: Instant,
}

impl Watchdog {
    /// Load the config, restore the token and arm the schedules
    pub fn start(caps: Capabilities, config_path: PathBuf, logger: WatchdogLogger) -> Arc<Self> {
        Self::new(caps, config_path, logger, &Local::now(), StdRng::from_entropy())
    }

    /// Like `start`, with an explicit start instant and random source
    pub fn new<Tz: TimeZone>(
        caps: Capabilities,
        config_path: PathBuf,
        logger: WatchdogLogger,
        now: &DateTime<Tz>,
        rng: StdRng,
    ) -> Arc<Self> {
        let config = ConfigHandle::unloaded();
        let outcome = config.reload(caps.config_source.as_ref(), &config_path);
        log_reload(&logger, &config, &outcome);

        let token = caps.tokens.load();
        let session = SessionState::start(&config.snapshot(), token, now, rng);

        Arc::new(Self {
            caps,
            config,
            config_path,
            session: Mutex::new(session),
            poll_in_flight: AtomicBool::new(false),
            logger,
            started_at: Instant::now(),
        })
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<WatchdogConfig> {
        self.config.snapshot()
    }

    pub fn logger(&self) -> &WatchdogLogger {
        &self.logger
    }

    /// Run `f` with the session lock held
    pub async fn with_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut session = self.session.lock().await;
        f(&mut session)
    }

    pub async fn enforcement_tick(self: &Arc<Self>) -> Result<TickReport> {
        self.enforcement_tick_at(now_millis()).await
    }

    /// One enforcement tick at `now` (ms since epoch). A due telemetry push is
    /// sent from its own task so a slow endpoint never holds up the loop.
    pub async fn enforcement_tick_at(self: &Arc<Self>, now: i64) -> Result<TickReport> {
        let this = Arc::clone(self);
        let report = tokio::task::spawn_blocking(move || {
            let config = this.config();
            let mut session = this.session.blocking_lock();
            let ctx = TickContext {
                device: this.caps.device.as_ref(),
                config: &config,
                logger: &this.logger,
            };
            run_tick(&ctx, &mut session, now)
        })
        .await
        .context("Enforcement tick task failed")?;

        if let Some(push) = report.telemetry.clone() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let _ = this.push_telemetry(&push).await;
            });
        }

        Ok(report)
    }

    /// POST the telemetry payload. Failures are logged; the schedule was
    /// already advanced by the tick.
    pub async fn push_telemetry(&self, push: &TelemetryPush) -> Result<(), PlatformError> {
        let body = serde_json::to_string(&push.payload)
            .map_err(|e| PlatformError::Unparseable(e.to_string()))?;

        let result = self
            .caps
            .http
            .post(&push.url, &push.headers(), TELEMETRY_CONTENT_TYPE, body)
            .await;

        match &result {
            Ok(response) => log::info!("Runtime send response: {}", response.trim()),
            Err(err) => self
                .logger
                .log_error(&format!("Runtime send failed: {}", err), Some("telemetry")),
        }
        result.map(|_| ())
    }

    /// One remote poll. At most one runs at a time; overlapping calls return
    /// `PollOutcome::InFlight` immediately.
    pub async fn remote_poll(self: &Arc<Self>) -> PollOutcome {
        let Some(_guard) = InFlightGuard::try_acquire(&self.poll_in_flight) else {
            return PollOutcome::InFlight;
        };

        let Some(token) = self.session.lock().await.auth_token.clone() else {
            return PollOutcome::NoToken;
        };
        let config = self.config();
        let Some(url) = config.apps_api_url() else {
            return PollOutcome::NoEndpoint;
        };

        let device = Arc::clone(&self.caps.device);
        let foreground = match tokio::task::spawn_blocking(move || device.foreground_application()).await
        {
            Ok(foreground) => foreground,
            Err(err) => return PollOutcome::Failed(err.to_string()),
        };
        if foreground.is_some() && foreground == config.target_package {
            return PollOutcome::TargetInForeground;
        }

        let headers = vec![(TOKEN_HEADER.to_string(), token)];
        let statuses = match self.caps.http.get(url, &headers).await {
            Ok(body) => parse_app_statuses(&body),
            Err(err) => Err(err),
        };
        let statuses = match statuses {
            Ok(statuses) => statuses,
            Err(err) => {
                self.logger
                    .log_error(&format!("App status poll failed: {}", err), Some("remote_poll"));
                return PollOutcome::Failed(err.to_string());
            }
        };

        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let config = this.config();
            let mut session = this.session.blocking_lock();
            let ctx = TickContext {
                device: this.caps.device.as_ref(),
                config: &config,
                logger: &this.logger,
            };
            apply_statuses(&ctx, &mut session, &statuses)
        })
        .await
        .unwrap_or_else(|err| PollOutcome::Failed(err.to_string()))
    }

    /// Apply an external command batch
    pub async fn apply_commands(&self, entries: &[CommandEntry]) -> BatchSummary {
        let mut session = self.session.lock().await;
        apply_batch(
            entries,
            &mut session,
            self.caps.tokens.as_ref(),
            now_millis(),
            &self.logger,
        )
    }

    /// Re-read the config file and swap the snapshot. Ticks already running
    /// finish on the snapshot they started with.
    pub fn reload_config(&self) -> ReloadOutcome {
        let outcome = self
            .config
            .reload(self.caps.config_source.as_ref(), &self.config_path);
        log_reload(&self.logger, &self.config, &outcome);
        outcome
    }

    pub async fn status(&self) -> StatusReport {
        let config = self.config();
        let now = now_millis();
        let session = self.session.lock().await;

        StatusReport {
            pid: std::process::id(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            version: env!("KIOSK_WATCHDOG_VERSION").to_string(),
            config_path: self.config_path.clone(),
            config_loaded: self.config.is_loaded(),
            last_config_reload: self.config.last_reload(),
            config_summary: config.to_string(),
            config_errors: config.errors.clone(),
            lifecycle: session.lifecycle.as_str().to_string(),
            last_foreground_app: session.last_foreground_app.clone(),
            token_present: session.auth_token.is_some(),
            next_reboot_at: config.allow_reboot.then(|| to_utc(session.reboot_at)).flatten(),
            next_wakeup_at: config.allow_wakeup.then(|| to_utc(session.next_wakeup_at)).flatten(),
            next_runtime_send_at: config
                .allow_send_runtime
                .then(|| to_utc(session.next_runtime_send_at))
                .flatten(),
            whitelist: session.whitelist.active_entries(now),
        }
    }
}

fn to_utc(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

fn log_reload(logger: &WatchdogLogger, config: &ConfigHandle, outcome: &ReloadOutcome) {
    match outcome {
        ReloadOutcome::Replaced { errors } => {
            logger.log_config_loaded(&config.snapshot().to_string(), errors)
        }
        ReloadOutcome::KeptPrevious(err) => logger.log_error(
            &format!("Config reload failed, keeping previous config: {}", err),
            Some("config"),
        ),
        ReloadOutcome::Fallback(err) => logger.log_error(
            &format!("Config unavailable, running with everything disabled: {}", err),
            Some("config"),
        ),
    }
}
