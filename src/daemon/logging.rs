//! Structured logging for watchdog events
//!
//! Events go through the `log` facade as `"<message> | <json>"` lines so they
//! stay greppable while carrying machine-readable fields.

use anyhow::Result;
use log::{error, info};
use serde_json::json;

/// Structured event logger shared by every loop of the service
#[derive(Debug, Clone)]
pub struct WatchdogLogger {
    subsystem: String,
    /// Current logging level
    level: LogLevel,
}

/// Log levels for structured events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
}

/// Install the `env_logger` backend. `RUST_LOG` wins over the default filter.
pub fn init_logging(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))
}

impl WatchdogLogger {
    pub fn new(subsystem: impl Into<String>, level: LogLevel) -> Self {
        Self {
            subsystem: subsystem.into(),
            level,
        }
    }

    pub fn log_startup(&self, config_path: &std::path::Path, pid: u32) {
        let message = json!({
            "event": "daemon_startup",
            "pid": pid,
            "config_path": config_path.display().to_string(),
        });

        self.log_structured(LogLevel::Info, "Watchdog started", message);
    }

    pub fn log_shutdown(&self, reason: &str) {
        let message = json!({
            "event": "daemon_shutdown",
            "reason": reason,
        });

        self.log_structured(LogLevel::Info, "Watchdog shutting down", message);
    }

    /// Config (re)load result, including every per-field error
    pub fn log_config_loaded(&self, summary: &str, errors: &[String]) {
        let message = json!({
            "event": "config_loaded",
            "errors": errors,
            "config": summary,
        });

        if errors.is_empty() {
            self.log_structured(LogLevel::Info, "Watchdog config loaded without errors", message);
        } else {
            self.log_structured(LogLevel::Error, "Config created with errors", message);
        }
    }

    pub fn log_launch(&self, package: &str, activity: &str) {
        let message = json!({
            "event": "app_launched",
            "package": package,
            "activity": activity,
        });

        self.log_structured(LogLevel::Info, &format!("Launching package {}", package), message);
    }

    pub fn log_kill(&self, package: &str, reason: &str) {
        let message = json!({
            "event": "app_killed",
            "package": package,
            "reason": reason,
        });

        self.log_structured(LogLevel::Info, &format!("Killing package {}", package), message);
    }

    pub fn log_reboot(&self) {
        self.log_structured(LogLevel::Info, "Reboot requested", json!({ "event": "reboot_requested" }));
    }

    pub fn log_command(&self, key: &str, detail: &str) {
        let message = json!({
            "event": "command_applied",
            "key": key,
            "detail": detail,
        });

        self.log_structured(LogLevel::Info, &format!("{}: {}", key, detail), message);
    }

    pub fn log_error(&self, error_message: &str, context: Option<&str>) {
        let message = json!({
            "event": "error",
            "message": error_message,
            "context": context,
        });

        self.log_structured(LogLevel::Error, error_message, message);
    }

    fn log_structured(&self, level: LogLevel, message: &str, mut data: serde_json::Value) {
        if !self.should_log(level) {
            return;
        }

        data["subsystem"] = json!(self.subsystem);
        data["timestamp"] = json!(chrono::Utc::now().to_rfc3339());

        let full_message = format!("{} | {}", message, data);
        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        match (self.level, level) {
            (LogLevel::Error, LogLevel::Error) => true,
            (LogLevel::Info, LogLevel::Error | LogLevel::Info) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_level_filters_info_events() {
        let logger = WatchdogLogger::new("kiosk-watchdog", LogLevel::Error);
        assert!(logger.should_log(LogLevel::Error));
        assert!(!logger.should_log(LogLevel::Info));
    }

    #[test]
    fn test_info_level_passes_everything() {
        let logger = WatchdogLogger::new("kiosk-watchdog", LogLevel::Info);
        assert!(logger.should_log(LogLevel::Error));
        assert!(logger.should_log(LogLevel::Info));
    }
}
