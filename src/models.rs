//! Data models module
//!
//! Defines the wire and report structures shared between the service,
//! its IPC surface and the outbound HTTP calls:
//! - CommandEntry: one key/value pair of an external command batch
//! - AppStatus: one element of the remote app-status response
//! - TelemetryPayload: body of the runtime telemetry push
//! - StatusReport: snapshot returned by the status request

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One key/value pair of a command batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub key: String,
    pub value: String,
}

impl CommandEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Remote verdict on whether an application may keep running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    /// Package identifier
    pub name: String,
    /// False means the app's allowance was revoked
    pub is_active: bool,
}

/// Body of the runtime telemetry push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// Battery level in percent
    pub battery: i32,
    /// Installed version of the target package
    pub firmware: String,
    pub charging: bool,
}

/// A whitelisted application with the time it has left
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntryStatus {
    pub package: String,
    pub remaining_ms: i64,
}

/// Outcome counters for one applied command batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Keys that were applied
    pub applied: Vec<String>,
    /// Human readable reasons for every skipped key or segment
    pub skipped: Vec<String>,
}

/// Snapshot of the running service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub pid: u32,
    pub uptime_seconds: u64,
    pub version: String,
    /// Kiosk config file the service reads on reload
    pub config_path: PathBuf,
    /// Whether the active config came from the file or is the conservative fallback
    pub config_loaded: bool,
    pub last_config_reload: Option<DateTime<Utc>>,
    /// One-line summary of the active config
    pub config_summary: String,
    pub config_errors: Vec<String>,
    /// "idle" or "reboot_requested"
    pub lifecycle: String,
    pub last_foreground_app: Option<String>,
    /// Whether an auth token is set; the token itself is never reported
    pub token_present: bool,
    pub next_reboot_at: Option<DateTime<Utc>>,
    pub next_wakeup_at: Option<DateTime<Utc>>,
    pub next_runtime_send_at: Option<DateTime<Utc>>,
    pub whitelist: Vec<WhitelistEntryStatus>,
}
