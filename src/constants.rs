//! Global constants for kiosk-watchdog
//!
//! Centralized location for application-wide constants

/// Subsystem identifier attached to every structured log event
pub const APP_SUBSYSTEM: &str = "kiosk-watchdog";

/// Kiosk policy file name, resolved against the config directory
pub const CONFIG_FILE_NAME: &str = "watchdog_config.json";

/// File holding the persisted auth token
pub const TOKEN_FILE_NAME: &str = "token";

/// Directory used when the platform reports no config/data directory
pub const FALLBACK_STATE_DIR: &str = "/data/local/tmp/kiosk-watchdog";

/// Unix socket the daemon listens on for commands
pub const IPC_SOCKET_PATH: &str = "/tmp/kiosk-watchdog.sock";

/// Enforcement tick period when the config omits or mangles it
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 5000;

/// Hour of day for the daily reboot
pub const DEFAULT_REBOOT_HOUR: u32 = 6;

pub const DEFAULT_WAKEUP_EVERY_SECONDS: i64 = 1800;
pub const DEFAULT_WAKEUP_RANDOM_SECONDS: i64 = 600;
pub const DEFAULT_RUNTIME_EVERY_SECONDS: i64 = 1800;
pub const DEFAULT_RUNTIME_RANDOM_SECONDS: i64 = 600;

/// Remote app-status poll period
pub const REMOTE_POLL_INTERVAL_SECS: u64 = 10;

/// How long a wake pulse keeps the screen on
pub const WAKE_PULSE_MS: u64 = 60_000;

/// Outbound HTTP request timeout
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Content type of the telemetry push body
pub const TELEMETRY_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Header carrying the auth token on outbound requests
pub const TOKEN_HEADER: &str = "token";

/// Firmware string reported when the target's version cannot be read
pub const UNKNOWN_VERSION: &str = "unknown";
