//! Capability interfaces the watchdog core drives
//!
//! The core never touches the OS directly. Foreground lookup, process control,
//! power management, HTTP, token persistence and config file access all go
//! through these traits so that device backends and test doubles can be swapped.

pub mod android;
pub mod http;
pub mod storage;

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use android::ShellDevice;
pub use http::ReqwestHttp;
pub use storage::{FileConfigSource, FileTokenStore};

/// Failures reported by platform collaborators
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with status {status:?}")]
    CommandFailed { program: String, status: Option<i32> },
    #[error("http request failed: {0}")]
    Http(String),
    #[error("could not parse platform output: {0}")]
    Unparseable(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("signal delivery failed: {0}")]
    Signal(#[from] nix::Error),
}

/// Device primitives used by the enforcement loop.
///
/// Calls are synchronous and expected to return quickly; callers run them
/// off the async workers.
pub trait DeviceControl: Send + Sync {
    /// Package owning the topmost resumed activity, `None` when nothing is on top
    fn foreground_application(&self) -> Option<String>;

    fn running_processes(&self) -> HashSet<String>;

    /// Identifiers without a `.` are never treated as running packages
    fn is_process_running(&self, package: &str) -> bool {
        package.contains('.') && self.running_processes().contains(package)
    }

    /// Best effort termination of every process of `package`
    fn kill_process(&self, package: &str) -> Result<(), PlatformError>;

    fn launch_application(&self, package: &str, activity: &str) -> Result<(), PlatformError>;

    fn is_package_installed(&self, package: &str) -> bool;

    /// Whether the screen is on and the device awake
    fn is_device_interactive(&self) -> bool;

    /// Battery level in percent, -1 when unknown
    fn battery_level(&self) -> i32;

    fn is_charging(&self) -> bool;

    fn installed_version(&self, package: &str) -> Option<String>;

    fn reboot_device(&self) -> Result<(), PlatformError>;

    fn pulse_wake_screen(&self, duration: Duration) -> Result<(), PlatformError>;
}

/// Outbound HTTP used by the remote poll and the telemetry push
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, PlatformError>;

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        content_type: &str,
        body: String,
    ) -> Result<String, PlatformError>;
}

/// Persistence for the auth token
pub trait TokenStore: Send + Sync {
    fn persist(&self, token: &str) -> Result<(), PlatformError>;

    fn load(&self) -> Option<String>;
}

/// Raw access to the kiosk config file
pub trait ConfigSource: Send + Sync {
    /// Full file text, `None` when missing or unreadable
    fn read_config_file(&self, path: &Path) -> Option<String>;
}
