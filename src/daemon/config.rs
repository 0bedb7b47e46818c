//! Configuration management for the watchdog
//!
//! Parses the flat JSON kiosk policy field by field so that one bad key never
//! invalidates the rest, and holds the active snapshot behind an atomic swap.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CHECK_INTERVAL_MS, DEFAULT_REBOOT_HOUR, DEFAULT_RUNTIME_EVERY_SECONDS,
    DEFAULT_RUNTIME_RANDOM_SECONDS, DEFAULT_WAKEUP_EVERY_SECONDS, DEFAULT_WAKEUP_RANDOM_SECONDS,
};
use crate::platform::ConfigSource;

/// Errors that make a whole config load fail
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file '{0}' is missing or unreadable")]
    Unreadable(PathBuf),
    #[error("config is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("config root must be a JSON object")]
    NotAnObject,
}

/// Kiosk policy snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogConfig {
    pub launcher_version: Option<String>,
    pub watchdog_version: Option<String>,
    pub target_package: Option<String>,
    pub target_activity: Option<String>,
    /// Telemetry destination
    pub runtime_api_url: Option<String>,
    /// Remote app-status endpoint
    pub apps_api_url: Option<String>,
    pub check_interval_ms: u64,
    pub allow_start_launcher: bool,
    pub allow_reboot: bool,
    /// Hour of day (0-23) for the daily reboot
    pub reboot_at_hour: u32,
    pub allow_wakeup: bool,
    pub wakeup_every_seconds: i64,
    pub wakeup_random_seconds: i64,
    pub allow_send_runtime: bool,
    pub send_runtime_every_seconds: i64,
    pub send_runtime_random_seconds: i64,
    pub allow_kill_apps: bool,
    /// Packages that are never killed
    pub kill_whitelist: Vec<String>,
    /// Per-field parse problems; non-empty does not invalidate the config
    pub errors: Vec<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            launcher_version: None,
            watchdog_version: None,
            target_package: None,
            target_activity: None,
            runtime_api_url: None,
            apps_api_url: None,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            allow_start_launcher: false,
            allow_reboot: false,
            reboot_at_hour: DEFAULT_REBOOT_HOUR,
            allow_wakeup: false,
            wakeup_every_seconds: DEFAULT_WAKEUP_EVERY_SECONDS,
            wakeup_random_seconds: DEFAULT_WAKEUP_RANDOM_SECONDS,
            allow_send_runtime: false,
            send_runtime_every_seconds: DEFAULT_RUNTIME_EVERY_SECONDS,
            send_runtime_random_seconds: DEFAULT_RUNTIME_RANDOM_SECONDS,
            allow_kill_apps: true,
            kill_whitelist: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl WatchdogConfig {
    /// Config used when nothing was ever loaded: every toggle off
    pub fn conservative() -> Self {
        Self {
            allow_kill_apps: false,
            ..Self::default()
        }
    }

    /// Parse raw config text. Only a non-JSON or non-object root is fatal.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text)?;
        match value {
            Value::Object(object) => Ok(Self::from_object(&object)),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    /// Build a config from a JSON object, recording every bad key in `errors`
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let mut config = Self::default();
        let mut fields = FieldReader::new(object);

        config.launcher_version = fields.string(&["launcher_version"]);
        config.watchdog_version = fields.string(&["watchdog_version"]);
        config.target_package = fields.string(&["target_package", "targetPackage"]);
        config.target_activity = fields.string(&["target_package_activity", "targetPackageActivity"]);
        config.runtime_api_url = fields.string(&["runtime_api_url"]);
        config.apps_api_url = fields.optional_string(&["apps_api_url"]);

        if let Some(ms) = fields.integer(&["check_every_milliseconds"]) {
            if ms > 0 {
                config.check_interval_ms = ms as u64;
            } else {
                fields.error(format!("'check_every_milliseconds' must be positive, got {}", ms));
            }
        }

        if let Some(allow) = fields.boolean(&["allow_start_vrlauncher"]) {
            config.allow_start_launcher = allow;
        }
        if let Some(allow) = fields.boolean(&["allow_reboot"]) {
            config.allow_reboot = allow;
        }
        if let Some(hour) = fields.integer(&["reboot_at_hour"]) {
            if (0..=23).contains(&hour) {
                config.reboot_at_hour = hour as u32;
            } else {
                fields.error(format!("'reboot_at_hour' must be within 0..=23, got {}", hour));
            }
        }

        if let Some(allow) = fields.boolean(&["allow_wakeup"]) {
            config.allow_wakeup = allow;
        }
        if let Some(secs) = fields.integer(&["wakeup_every_seconds"]) {
            config.wakeup_every_seconds = secs;
        }
        if let Some(secs) = fields.jitter(&["wakeup_random_seconds"]) {
            config.wakeup_random_seconds = secs;
        }

        if let Some(allow) = fields.boolean(&["allow_runtime"]) {
            config.allow_send_runtime = allow;
        }
        if let Some(secs) = fields.integer(&["runtime_every_seconds"]) {
            config.send_runtime_every_seconds = secs;
        }
        if let Some(secs) = fields.jitter(&["runtime_random_seconds"]) {
            config.send_runtime_random_seconds = secs;
        }

        if let Some(allow) = fields.boolean(&["allow_kill_apps"]) {
            config.allow_kill_apps = allow;
        }
        if let Some(list) = fields.string_list(&["launcher_kill_whitelist"]) {
            config.kill_whitelist = list;
        }

        config.errors = fields.into_errors();
        config.enforce_invariants();
        config
    }

    /// Force-disable features whose parameters make them meaningless
    fn enforce_invariants(&mut self) {
        if self.wakeup_every_seconds <= 0 {
            self.allow_wakeup = false;
        }
        if self.send_runtime_every_seconds <= 0 {
            self.allow_send_runtime = false;
        }
        if self.target_package.is_none() || self.target_activity.is_none() {
            self.allow_start_launcher = false;
            self.errors.push(
                "auto-launch disabled, check 'target_package' and 'target_package_activity'"
                    .to_string(),
            );
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Telemetry URL, if one is set and non-empty
    pub fn runtime_api_url(&self) -> Option<&str> {
        self.runtime_api_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Remote app-status URL, if one is set and non-empty
    pub fn apps_api_url(&self) -> Option<&str> {
        self.apps_api_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    pub fn is_kill_exempt(&self, package: &str) -> bool {
        self.kill_whitelist.iter().any(|exempt| exempt == package)
    }
}

impl fmt::Display for WatchdogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("null")
        }

        write!(
            f,
            "WatchdogConfig{{launcher_version='{}', watchdog_version='{}', target_package='{}', \
             target_activity='{}', runtime_api_url='{}', apps_api_url='{}', check_interval_ms={}, \
             allow_start_launcher={}, allow_reboot={}, reboot_at_hour={}, allow_wakeup={}, \
             wakeup={}s+{}s, allow_runtime={}, runtime={}s+{}s, allow_kill_apps={}, \
             kill_whitelist=[{}]}}",
            show(&self.launcher_version),
            show(&self.watchdog_version),
            show(&self.target_package),
            show(&self.target_activity),
            show(&self.runtime_api_url),
            show(&self.apps_api_url),
            self.check_interval_ms,
            self.allow_start_launcher,
            self.allow_reboot,
            self.reboot_at_hour,
            self.allow_wakeup,
            self.wakeup_every_seconds,
            self.wakeup_random_seconds,
            self.allow_send_runtime,
            self.send_runtime_every_seconds,
            self.send_runtime_random_seconds,
            self.allow_kill_apps,
            self.kill_whitelist.join(","),
        )
    }
}

/// Reads typed fields out of a JSON object, collecting errors instead of failing
struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    errors: Vec<String>,
}

impl<'a> FieldReader<'a> {
    fn new(object: &'a Map<String, Value>) -> Self {
        Self {
            object,
            errors: Vec::new(),
        }
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn into_errors(self) -> Vec<String> {
        self.errors
    }

    /// First present key among `keys` (primary name first, then aliases)
    fn lookup(&mut self, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
        let object = self.object;
        let found = keys
            .iter()
            .find_map(|key| object.get_key_value(*key))
            .map(|(key, value)| (key.as_str(), value));

        if found.is_none() {
            self.error(format!("missing key '{}'", keys.first().copied().unwrap_or_default()));
        }
        found
    }

    /// An empty string is valid and reads as unset
    fn string(&mut self, keys: &[&str]) -> Option<String> {
        let (key, value) = self.lookup(keys)?;
        match value.as_str() {
            Some(text) if !text.is_empty() => Some(text.to_string()),
            Some(_) => None,
            None => {
                self.error(format!("'{}' is not a string", key));
                None
            }
        }
    }

    /// Like `string`, but absence is not an error
    fn optional_string(&mut self, keys: &[&str]) -> Option<String> {
        if keys.iter().any(|key| self.object.contains_key(*key)) {
            self.string(keys)
        } else {
            None
        }
    }

    fn integer(&mut self, keys: &[&str]) -> Option<i64> {
        let (key, value) = self.lookup(keys)?;
        match value.as_i64() {
            Some(number) => Some(number),
            None => {
                self.error(format!("'{}' is not an integer", key));
                None
            }
        }
    }

    /// Integer that must not be negative
    fn jitter(&mut self, keys: &[&str]) -> Option<i64> {
        let secs = self.integer(keys)?;
        if secs < 0 {
            self.error(format!("'{}' must not be negative, got {}", keys[0], secs));
            return None;
        }
        Some(secs)
    }

    fn boolean(&mut self, keys: &[&str]) -> Option<bool> {
        let (key, value) = self.lookup(keys)?;
        match value.as_bool() {
            Some(flag) => Some(flag),
            None => {
                self.error(format!("'{}' is not a boolean", key));
                None
            }
        }
    }

    fn string_list(&mut self, keys: &[&str]) -> Option<Vec<String>> {
        let (key, value) = self.lookup(keys)?;
        let Some(items) = value.as_array() else {
            self.error(format!("'{}' is not an array", key));
            return None;
        };

        let mut list = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str() {
                Some(text) => list.push(text.to_string()),
                None => self.error(format!("'{}' contains a non-string element {}", key, item)),
            }
        }
        Some(list)
    }
}

/// Result of a (re)load attempt
#[derive(Debug)]
pub enum ReloadOutcome {
    /// New snapshot is active
    Replaced { errors: Vec<String> },
    /// Load failed; the previously loaded snapshot stays active
    KeptPrevious(ConfigError),
    /// Load failed and nothing was ever loaded; the conservative config is active
    Fallback(ConfigError),
}

/// Read and parse the kiosk config through the platform collaborator
pub fn load_config(source: &dyn ConfigSource, path: &Path) -> Result<WatchdogConfig, ConfigError> {
    let text = source
        .read_config_file(path)
        .ok_or_else(|| ConfigError::Unreadable(path.to_path_buf()))?;
    WatchdogConfig::from_json_str(&text)
}

struct ConfigSlot {
    current: Arc<WatchdogConfig>,
    loaded: bool,
    last_reload: Option<DateTime<Utc>>,
}

/// Shared handle to the active config snapshot.
///
/// Readers take an `Arc` snapshot and keep it for the whole tick, so a reload
/// racing with a tick is never observed half-applied.
#[derive(Clone)]
pub struct ConfigHandle {
    slot: Arc<RwLock<ConfigSlot>>,
}

impl ConfigHandle {
    /// Handle holding the conservative config, marked as never loaded
    pub fn unloaded() -> Self {
        Self {
            slot: Arc::new(RwLock::new(ConfigSlot {
                current: Arc::new(WatchdogConfig::conservative()),
                loaded: false,
                last_reload: None,
            })),
        }
    }

    pub fn snapshot(&self) -> Arc<WatchdogConfig> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&slot.current)
    }

    /// Whether a config file was ever loaded successfully
    pub fn is_loaded(&self) -> bool {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).loaded
    }

    pub fn last_reload(&self) -> Option<DateTime<Utc>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).last_reload
    }

    /// Swap in a freshly parsed config
    pub fn replace(&self, config: WatchdogConfig) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.current = Arc::new(config);
        slot.loaded = true;
        slot.last_reload = Some(Utc::now());
    }

    /// Re-read the config file and swap it in, keeping the previous snapshot on failure
    pub fn reload(&self, source: &dyn ConfigSource, path: &Path) -> ReloadOutcome {
        match load_config(source, path) {
            Ok(config) => {
                let errors = config.errors.clone();
                self.replace(config);
                ReloadOutcome::Replaced { errors }
            }
            Err(err) => {
                let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
                if slot.loaded {
                    ReloadOutcome::KeptPrevious(err)
                } else {
                    slot.current = Arc::new(WatchdogConfig::conservative());
                    slot.last_reload = Some(Utc::now());
                    ReloadOutcome::Fallback(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const FULL_CONFIG: &str = r#"{
        "launcher_version": "3.1.0",
        "watchdog_version": "1.2.0",
        "target_package": "com.kiosk",
        "target_package_activity": "com.kiosk.Main",
        "runtime_api_url": "https://example.test/runtime",
        "check_every_milliseconds": 1000,
        "allow_start_vrlauncher": true,
        "allow_reboot": true,
        "reboot_at_hour": 4,
        "allow_wakeup": true,
        "wakeup_every_seconds": 900,
        "wakeup_random_seconds": 60,
        "allow_runtime": true,
        "runtime_every_seconds": 1200,
        "runtime_random_seconds": 30,
        "allow_kill_apps": true,
        "launcher_kill_whitelist": ["com.settings", "com.store"]
    }"#;

    struct MapSource(Mutex<HashMap<PathBuf, String>>);

    impl MapSource {
        fn with(path: &str, text: &str) -> Self {
            let mut files = HashMap::new();
            files.insert(PathBuf::from(path), text.to_string());
            Self(Mutex::new(files))
        }

        fn set(&self, path: &str, text: Option<&str>) {
            let mut files = self.0.lock().unwrap();
            match text {
                Some(text) => files.insert(PathBuf::from(path), text.to_string()),
                None => files.remove(Path::new(path)),
            };
        }
    }

    impl ConfigSource for MapSource {
        fn read_config_file(&self, path: &Path) -> Option<String> {
            self.0.lock().unwrap().get(path).cloned()
        }
    }

    #[test]
    fn test_full_config_parses_without_errors() {
        let config = WatchdogConfig::from_json_str(FULL_CONFIG).unwrap();

        assert!(!config.has_errors(), "unexpected errors: {:?}", config.errors);
        assert_eq!(config.target_package.as_deref(), Some("com.kiosk"));
        assert_eq!(config.target_activity.as_deref(), Some("com.kiosk.Main"));
        assert_eq!(config.check_interval(), Duration::from_millis(1000));
        assert!(config.allow_start_launcher);
        assert_eq!(config.reboot_at_hour, 4);
        assert_eq!(config.wakeup_every_seconds, 900);
        assert_eq!(config.send_runtime_random_seconds, 30);
        assert!(config.is_kill_exempt("com.store"));
        assert!(!config.is_kill_exempt("com.kiosk"));
        assert_eq!(config.apps_api_url(), None);
    }

    #[test]
    fn test_missing_target_forces_launch_off() {
        let config = WatchdogConfig::from_json_str(
            r#"{"target_package": "com.kiosk", "allow_start_vrlauncher": true}"#,
        )
        .unwrap();

        assert!(!config.allow_start_launcher);
        assert!(config.errors.iter().any(|e| e.contains("auto-launch disabled")));

        let config = WatchdogConfig::from_json_str(
            r#"{"target_package_activity": "com.kiosk.Main", "allow_start_vrlauncher": true}"#,
        )
        .unwrap();
        assert!(!config.allow_start_launcher);
    }

    #[test]
    fn test_camel_case_target_aliases() {
        let config = WatchdogConfig::from_json_str(
            r#"{"targetPackage": "com.kiosk", "targetPackageActivity": "com.kiosk.Main",
                "allow_start_vrlauncher": true, "allow_kill_apps": true,
                "check_every_milliseconds": 1000}"#,
        )
        .unwrap();

        assert_eq!(config.target_package.as_deref(), Some("com.kiosk"));
        assert!(config.allow_start_launcher);
        assert_eq!(config.check_interval_ms, 1000);
    }

    #[test]
    fn test_bad_field_keeps_default_and_records_error() {
        let config = WatchdogConfig::from_json_str(
            r#"{"target_package": "com.kiosk", "target_package_activity": "com.kiosk.Main",
                "check_every_milliseconds": "fast", "allow_reboot": 1, "reboot_at_hour": 31}"#,
        )
        .unwrap();

        assert_eq!(config.check_interval_ms, DEFAULT_CHECK_INTERVAL_MS);
        assert!(!config.allow_reboot);
        assert_eq!(config.reboot_at_hour, DEFAULT_REBOOT_HOUR);
        assert!(config.errors.iter().any(|e| e.contains("'check_every_milliseconds' is not an integer")));
        assert!(config.errors.iter().any(|e| e.contains("'allow_reboot' is not a boolean")));
        assert!(config.errors.iter().any(|e| e.contains("reboot_at_hour")));
    }

    #[test]
    fn test_empty_strings_are_unset_not_errors() {
        let config = WatchdogConfig::from_json_str(
            r#"{"launcher_version": "", "watchdog_version": "",
                "target_package": "com.kiosk", "target_package_activity": "com.kiosk.Main",
                "runtime_api_url": "", "apps_api_url": "", "allow_runtime": true}"#,
        )
        .unwrap();

        assert_eq!(config.runtime_api_url(), None);
        assert_eq!(config.launcher_version, None);
        assert!(config.allow_send_runtime);
        assert!(!config.errors.iter().any(|e| e.contains("empty")));
        assert!(!config.errors.iter().any(|e| e.contains("runtime_api_url")));
        assert!(!config.errors.iter().any(|e| e.contains("version")));
    }

    #[test]
    fn test_non_positive_intervals_disable_schedules() {
        let config = WatchdogConfig::from_json_str(
            r#"{"allow_wakeup": true, "wakeup_every_seconds": 0,
                "allow_runtime": true, "runtime_every_seconds": -5}"#,
        )
        .unwrap();

        assert!(!config.allow_wakeup);
        assert!(!config.allow_send_runtime);
    }

    #[test]
    fn test_non_object_root_is_fatal() {
        assert!(matches!(
            WatchdogConfig::from_json_str("[1, 2]"),
            Err(ConfigError::NotAnObject)
        ));
        assert!(matches!(
            WatchdogConfig::from_json_str("{not json"),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_kill_whitelist_skips_non_strings() {
        let config = WatchdogConfig::from_json_str(
            r#"{"launcher_kill_whitelist": ["com.a", 5, "com.b"]}"#,
        )
        .unwrap();

        assert_eq!(config.kill_whitelist, vec!["com.a".to_string(), "com.b".to_string()]);
        assert!(config.errors.iter().any(|e| e.contains("non-string")));
    }

    #[test]
    fn test_reload_falls_back_when_never_loaded() {
        let source = MapSource::with("/other.json", "{}");
        let handle = ConfigHandle::unloaded();

        let outcome = handle.reload(&source, Path::new("/missing.json"));

        assert!(matches!(outcome, ReloadOutcome::Fallback(ConfigError::Unreadable(_))));
        assert!(!handle.is_loaded());
        assert_eq!(*handle.snapshot(), WatchdogConfig::conservative());
        assert!(!handle.snapshot().allow_kill_apps);
    }

    #[test]
    fn test_reload_keeps_previous_on_failure() {
        let source = MapSource::with("/cfg.json", FULL_CONFIG);
        let handle = ConfigHandle::unloaded();

        assert!(matches!(
            handle.reload(&source, Path::new("/cfg.json")),
            ReloadOutcome::Replaced { .. }
        ));
        let before = handle.snapshot();

        source.set("/cfg.json", Some("garbage"));
        assert!(matches!(
            handle.reload(&source, Path::new("/cfg.json")),
            ReloadOutcome::KeptPrevious(ConfigError::Malformed(_))
        ));

        source.set("/cfg.json", None);
        assert!(matches!(
            handle.reload(&source, Path::new("/cfg.json")),
            ReloadOutcome::KeptPrevious(ConfigError::Unreadable(_))
        ));

        assert!(Arc::ptr_eq(&before, &handle.snapshot()));
        assert!(handle.is_loaded());
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let handle = ConfigHandle::unloaded();
        let held = handle.snapshot();

        handle.replace(WatchdogConfig::from_json_str(FULL_CONFIG).unwrap());

        assert_eq!(held.target_package, None);
        assert_eq!(handle.snapshot().target_package.as_deref(), Some("com.kiosk"));
        assert!(handle.last_reload().is_some());
    }

    #[test]
    fn test_display_mentions_target() {
        let config = WatchdogConfig::from_json_str(FULL_CONFIG).unwrap();
        let line = config.to_string();

        assert!(line.contains("target_package='com.kiosk'"));
        assert!(line.contains("kill_whitelist=[com.settings,com.store]"));
    }
}
