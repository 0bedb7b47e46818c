#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiosk_watchdog::daemon::logging::{LogLevel, WatchdogLogger};
use kiosk_watchdog::monitor::{Capabilities, Watchdog};
use kiosk_watchdog::platform::{
    ConfigSource, DeviceControl, HttpClient, PlatformError, TokenStore,
};

pub const CONFIG_PATH: &str = "/test/watchdog_config.json";

/// Fixed start instant for every test watchdog: 2024-05-01 12:00:00 UTC
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn start_millis() -> i64 {
    start_time().timestamp_millis()
}

/// Kiosk config with every key present, launch and kill enabled
pub fn kiosk_config(overrides: serde_json::Value) -> String {
    let mut config = serde_json::json!({
        "launcher_version": "3.1.0",
        "watchdog_version": "1.0.0",
        "target_package": "com.kiosk",
        "target_package_activity": "com.kiosk.MainActivity",
        "runtime_api_url": "",
        "check_every_milliseconds": 1000,
        "allow_start_vrlauncher": true,
        "allow_reboot": false,
        "reboot_at_hour": 6,
        "allow_wakeup": false,
        "wakeup_every_seconds": 1800,
        "wakeup_random_seconds": 600,
        "allow_runtime": false,
        "runtime_every_seconds": 1800,
        "runtime_random_seconds": 600,
        "allow_kill_apps": true,
        "launcher_kill_whitelist": ["com.settings"]
    });
    if let (Some(base), Some(extra)) = (config.as_object_mut(), overrides.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    config.to_string()
}

#[derive(Default)]
struct DeviceState {
    foreground: Option<String>,
    running: HashSet<String>,
    not_installed: bool,
    interactive: bool,
    calls: Vec<String>,
    foreground_lookups: usize,
}

/// Scriptable device that records every side effect
#[derive(Default)]
pub struct FakeDevice {
    state: Mutex<DeviceState>,
}

impl FakeDevice {
    pub fn new(foreground: Option<&str>, running: &[&str]) -> Arc<Self> {
        let device = Self::default();
        device.set_foreground(foreground);
        device.set_running(running);
        Arc::new(device)
    }

    pub fn set_foreground(&self, package: Option<&str>) {
        self.state.lock().unwrap().foreground = package.map(str::to_string);
    }

    pub fn set_running(&self, packages: &[&str]) {
        self.state.lock().unwrap().running = packages.iter().map(|p| p.to_string()).collect();
    }

    pub fn set_interactive(&self, interactive: bool) {
        self.state.lock().unwrap().interactive = interactive;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Number of foreground reads, one per tick that got past the target check
    pub fn foreground_lookups(&self) -> usize {
        self.state.lock().unwrap().foreground_lookups
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl DeviceControl for FakeDevice {
    fn foreground_application(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        state.foreground_lookups += 1;
        state.foreground.clone()
    }

    fn running_processes(&self) -> HashSet<String> {
        self.state.lock().unwrap().running.clone()
    }

    fn kill_process(&self, package: &str) -> Result<(), PlatformError> {
        self.record(format!("kill {}", package));
        self.state.lock().unwrap().running.remove(package);
        Ok(())
    }

    fn launch_application(&self, package: &str, activity: &str) -> Result<(), PlatformError> {
        self.record(format!("launch {}/{}", package, activity));
        self.state.lock().unwrap().running.insert(package.to_string());
        Ok(())
    }

    fn is_package_installed(&self, _package: &str) -> bool {
        !self.state.lock().unwrap().not_installed
    }

    fn is_device_interactive(&self) -> bool {
        self.state.lock().unwrap().interactive
    }

    fn battery_level(&self) -> i32 {
        80
    }

    fn is_charging(&self) -> bool {
        true
    }

    fn installed_version(&self, _package: &str) -> Option<String> {
        Some("3.1.0".to_string())
    }

    fn reboot_device(&self) -> Result<(), PlatformError> {
        self.record("reboot".to_string());
        Ok(())
    }

    fn pulse_wake_screen(&self, _duration: Duration) -> Result<(), PlatformError> {
        self.record("wake".to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Option<String>,
    pub at: tokio::time::Instant,
}

/// HTTP double answering GETs from a queue and recording every request
#[derive(Default)]
pub struct FakeHttp {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    get_delay: Mutex<Option<Duration>>,
}

impl FakeHttp {
    pub fn respond(&self, response: Result<&str, &str>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(response.map(str::to_string).map_err(str::to_string));
    }

    /// Every GET answers only after `delay`, like a slow server
    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self) -> Result<String, PlatformError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
            .map_err(PlatformError::Http)
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, PlatformError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            headers: headers.to_vec(),
            content_type: None,
            body: None,
            at: tokio::time::Instant::now(),
        });
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.next_response()
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        content_type: &str,
        body: String,
    ) -> Result<String, PlatformError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            headers: headers.to_vec(),
            content_type: Some(content_type.to_string()),
            body: Some(body),
            at: tokio::time::Instant::now(),
        });
        Ok("ok".to_string())
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn persist(&self, token: &str) -> Result<(), PlatformError> {
        *self.token.lock().unwrap() = Some(token.to_string());
        Ok(())
    }

    fn load(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

/// Config file double; `None` behaves like a missing file
#[derive(Default)]
pub struct StaticConfigSource {
    text: Mutex<Option<String>>,
}

impl StaticConfigSource {
    pub fn new(text: Option<String>) -> Self {
        Self {
            text: Mutex::new(text),
        }
    }

    pub fn set(&self, text: Option<String>) {
        *self.text.lock().unwrap() = text;
    }
}

impl ConfigSource for StaticConfigSource {
    fn read_config_file(&self, path: &Path) -> Option<String> {
        if path != Path::new(CONFIG_PATH) {
            return None;
        }
        self.text.lock().unwrap().clone()
    }
}

/// Test doubles behind a watchdog, kept for assertions
pub struct Harness {
    pub device: Arc<FakeDevice>,
    pub http: Arc<FakeHttp>,
    pub tokens: Arc<MemoryTokenStore>,
    pub source: Arc<StaticConfigSource>,
    pub watchdog: Arc<Watchdog>,
}

impl Harness {
    pub fn new(config: Option<String>, device: Arc<FakeDevice>, tokens: MemoryTokenStore) -> Self {
        let http = Arc::new(FakeHttp::default());
        let tokens = Arc::new(tokens);
        let source = Arc::new(StaticConfigSource::new(config));

        let caps = Capabilities {
            device: device.clone(),
            http: http.clone(),
            tokens: tokens.clone(),
            config_source: source.clone(),
        };
        let watchdog = Watchdog::new(
            caps,
            PathBuf::from(CONFIG_PATH),
            WatchdogLogger::new("test", LogLevel::Error),
            &start_time(),
            StdRng::seed_from_u64(42),
        );

        Self {
            device,
            http,
            tokens,
            source,
            watchdog,
        }
    }
}
