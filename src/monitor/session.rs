use chrono::{DateTime, TimeZone};
use rand::rngs::StdRng;
use serde::Serialize;

use super::schedule::{next_fire_at, next_reboot_at};
use super::whitelist::TimedWhitelist;
use crate::daemon::config::WatchdogConfig;

const REBOOT_RETRY_MS: i64 = 24 * 3_600_000;

/// Service lifecycle. Once a reboot is requested the enforcement tick stops
/// making decisions until the process restarts, unless the reboot call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    RebootRequested,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Idle => "idle",
            Lifecycle::RebootRequested => "reboot_requested",
        }
    }
}

/// Mutable state shared by the enforcement loop, the remote poll and the
/// command processor. Lives for one process lifetime; nothing is persisted
/// except the token, which goes through the token store.
#[derive(Debug)]
pub struct SessionState {
    pub whitelist: TimedWhitelist,
    /// Last non-target foreground app, killed once the target regains focus
    pub last_foreground_app: Option<String>,
    pub lifecycle: Lifecycle,
    /// Daily reboot instant, computed once at start
    pub reboot_at: i64,
    pub next_wakeup_at: i64,
    pub next_runtime_send_at: i64,
    pub auth_token: Option<String>,
    rng: StdRng,
}

impl SessionState {
    /// Fresh session at `now`, with both randomized schedules armed
    pub fn start<Tz: TimeZone>(
        config: &WatchdogConfig,
        auth_token: Option<String>,
        now: &DateTime<Tz>,
        mut rng: StdRng,
    ) -> Self {
        let now_ms = now.timestamp_millis();
        let reboot_at = next_reboot_at(now, config.reboot_at_hour).timestamp_millis();
        let next_wakeup_at = next_fire_at(
            now_ms,
            config.wakeup_every_seconds,
            config.wakeup_random_seconds,
            &mut rng,
        );
        let next_runtime_send_at = next_fire_at(
            now_ms,
            config.send_runtime_every_seconds,
            config.send_runtime_random_seconds,
            &mut rng,
        );

        Self {
            whitelist: TimedWhitelist::new(),
            last_foreground_app: None,
            lifecycle: Lifecycle::Idle,
            reboot_at,
            next_wakeup_at,
            next_runtime_send_at,
            auth_token,
            rng,
        }
    }

    pub fn is_rebooting(&self) -> bool {
        self.lifecycle == Lifecycle::RebootRequested
    }

    /// Idle -> RebootRequested. Returns false when a reboot was already requested.
    pub fn request_reboot(&mut self) -> bool {
        match self.lifecycle {
            Lifecycle::Idle => {
                self.lifecycle = Lifecycle::RebootRequested;
                true
            }
            Lifecycle::RebootRequested => false,
        }
    }

    /// RebootRequested -> Idle after the reboot call failed. The next attempt
    /// moves to the same slot on a later day. Returns the new reboot instant.
    pub fn abandon_reboot(&mut self, now: i64) -> i64 {
        self.lifecycle = Lifecycle::Idle;
        while self.reboot_at <= now {
            self.reboot_at += REBOOT_RETRY_MS;
        }
        self.reboot_at
    }

    pub fn reschedule_wakeup(&mut self, config: &WatchdogConfig, now: i64) -> i64 {
        self.next_wakeup_at = next_fire_at(
            now,
            config.wakeup_every_seconds,
            config.wakeup_random_seconds,
            &mut self.rng,
        );
        self.next_wakeup_at
    }

    pub fn reschedule_runtime_send(&mut self, config: &WatchdogConfig, now: i64) -> i64 {
        self.next_runtime_send_at = next_fire_at(
            now,
            config.send_runtime_every_seconds,
            config.send_runtime_random_seconds,
            &mut self.rng,
        );
        self.next_runtime_send_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::SeedableRng;

    fn session_at(now: &DateTime<Utc>) -> SessionState {
        SessionState::start(&WatchdogConfig::default(), None, now, StdRng::seed_from_u64(3))
    }

    #[test]
    fn test_start_arms_schedules_in_future() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let session = session_at(&now);
        let now_ms = now.timestamp_millis();

        assert_eq!(session.lifecycle, Lifecycle::Idle);
        assert!(session.next_wakeup_at >= now_ms + 1_800_000);
        assert!(session.next_wakeup_at <= now_ms + 2_400_000);
        assert!(session.next_runtime_send_at >= now_ms + 1_800_000);
        // 12:00 is past the default 06:00 slot
        assert_eq!(
            session.reboot_at,
            Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn test_reboot_request_is_sticky() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut session = session_at(&now);

        assert!(session.request_reboot());
        assert!(session.is_rebooting());
        assert!(!session.request_reboot());
        assert_eq!(session.lifecycle.as_str(), "reboot_requested");
    }

    #[test]
    fn test_abandoned_reboot_moves_to_next_day() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut session = session_at(&now);
        let slot = session.reboot_at;

        assert!(session.request_reboot());
        assert_eq!(session.abandon_reboot(slot + 5_000), slot + REBOOT_RETRY_MS);
        assert_eq!(session.lifecycle, Lifecycle::Idle);
        assert!(session.request_reboot());
    }

    #[test]
    fn test_reschedule_moves_forward_from_fire_time() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut session = session_at(&now);
        let mut config = WatchdogConfig::default();
        config.wakeup_every_seconds = 60;
        config.wakeup_random_seconds = 10;

        let fired_at = now.timestamp_millis() + 5_000_000;
        let next = session.reschedule_wakeup(&config, fired_at);

        assert!(next >= fired_at + 60_000 && next <= fired_at + 70_000);
        assert_eq!(session.next_wakeup_at, next);
    }
}
