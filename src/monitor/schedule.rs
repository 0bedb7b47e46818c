//! Timing helpers for the watchdog schedules
//!
//! All instants are milliseconds since the Unix epoch so the decision code can
//! be driven with explicit timestamps.

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use rand::Rng;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Next occurrence of `hour`:00:00 local time. Today's slot counts until it has passed.
pub fn next_reboot_at<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive();

    // A slot can be skipped by a DST gap, so look up to two days ahead
    for offset in 0..3u64 {
        let Some(day) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate >= *now {
                return candidate;
            }
        }
    }

    now.clone() + chrono::Duration::days(1)
}

/// `now + base + uniform(0..=jitter)`, seconds in, milliseconds out
pub fn next_fire_at<R: Rng + ?Sized>(now: i64, base_secs: i64, jitter_secs: i64, rng: &mut R) -> i64 {
    let base_ms = base_secs.max(0).saturating_mul(1000);
    let jitter_ms = if jitter_secs > 0 {
        rng.gen_range(0..=jitter_secs.saturating_mul(1000))
    } else {
        0
    };
    now.saturating_add(base_ms).saturating_add(jitter_ms)
}

/// Wall-clock fixed-rate timer. A slow tick skips the missed slots instead of
/// bursting to catch up, so lateness never accumulates.
pub fn fixed_rate(period: Duration, first_tick_now: bool) -> Interval {
    let start = if first_tick_now {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
