use std::collections::HashMap;

use crate::models::WhitelistEntryStatus;

/// Applications temporarily allowed to hold the foreground.
///
/// Maps a package to the absolute expiry (ms since epoch). Expired entries are
/// evicted lazily on lookup, never by a background sweep.
#[derive(Debug, Clone, Default)]
pub struct TimedWhitelist {
    entries: HashMap<String, i64>,
}

impl TimedWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `package` for `duration_ms` from `now`; last write wins. Returns the expiry.
    pub fn add(&mut self, package: &str, now: i64, duration_ms: i64) -> i64 {
        let expiry = now.saturating_add(duration_ms);
        self.entries.insert(package.to_string(), expiry);
        expiry
    }

    /// Returns whether an entry was present
    pub fn remove(&mut self, package: &str) -> bool {
        self.entries.remove(package).is_some()
    }

    /// Returns how many entries were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Whether `package` is whitelisted at `now`; an expired entry is evicted
    pub fn check(&mut self, package: &str, now: i64) -> bool {
        match self.entries.get(package) {
            None => false,
            Some(&expiry) if now >= expiry => {
                self.entries.remove(package);
                false
            }
            Some(_) => true,
        }
    }

    pub fn expiry(&self, package: &str) -> Option<i64> {
        self.entries.get(package).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entries at `now`, sorted by package; expired entries are left for lazy eviction
    pub fn active_entries(&self, now: i64) -> Vec<WhitelistEntryStatus> {
        let mut live: Vec<WhitelistEntryStatus> = self
            .entries
            .iter()
            .filter(|(_, &expiry)| expiry > now)
            .map(|(package, &expiry)| WhitelistEntryStatus {
                package: package.clone(),
                remaining_ms: expiry - now,
            })
            .collect();
        live.sort_by(|a, b| a.package.cmp(&b.package));
        live
    }
}
