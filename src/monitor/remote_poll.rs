//! Remote app-status poll
//!
//! The remote service may revoke the app currently holding the foreground.
//! At most one request is outstanding at a time; the flag is released by a
//! guard so every exit path (error, parse failure, cancellation) clears it.

use std::sync::atomic::{AtomicBool, Ordering};

use super::enforcement::{relaunch_target, TickContext, TickOutcome};
use super::session::SessionState;
use crate::models::AppStatus;
use crate::platform::PlatformError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A previous request is still outstanding
    InFlight,
    NoToken,
    /// No app-status endpoint configured
    NoEndpoint,
    /// The target already holds the foreground, nothing to check
    TargetInForeground,
    Failed(String),
    /// The foreground app is still allowed, or not listed
    NoRevocation,
    Revoked {
        app: String,
        relaunch: Option<TickOutcome>,
    },
}

/// Holds the in-flight flag until dropped
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    /// `None` when a request is already outstanding
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Parse the JSON array of `{name, is_active}` objects
pub fn parse_app_statuses(body: &str) -> Result<Vec<AppStatus>, PlatformError> {
    serde_json::from_str(body).map_err(|e| PlatformError::Unparseable(e.to_string()))
}

/// The entry revoking `foreground`, if any
pub fn find_revocation<'a>(statuses: &'a [AppStatus], foreground: &str) -> Option<&'a AppStatus> {
    statuses
        .iter()
        .find(|status| status.name == foreground && !status.is_active)
}

/// Act on a poll response with the session lock held. The foreground is read
/// again because the answer may arrive long after the request went out.
pub fn apply_statuses(
    ctx: &TickContext<'_>,
    session: &mut SessionState,
    statuses: &[AppStatus],
) -> PollOutcome {
    let Some(foreground) = ctx.device.foreground_application() else {
        return PollOutcome::NoRevocation;
    };
    let Some(revoked) = find_revocation(statuses, &foreground) else {
        return PollOutcome::NoRevocation;
    };

    log::info!("{} is_active == false", revoked.name);
    session.whitelist.remove(&revoked.name);

    PollOutcome::Revoked {
        app: revoked.name.clone(),
        relaunch: relaunch_target(ctx, session),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_allows_one_holder() {
        let flag = AtomicBool::new(false);

        let guard = InFlightGuard::try_acquire(&flag);
        assert!(guard.is_some());
        assert!(InFlightGuard::try_acquire(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(InFlightGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn test_parse_statuses() {
        let statuses =
            parse_app_statuses(r#"[{"name":"com.game","is_active":false}]"#).unwrap();
        assert_eq!(statuses, vec![AppStatus { name: "com.game".into(), is_active: false }]);

        assert!(matches!(
            parse_app_statuses(r#"{"name":"com.game"}"#),
            Err(PlatformError::Unparseable(_))
        ));
    }

    #[test]
    fn test_revocation_only_matches_foreground_inactive() {
        let statuses = vec![
            AppStatus { name: "com.video".into(), is_active: false },
            AppStatus { name: "com.game".into(), is_active: true },
        ];

        assert!(find_revocation(&statuses, "com.game").is_none());
        assert_eq!(find_revocation(&statuses, "com.video").map(|s| s.name.as_str()), Some("com.video"));
        assert!(find_revocation(&statuses, "com.other").is_none());
    }
}
