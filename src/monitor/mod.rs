//! Watchdog control loop
//!
//! Timed whitelist, schedules, per-tick enforcement, the remote app-status
//! poll and the external command processor, tied together by [`Watchdog`].

pub mod commands;
pub mod core;
pub mod enforcement;
pub mod remote_poll;
pub mod schedule;
pub mod session;
pub mod whitelist;

pub use self::core::{Capabilities, Watchdog};
pub use enforcement::{TickOutcome, TickReport};
pub use remote_poll::PollOutcome;
pub use session::{Lifecycle, SessionState};
pub use whitelist::TimedWhitelist;
