//! kiosk-watchdog - kiosk foreground enforcement library
//!
//! This library exposes the watchdog control loop, its configuration and
//! IPC surface, and the platform backends it drives.

pub mod constants;
pub mod daemon;
pub mod models;
pub mod monitor;
pub mod platform;

pub use monitor::{Capabilities, Watchdog};
